/// Workflow Definition Layer
///
/// This module holds what a workflow is and where its objects live:
/// - Step Trees with path addressing
/// - Workflow object types and the typed side-channel
/// - SQLite persistence with sqlx
/// - Lock-free registry of compiled definitions using ArcSwap

// Step Tree data structure and path navigation
pub mod tree;

// Core workflow object type definitions
pub mod types;

// SQLite persistence layer for workflow objects
pub mod storage;

// Registry of compiled workflow definitions
pub mod registry;

// Re-export commonly used types
pub use registry::{ValidationRules, WorkflowDefinition, WorkflowRegistry};
pub use tree::{Arm, Condition, Step, StepPath, StepTree};
pub use types::{ExtraData, NewObject, ObjectStatus, Position, WorkflowObject};
