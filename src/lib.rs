/// Holdingpen: resumable curation workflow engine
///
/// Bibliographic submissions move through Step Trees of tasks and branches,
/// halt for curator decisions, wait on external systems and resume exactly
/// where they stopped. State lives in SQLite; continuations run on a locked
/// worker pool.

// Core configuration and setup
pub mod config;

// SQLite pool and schema
pub mod database;

// Workflow definitions, objects and their storage
pub mod workflow;

// Execution engine, actions, scheduler and callbacks
pub mod runtime;

// Decision audit trail
pub mod audit;

// Key-value cache for pending record associations
pub mod cache;

// External collaborators: classifier, legacy publisher, operator notifier
pub mod clients;

// Article and author curation workflows
pub mod curation;

// Component wiring and entry points
pub mod service;

// HTTP API layer
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use runtime::{ExecutionEngine, RestartPoint, RunReport};
pub use server::{create_router, start_server};
pub use service::{Collaborators, Holdingpen};
pub use workflow::{NewObject, ObjectStatus, Step, StepPath, StepTree, WorkflowObject};
