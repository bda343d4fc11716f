/// Runtime Execution Layer
///
/// This module drives workflow objects through their Step Trees. It handles:
/// - Resumable step execution with persisted positions
/// - Halting for curator actions and resolving them
/// - Continuations through a locked worker pool
/// - External callbacks and blocking-chain diagnosis

// Task contract and registration table
pub mod task;

// Step Tree walker
pub mod engine;

// Halted actions and the resolve flow
pub mod actions;

// Worker pool and continuation requests
pub mod scheduler;

// Advisory per-object locks
pub mod lock;

// Legacy ingestion and collector callbacks
pub mod callbacks;

// Error-chain diagnosis over the object store
pub mod diagnoser;

// Periodic maintenance on tokio-cron-scheduler
pub mod reports;

// Re-export main types
pub use actions::{Action, ActionRegistry, ActionService, HumanInput, ResolveRequest};
pub use engine::{ExecutionEngine, RestartPoint, RunReport};
pub use scheduler::{ContinuationRequest, ContinuationScheduler, Dispatch, ResumeReason};
pub use task::{Task, TaskContext, TaskError, TaskOutcome, TaskRegistry};
