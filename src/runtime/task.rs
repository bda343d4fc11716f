/// Task contract and static task registration
///
/// A Task is a named unit of side-effecting work over a workflow object. It either
/// lets the pipeline continue, asks it to halt for a human decision, asks it to wait
/// for an external callback, or fails. Tasks are registered by name in a
/// [`TaskRegistry`] built at startup; Step Trees refer to them by that name.

use crate::{
    audit::AuditLog,
    cache::PendingRecords,
    clients::{Classifier, Publisher},
    runtime::diagnoser::format_blocking,
    workflow::{
        storage::ObjectStorage,
        types::{WaitingFor, WorkflowObject},
    },
};
use async_trait::async_trait;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;

/// What the engine should do after a task returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Advance to the next step
    Continue,
    /// Suspend for a human decision resolved through the named action
    Halt { action: String, message: String },
    /// Suspend until the named external system calls back
    Wait { on: WaitingFor, message: String },
}

impl TaskOutcome {
    pub fn halt(action: impl Into<String>, message: impl Into<String>) -> Self {
        TaskOutcome::Halt {
            action: action.into(),
            message: message.into(),
        }
    }

    pub fn wait(on: WaitingFor, message: impl Into<String>) -> Self {
        TaskOutcome::Wait {
            on,
            message: message.into(),
        }
    }
}

/// Failure raised by a task; always terminal for the current run
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    /// Another in-flight object must finish first
    #[error("{}", format_blocking(.reason, .ids))]
    Blocked { reason: String, ids: Vec<i64> },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }
}

/// Collaborators available to every task
#[derive(Clone)]
pub struct TaskContext {
    pub storage: ObjectStorage,
    pub classifier: Arc<dyn Classifier>,
    pub publisher: Arc<dyn Publisher>,
    pub pending: PendingRecords,
    pub audit: AuditLog,
    /// Base URL the legacy system calls back to
    pub callback_base_url: String,
}

#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    /// Actions this task may halt with, checked against the workflow at load time
    fn halts_with(&self) -> &[&'static str] {
        &[]
    }

    /// Tasks that wait on out-of-process work get the configured default timeout
    fn out_of_process(&self) -> bool {
        false
    }

    /// Explicit timeout, overriding the default for out-of-process tasks
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn run(
        &self,
        object: &mut WorkflowObject,
        ctx: &TaskContext,
    ) -> Result<TaskOutcome, TaskError>;
}

/// Cached result of a task, if it recorded one
pub fn task_result<'a>(object: &'a WorkflowObject, task: &str) -> Option<&'a Value> {
    object.extra_data.task_results.get(task)
}

/// Record a task's result; also serves as the "already ran" marker for tasks
/// whose side effects must not repeat when re-run
pub fn record_result(object: &mut WorkflowObject, task: &str, value: Value) {
    object
        .extra_data
        .task_results
        .insert(task.to_string(), value);
}

/// Name -> task table, populated once at startup
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<dyn Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task under its own name; a later registration replaces an earlier one
    pub fn register<T: Task + 'static>(&mut self, task: T) -> &mut Self {
        let name = task.name().to_string();
        if self.tasks.insert(name.clone(), Arc::new(task)).is_some() {
            tracing::warn!("⚠️ Task '{}' registered twice, keeping the latest", name);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(name).cloned()
    }
}
