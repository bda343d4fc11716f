/// Resumable Step Tree execution engine
///
/// Walks an object's Step Tree from its saved position until the tree is exhausted,
/// a task halts for a human decision, a task waits for an external callback, or a
/// task fails. The position is persisted after every step transition, so a run can
/// be picked up again by any worker, possibly much later.
///
/// The engine does not lock objects; callers go through the continuation scheduler,
/// which holds the object's advisory lock around every run.

use crate::{
    runtime::task::{Task, TaskContext, TaskError, TaskOutcome},
    workflow::{
        registry::{CompiledWorkflow, WorkflowRegistry},
        tree::{Arm, ArmSelector, Branch, Step, StepPath, TreeError},
        types::{ObjectStatus, Position, WorkflowObject},
    },
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration, time::Instant};
use thiserror::Error;

/// Where a resumed run picks up relative to the saved position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPoint {
    /// Skip past the task that halted or waited
    #[default]
    ContinueNext,
    /// Run the task at the saved position again
    RestartCurrent,
    /// Forget the position and recorded branch arms, start over
    FromBeginning,
}

/// Summary of one engine run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub object_id: i64,
    pub status: ObjectStatus,
    pub position: Position,
    /// Names of the tasks invoked during this run, in order
    pub steps_executed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RunReport {
    fn of(object: &WorkflowObject, steps_executed: Vec<String>) -> Self {
        let message = match object.status {
            ObjectStatus::Error => object.extra_data.error_message.clone(),
            ObjectStatus::Halted | ObjectStatus::Waiting => object.extra_data.action_message.clone(),
            _ => None,
        };
        Self {
            object_id: object.id,
            status: object.status,
            position: object.extra_data.position.clone(),
            steps_executed,
            message,
        }
    }
}

/// Infrastructure failure while driving a run; task failures are not errors here,
/// they end the run with the object in ERROR
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Arm selection from the arms recorded when each Branch was entered
///
/// With `verify` set, every recorded arm is checked against a fresh evaluation of
/// the predicate and the first mismatch is kept in `diverged`.
struct RecordedArms<'a> {
    object: &'a WorkflowObject,
    verify: bool,
    diverged: Option<String>,
}

impl<'a> RecordedArms<'a> {
    fn new(object: &'a WorkflowObject, verify: bool) -> Self {
        Self {
            object,
            verify,
            diverged: None,
        }
    }
}

impl ArmSelector for RecordedArms<'_> {
    fn select(&mut self, branch_path: &[usize], branch: &Branch) -> Arm {
        let key = StepPath::from(branch_path.to_vec()).to_string();
        let recorded = self.object.extra_data.branch_arms.get(&key).copied();

        match recorded {
            Some(recorded) if self.verify => {
                let current = Arm::from_bool(branch.condition.evaluate(self.object));
                if current != recorded && self.diverged.is_none() {
                    self.diverged = Some(format!(
                        "branch diverged at {}: condition '{}' now selects {:?}, recorded {:?}",
                        key,
                        branch.condition.name(),
                        current,
                        recorded
                    ));
                }
                recorded
            }
            Some(recorded) => recorded,
            None => Arm::from_bool(branch.condition.evaluate(self.object)),
        }
    }
}

enum StepFailure {
    Task(TaskError),
    TimedOut(Duration),
}

/// Engine driving objects through their Step Trees
#[derive(Clone)]
pub struct ExecutionEngine {
    registry: Arc<WorkflowRegistry>,
    context: TaskContext,
    default_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<WorkflowRegistry>, context: TaskContext, default_timeout: Duration) -> Self {
        Self {
            registry,
            context,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    /// Run an object until it completes, halts, waits or fails
    pub async fn run(
        &self,
        object: &mut WorkflowObject,
        restart: RestartPoint,
    ) -> Result<RunReport, EngineError> {
        let run_start = Instant::now();

        let Some(workflow) = self.registry.get(&object.workflow_kind) else {
            tracing::error!(
                "❌ Object {} has unknown workflow kind '{}'",
                object.id,
                object.workflow_kind
            );
            let message = format!("unknown workflow kind '{}'", object.workflow_kind);
            return self.fail(object, message, Vec::new()).await;
        };

        if restart == RestartPoint::FromBeginning {
            tracing::info!("🔄 Resetting object {} to the beginning", object.id);
            object.extra_data.position = Position::Start;
            object.extra_data.branch_arms.clear();
            object.extra_data.error_message = None;
            object.extra_data.clear_action();
        }

        if object.status == ObjectStatus::Created {
            if let Err(violations) = workflow.definition.validation.check(&object.data) {
                tracing::warn!("🚫 Object {} failed validation: {:?}", object.id, violations);
                let message = format!("validation failed: {}", violations.join("; "));
                return self.fail(object, message, Vec::new()).await;
            }
        }

        let start = match self.start_path(&workflow, object, restart) {
            Ok(start) => start,
            Err(message) => return self.fail(object, message, Vec::new()).await,
        };

        let Some(mut path) = start else {
            return self.complete(object, Vec::new()).await;
        };

        tracing::info!(
            "🚀 Running object {} ({}) from {} [{:?}]",
            object.id,
            object.workflow_kind,
            path,
            restart
        );

        object.status = ObjectStatus::Running;
        object.extra_data.error_message = None;
        object.extra_data.waiting_for = None;
        object.extra_data.clear_action();
        object.extra_data.position = Position::At(path.clone());
        self.context.storage.save(object).await?;

        let mut steps_executed = Vec::new();

        loop {
            let step = {
                let mut selector = RecordedArms::new(object, false);
                match workflow.tree().resolve(&path, &mut selector) {
                    Ok(step) => step,
                    Err(e) => {
                        let message = format!("invalid position {}: {}", path, e);
                        return self.fail(object, message, steps_executed).await;
                    }
                }
            };

            let next = match step {
                Step::Branch(branch) => {
                    let arm = Arm::from_bool(branch.condition.evaluate(object));
                    let key = path.to_string();
                    if let Some(recorded) = object.extra_data.branch_arms.get(&key).copied() {
                        if recorded != arm {
                            let message = format!(
                                "branch diverged at {}: condition '{}' now selects {:?}, recorded {:?}",
                                key,
                                branch.condition.name(),
                                arm,
                                recorded
                            );
                            return self.fail(object, message, steps_executed).await;
                        }
                    }
                    object.extra_data.branch_arms.insert(key, arm);
                    tracing::debug!(
                        "🔀 Branch {} ('{}') routes to {:?}",
                        path,
                        branch.condition.name(),
                        arm
                    );

                    if branch.arm(arm).is_empty() {
                        self.successor(&workflow, object, &path)
                    } else {
                        Ok(Some(path.child(0)))
                    }
                }
                Step::Task(name) => {
                    let Some(task) = workflow.task(name) else {
                        let message = format!("task '{}' is not registered", name);
                        return self.fail(object, message, steps_executed).await;
                    };

                    tracing::debug!("⚙️ Object {}: executing task '{}' at {}", object.id, name, path);
                    steps_executed.push(name.clone());
                    let task_start = Instant::now();

                    match self.invoke(task.as_ref(), object).await {
                        Ok(TaskOutcome::Continue) => {
                            tracing::debug!(
                                "✅ Task '{}' completed in {:?}",
                                name,
                                task_start.elapsed()
                            );
                            self.successor(&workflow, object, &path)
                        }
                        Ok(TaskOutcome::Halt { action, message }) => {
                            if workflow.action(&action).is_none() {
                                let message = format!(
                                    "task '{}' failed: halted with unregistered action '{}'",
                                    name, action
                                );
                                return self.fail(object, message, steps_executed).await;
                            }

                            tracing::info!(
                                "⏸️ Object {} halted at {} awaiting '{}'",
                                object.id,
                                path,
                                action
                            );
                            object.status = ObjectStatus::Halted;
                            object.extra_data.action = Some(action);
                            object.extra_data.action_message = Some(message);
                            self.context.storage.save(object).await?;
                            return Ok(RunReport::of(object, steps_executed));
                        }
                        Ok(TaskOutcome::Wait { on, message }) => {
                            tracing::info!(
                                "⏳ Object {} waiting on {} at {}: {}",
                                object.id,
                                on,
                                path,
                                message
                            );
                            object.status = ObjectStatus::Waiting;
                            object.extra_data.waiting_for = Some(on);
                            object.extra_data.action = None;
                            object.extra_data.action_message = Some(message);
                            self.context.storage.save(object).await?;
                            return Ok(RunReport::of(object, steps_executed));
                        }
                        Err(StepFailure::Task(e)) => {
                            let message = format!("task '{}' failed: {}", name, e);
                            return self.fail(object, message, steps_executed).await;
                        }
                        Err(StepFailure::TimedOut(limit)) => {
                            let message =
                                format!("task '{}' timed out after {:?}", name, limit);
                            return self.fail(object, message, steps_executed).await;
                        }
                    }
                }
            };

            match next {
                Ok(Some(next_path)) => {
                    path = next_path;
                    object.extra_data.position = Position::At(path.clone());
                    self.context.storage.save(object).await?;
                }
                Ok(None) => {
                    tracing::info!(
                        "🎉 Object {} completed in {:?}",
                        object.id,
                        run_start.elapsed()
                    );
                    return self.complete(object, steps_executed).await;
                }
                Err(message) => return self.fail(object, message, steps_executed).await,
            }
        }
    }

    /// First path of this run, verifying the arms of every enclosing Branch
    fn start_path(
        &self,
        workflow: &CompiledWorkflow,
        object: &WorkflowObject,
        restart: RestartPoint,
    ) -> Result<Option<StepPath>, String> {
        let saved = match &object.extra_data.position {
            Position::Start => return Ok(workflow.tree().first_path()),
            Position::Completed => return Ok(None),
            Position::At(path) => path.clone(),
        };

        let mut selector = RecordedArms::new(object, true);
        let start = match restart {
            RestartPoint::ContinueNext => workflow.tree().next_path(&saved, &mut selector),
            _ => workflow
                .tree()
                .resolve(&saved, &mut selector)
                .map(|_| Some(saved.clone())),
        }
        .map_err(|e: TreeError| format!("invalid position {}: {}", saved, e))?;

        match selector.diverged {
            Some(diverged) => Err(diverged),
            None => Ok(start),
        }
    }

    fn successor(
        &self,
        workflow: &CompiledWorkflow,
        object: &WorkflowObject,
        path: &StepPath,
    ) -> Result<Option<StepPath>, String> {
        let mut selector = RecordedArms::new(object, false);
        workflow
            .tree()
            .next_path(path, &mut selector)
            .map_err(|e| format!("invalid position {}: {}", path, e))
    }

    async fn invoke(
        &self,
        task: &dyn Task,
        object: &mut WorkflowObject,
    ) -> Result<TaskOutcome, StepFailure> {
        let limit = task
            .timeout()
            .or_else(|| task.out_of_process().then_some(self.default_timeout));

        match limit {
            Some(limit) => match tokio::time::timeout(limit, task.run(object, &self.context)).await {
                Ok(result) => result.map_err(StepFailure::Task),
                Err(_) => Err(StepFailure::TimedOut(limit)),
            },
            None => task.run(object, &self.context).await.map_err(StepFailure::Task),
        }
    }

    async fn complete(
        &self,
        object: &mut WorkflowObject,
        steps_executed: Vec<String>,
    ) -> Result<RunReport, EngineError> {
        object.status = ObjectStatus::Completed;
        object.extra_data.position = Position::Completed;
        object.extra_data.waiting_for = None;
        object.extra_data.clear_action();
        object.extra_data.error_message = None;
        self.context.storage.save(object).await?;
        Ok(RunReport::of(object, steps_executed))
    }

    async fn fail(
        &self,
        object: &mut WorkflowObject,
        message: String,
        steps_executed: Vec<String>,
    ) -> Result<RunReport, EngineError> {
        tracing::error!("❌ Object {} failed: {}", object.id, message);
        object.mark_error(message);
        self.context.storage.save(object).await?;
        Ok(RunReport::of(object, steps_executed))
    }
}
