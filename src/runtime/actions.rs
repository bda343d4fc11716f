/// Halted actions and their resolution
///
/// When a task halts it names an Action. The Action renders what a curator needs
/// to decide, and applies the curator's decision to the object's side-channel.
/// [`ActionService::resolve`] is the only way out of HALTED: it checks the object
/// is still waiting on that exact action, applies the decision, writes the audit
/// entry and hands the object to the continuation scheduler.

use crate::{
    audit::{AuditEntry, AuditLog},
    runtime::{
        engine::RestartPoint,
        lock::ObjectLocks,
        scheduler::{
            ContinuationRequest, ContinuationScheduler, Dispatch, DispatchOutcome, ResumeReason,
            SchedulerError,
        },
    },
    workflow::{
        registry::WorkflowRegistry,
        storage::ObjectStorage,
        types::{ExtraData, ObjectStatus, WaitingFor, WorkflowObject},
    },
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;

/// A curator's decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanInput {
    pub user_id: String,
    /// e.g. "accept", "accept_core", "reject"
    pub decision_value: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub extra_flags: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveRequest {
    /// Action the curator believes is pending
    pub action: String,
    #[serde(flatten)]
    pub input: HumanInput,
}

/// Stateless decision handler, registered once per action name
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the continuation runs inside the resolve call or on a worker
    fn dispatch(&self) -> Dispatch {
        Dispatch::Deferred
    }

    fn restart_point(&self) -> RestartPoint {
        RestartPoint::ContinueNext
    }

    /// View model shown to the curator
    fn render(&self, object: &WorkflowObject) -> Value;

    /// Write the decision into the side-channel; an Err rejects the input and
    /// leaves the object untouched
    fn apply(&self, extra: &mut ExtraData, input: &HumanInput) -> Result<(), String>;
}

#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A: Action + 'static>(&mut self, action: A) -> &mut Self {
        let name = action.name().to_string();
        if self.actions.insert(name.clone(), Arc::new(action)).is_some() {
            tracing::warn!("⚠️ Action '{}' registered twice, keeping the latest", name);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("object {0} not found")]
    NotFound(i64),

    #[error("object {0} is being processed, try again later")]
    Busy(i64),

    #[error("object {object_id} is not halted ({status})")]
    NotHalted { object_id: i64, status: ObjectStatus },

    #[error(
        "stale action '{requested}' for object {object_id}: status {status}, pending {}",
        or_none(.pending)
    )]
    Stale {
        object_id: i64,
        requested: String,
        status: ObjectStatus,
        pending: Option<String>,
    },

    #[error("action '{action}' is not registered for workflow '{kind}'")]
    UnknownAction { kind: String, action: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

fn or_none(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("none")
}

/// Rendered halted action, as served to the review interface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedAction {
    pub object_id: i64,
    pub action: String,
    pub message: Option<String>,
    pub view_model: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolveOutcome {
    pub object_id: i64,
    pub action: String,
    pub continuation: DispatchOutcome,
}

#[derive(Clone)]
pub struct ActionService {
    storage: ObjectStorage,
    registry: Arc<WorkflowRegistry>,
    locks: ObjectLocks,
    audit: AuditLog,
    scheduler: ContinuationScheduler,
}

impl ActionService {
    pub fn new(
        storage: ObjectStorage,
        registry: Arc<WorkflowRegistry>,
        locks: ObjectLocks,
        audit: AuditLog,
        scheduler: ContinuationScheduler,
    ) -> Self {
        Self {
            storage,
            registry,
            locks,
            audit,
            scheduler,
        }
    }

    /// Render the pending action of a HALTED object
    pub async fn render(&self, object_id: i64) -> Result<RenderedAction, ActionError> {
        let object = self
            .storage
            .get(object_id)
            .await?
            .ok_or(ActionError::NotFound(object_id))?;

        let name = match (object.status, object.pending_action()) {
            (ObjectStatus::Halted, Some(name)) => name.to_string(),
            _ => {
                return Err(ActionError::NotHalted {
                    object_id,
                    status: object.status,
                })
            }
        };

        let action = self.registry.action(&object.workflow_kind, &name).ok_or_else(|| {
            ActionError::UnknownAction {
                kind: object.workflow_kind.clone(),
                action: name.clone(),
            }
        })?;

        Ok(RenderedAction {
            object_id,
            view_model: action.render(&object),
            message: object.extra_data.action_message.clone(),
            action: name,
        })
    }

    /// Apply a curator decision and continue the object
    pub async fn resolve(
        &self,
        object_id: i64,
        request: ResolveRequest,
    ) -> Result<ResolveOutcome, ActionError> {
        let Some(guard) = self.locks.try_acquire(object_id).await? else {
            return Err(ActionError::Busy(object_id));
        };

        let applied = self.apply_locked(object_id, &request).await;

        if let Err(e) = self.locks.release(guard).await {
            tracing::warn!("⚠️ Failed to release lock for object {}: {}", object_id, e);
        }
        let action = applied?;

        tracing::info!(
            "🧑‍⚖️ Object {} resolved '{}' as '{}' by {}",
            object_id,
            request.action,
            request.input.decision_value,
            request.input.user_id
        );

        let continuation = self
            .scheduler
            .dispatch(
                ContinuationRequest::new(
                    object_id,
                    ResumeReason::ActionResolved,
                    action.restart_point(),
                ),
                action.dispatch(),
            )
            .await?;

        Ok(ResolveOutcome {
            object_id,
            action: request.action,
            continuation,
        })
    }

    async fn apply_locked(
        &self,
        object_id: i64,
        request: &ResolveRequest,
    ) -> Result<Arc<dyn Action>, ActionError> {
        let mut object = self
            .storage
            .get(object_id)
            .await?
            .ok_or(ActionError::NotFound(object_id))?;

        if object.status != ObjectStatus::Halted
            || object.pending_action() != Some(request.action.as_str())
        {
            tracing::warn!(
                "⚠️ Stale resolve of '{}' for object {} ({})",
                request.action,
                object_id,
                object.status
            );
            return Err(ActionError::Stale {
                object_id,
                requested: request.action.clone(),
                status: object.status,
                pending: object.extra_data.action.clone(),
            });
        }

        let action = self
            .registry
            .action(&object.workflow_kind, &request.action)
            .ok_or_else(|| ActionError::UnknownAction {
                kind: object.workflow_kind.clone(),
                action: request.action.clone(),
            })?;

        let mut extra = object.extra_data.clone();
        action
            .apply(&mut extra, &request.input)
            .map_err(ActionError::InvalidInput)?;
        extra.clear_action();
        extra.waiting_for = Some(WaitingFor::Continuation);

        object.extra_data = extra;
        object.status = ObjectStatus::Waiting;
        self.storage.save(&mut object).await?;

        let prediction = object.extra_data.relevance_prediction.as_ref();
        self.audit
            .record(&AuditEntry {
                object_id,
                user_id: Some(request.input.user_id.clone()),
                predicted_score: prediction.map(|p| p.max_score),
                predicted_decision: prediction.map(|p| p.decision.clone()),
                human_action: request.input.decision_value.clone(),
                source: "holdingpen".to_string(),
                action_kind: request.action.clone(),
                timestamp: Utc::now(),
            })
            .await;

        Ok(action)
    }
}
