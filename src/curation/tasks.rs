/// Curation tasks shared by the article and author workflows

use crate::{
    audit::AuditEntry,
    runtime::{
        callbacks::INDEXED_RESULT,
        task::{record_result, task_result, Task, TaskContext, TaskError, TaskOutcome},
    },
    workflow::types::{WaitingFor, WorkflowObject},
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

/// JSONPath of the arXiv identifier used for duplicate detection
pub const ARXIV_PATH: &str = "$.arxiv_eprints[0].value";

/// Trim every string in the payload and drop null members
pub struct NormalizeRecord;

fn normalize(value: &mut Value) {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.len() != s.len() {
                *s = trimmed.to_string();
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize),
        Value::Object(members) => {
            members.retain(|_, member| !member.is_null());
            members.values_mut().for_each(normalize);
        }
        _ => {}
    }
}

#[async_trait]
impl Task for NormalizeRecord {
    fn name(&self) -> &str {
        "normalize_record"
    }

    async fn run(
        &self,
        object: &mut WorkflowObject,
        _ctx: &TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        normalize(&mut object.data);
        Ok(TaskOutcome::Continue)
    }
}

/// Ask the relevance classifier for a prediction, once
pub struct ClassifyRelevance;

#[async_trait]
impl Task for ClassifyRelevance {
    fn name(&self) -> &str {
        "classify_relevance"
    }

    fn out_of_process(&self) -> bool {
        true
    }

    async fn run(
        &self,
        object: &mut WorkflowObject,
        ctx: &TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        if object.extra_data.relevance_prediction.is_some() {
            return Ok(TaskOutcome::Continue);
        }

        if let Some(prediction) = ctx.classifier.predict(&object.data).await? {
            tracing::info!(
                "🔮 Object {} predicted {} ({:.2})",
                object.id,
                prediction.decision,
                prediction.max_score
            );
            object.extra_data.relevance_prediction = Some(prediction);
        }
        Ok(TaskOutcome::Continue)
    }
}

/// Whether the classifier is confident enough to reject without a curator
pub fn auto_rejectable(object: &WorkflowObject) -> bool {
    object.extra_data.approved.is_none()
        && object
            .extra_data
            .relevance_prediction
            .as_ref()
            .is_some_and(|p| p.decision == "Rejected")
}

pub struct RejectAutomatically;

#[async_trait]
impl Task for RejectAutomatically {
    fn name(&self) -> &str {
        "reject_automatically"
    }

    async fn run(
        &self,
        object: &mut WorkflowObject,
        ctx: &TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        object.extra_data.approved = Some(false);
        object.extra_data.reason = Some("rejected by relevance classifier".to_string());

        let prediction = object.extra_data.relevance_prediction.as_ref();
        ctx.audit
            .record(&AuditEntry {
                object_id: object.id,
                user_id: None,
                predicted_score: prediction.map(|p| p.max_score),
                predicted_decision: prediction.map(|p| p.decision.clone()),
                human_action: "reject".to_string(),
                source: "automatic".to_string(),
                action_kind: "hep_approval".to_string(),
                timestamp: Utc::now(),
            })
            .await;

        Ok(TaskOutcome::Continue)
    }
}

/// Fail when another unfinished submission carries the same arXiv identifier
pub struct CheckBlockingDuplicates;

#[async_trait]
impl Task for CheckBlockingDuplicates {
    fn name(&self) -> &str {
        "check_blocking_duplicates"
    }

    async fn run(
        &self,
        object: &mut WorkflowObject,
        ctx: &TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let Some(arxiv) = object.data.pointer("/arxiv_eprints/0/value").cloned() else {
            return Ok(TaskOutcome::Continue);
        };

        let ids = ctx
            .storage
            .find_unfinished_matching(&object.workflow_kind, ARXIV_PATH, &arxiv, object.id)
            .await?;

        if ids.is_empty() {
            return Ok(TaskOutcome::Continue);
        }

        Err(TaskError::Blocked {
            reason: format!("arXiv {} is already being processed", arxiv),
            ids,
        })
    }
}

/// Halt for a curator decision unless one was already taken
pub struct HaltForApproval {
    task: &'static str,
    action: &'static [&'static str],
}

impl HaltForApproval {
    pub fn article() -> Self {
        Self {
            task: "halt_for_approval",
            action: &["hep_approval"],
        }
    }

    pub fn author() -> Self {
        Self {
            task: "halt_for_author_approval",
            action: &["author_approval"],
        }
    }
}

#[async_trait]
impl Task for HaltForApproval {
    fn name(&self) -> &str {
        self.task
    }

    fn halts_with(&self) -> &[&'static str] {
        self.action
    }

    async fn run(
        &self,
        object: &mut WorkflowObject,
        _ctx: &TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        if object.extra_data.approved.is_some() {
            return Ok(TaskOutcome::Continue);
        }

        let message = match &object.extra_data.relevance_prediction {
            Some(p) => format!(
                "Submission needs a decision (predicted {}, score {:.2})",
                p.decision, p.max_score
            ),
            None => "Submission needs a decision".to_string(),
        };
        Ok(TaskOutcome::halt(self.action[0], message))
    }
}

/// Halt for a merge decision when the submission matched an existing record
pub struct CheckExistingMatch;

#[async_trait]
impl Task for CheckExistingMatch {
    fn name(&self) -> &str {
        "check_existing_match"
    }

    fn halts_with(&self) -> &[&'static str] {
        &["merge_approval"]
    }

    async fn run(
        &self,
        object: &mut WorkflowObject,
        _ctx: &TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let Some(matched) = object.data.get("matched_control_number").and_then(Value::as_i64) else {
            return Ok(TaskOutcome::Continue);
        };

        if object.extra_data.scratch.contains_key("merge_decision") {
            return Ok(TaskOutcome::Continue);
        }

        Ok(TaskOutcome::halt(
            "merge_approval",
            format!("Submission matches existing record {}", matched),
        ))
    }
}

/// Finalize the payload to be sent upstream
pub struct StoreRecord;

#[async_trait]
impl Task for StoreRecord {
    fn name(&self) -> &str {
        "store_record"
    }

    async fn run(
        &self,
        object: &mut WorkflowObject,
        _ctx: &TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let merge = object
            .extra_data
            .scratch
            .get("merge_decision")
            .and_then(Value::as_str)
            == Some("merge");

        let Some(record) = object.data.as_object_mut() else {
            return Err(TaskError::failed("payload is not a JSON object"));
        };
        if merge {
            if let Some(matched) = record.get("matched_control_number").cloned() {
                record.insert("control_number".to_string(), matched);
            }
        }
        if let Some(core) = object.extra_data.core {
            record.insert("core".to_string(), Value::Bool(core));
        }

        record_result(
            object,
            "store_record",
            json!({ "merged": merge, "stored_at": Utc::now().to_rfc3339() }),
        );
        Ok(TaskOutcome::Continue)
    }
}

/// Upload to the legacy system and wait for its ingestion callback
///
/// The upload is recorded in the results cache, so a re-run of this task never
/// uploads twice: it just keeps waiting until the callback has set `recid`.
pub struct SendToLegacy;

#[async_trait]
impl Task for SendToLegacy {
    fn name(&self) -> &str {
        "send_to_legacy"
    }

    fn out_of_process(&self) -> bool {
        true
    }

    async fn run(
        &self,
        object: &mut WorkflowObject,
        ctx: &TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        if task_result(object, self.name()).is_some() {
            if object.extra_data.recid.is_some() {
                return Ok(TaskOutcome::Continue);
            }
            return Ok(TaskOutcome::wait(WaitingFor::Upload, "waiting for legacy ingestion"));
        }

        let callback_url = format!(
            "{}/callback/workflows/upload",
            ctx.callback_base_url.trim_end_matches('/')
        );
        ctx.publisher.submit(object, &callback_url).await?;
        record_result(object, self.name(), json!({ "submitted_at": Utc::now().to_rfc3339() }));

        Ok(TaskOutcome::wait(WaitingFor::Upload, "waiting for legacy ingestion"))
    }
}

/// Wait until the collector reports the record as indexed
///
/// A collector report that arrives before the object gets here is recorded on the
/// object, and the task then continues without waiting.
pub struct WaitForCollector;

#[async_trait]
impl Task for WaitForCollector {
    fn name(&self) -> &str {
        "wait_for_collector"
    }

    async fn run(
        &self,
        object: &mut WorkflowObject,
        ctx: &TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let Some(recid) = object.extra_data.recid else {
            return Err(TaskError::failed("no record id assigned by legacy ingestion"));
        };

        if task_result(object, INDEXED_RESULT).is_some() {
            tracing::debug!("📚 Record {} was indexed before object {} waited", recid, object.id);
            return Ok(TaskOutcome::Continue);
        }

        ctx.pending.remember(recid, object.id).await;
        Ok(TaskOutcome::wait(
            WaitingFor::Collector,
            format!("waiting for collector to index record {}", recid),
        ))
    }
}

/// Record the final curation decision
pub struct MarkDecision {
    task: &'static str,
    decision: &'static str,
}

impl MarkDecision {
    pub fn accepted() -> Self {
        Self {
            task: "mark_accepted",
            decision: "accepted",
        }
    }

    pub fn rejected() -> Self {
        Self {
            task: "mark_rejected",
            decision: "rejected",
        }
    }
}

#[async_trait]
impl Task for MarkDecision {
    fn name(&self) -> &str {
        self.task
    }

    async fn run(
        &self,
        object: &mut WorkflowObject,
        _ctx: &TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        tracing::info!("🏁 Object {} {}", object.id, self.decision);
        let result = json!({ "decision": self.decision, "reason": object.extra_data.reason });
        record_result(object, "final_decision", result);
        Ok(TaskOutcome::Continue)
    }
}
