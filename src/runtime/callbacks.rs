/// External callbacks that continue WAITING objects
///
/// Two systems report back asynchronously:
/// - the legacy ingestion pipeline, after an upload, with the assigned record id
///   (or a failure) keyed by the object id it was handed as nonce;
/// - the collector, once records are indexed, with a list of record ids which are
///   mapped back to objects through the pending-record cache.
///
/// A callback is only accepted by an object waiting on that very system. Callbacks
/// that find the object locked, or still running the step that triggered them, are
/// retried in the background with the scheduler's bounded backoff.

use crate::{
    cache::PendingRecords,
    clients::OperatorNotifier,
    runtime::{
        engine::RestartPoint,
        lock::ObjectLocks,
        scheduler::{
            ContinuationRequest, ContinuationScheduler, Dispatch, DispatchOutcome, ResumeReason,
            SchedulerError,
        },
        task::record_result,
    },
    workflow::{
        storage::ObjectStorage,
        types::{ObjectStatus, WaitingFor, WorkflowObject},
    },
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{future::Future, sync::Arc};
use thiserror::Error;

/// Task result key under which a collector report that arrived early is kept
pub const INDEXED_RESULT: &str = "collector_indexed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    pub success: bool,
    #[serde(default)]
    pub recid: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Legacy ingestion result; `nonce` is the object id sent with the upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadCallback {
    pub nonce: i64,
    pub results: Vec<UploadResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorCallback {
    pub record_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadOutcome {
    /// The result was written to the object
    Applied {
        object_id: i64,
        status: ObjectStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        continuation: Option<DispatchOutcome>,
    },
    /// The object is busy; the result is applied in the background once it waits
    Deferred { object_id: i64 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectorOutcome {
    /// Objects a continuation was queued for
    pub resumed: Vec<i64>,
    /// Objects that had not reached the collector wait yet; they will pass it
    pub recorded: Vec<i64>,
    /// Objects that were busy; retried in the background
    pub deferred: Vec<i64>,
    /// Record ids nothing was waiting for
    pub unknown: Vec<i64>,
}

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("object {0} not found")]
    NotFound(i64),

    #[error("stale callback for object {object_id} ({status}{})", waiting_on(.waiting_for))]
    Stale {
        object_id: i64,
        status: ObjectStatus,
        waiting_for: Option<WaitingFor>,
    },

    #[error("malformed callback: {0}")]
    Malformed(String),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

fn waiting_on(waiting_for: &Option<WaitingFor>) -> String {
    match waiting_for {
        Some(on) => format!(" on {}", on),
        None => String::new(),
    }
}

fn warn_stale(what: &str, object: &WorkflowObject) {
    tracing::warn!(
        "⚠️ Stale {} callback for object {} ({}{})",
        what,
        object.id,
        object.status,
        waiting_on(&object.extra_data.waiting_for)
    );
}

/// What a collector report did to one object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Collected {
    Resumed,
    Recorded,
    Stale,
}

#[derive(Clone)]
pub struct CallbackService {
    storage: ObjectStorage,
    locks: ObjectLocks,
    scheduler: ContinuationScheduler,
    pending: PendingRecords,
    notifier: Arc<dyn OperatorNotifier>,
}

impl CallbackService {
    pub fn new(
        storage: ObjectStorage,
        locks: ObjectLocks,
        scheduler: ContinuationScheduler,
        pending: PendingRecords,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Self {
        Self {
            storage,
            locks,
            scheduler,
            pending,
            notifier,
        }
    }

    /// Record the legacy ingestion result and continue or fail the object
    pub async fn upload(&self, callback: UploadCallback) -> Result<UploadOutcome, CallbackError> {
        let object_id = callback.nonce;
        let result = callback
            .results
            .into_iter()
            .next()
            .ok_or_else(|| CallbackError::Malformed("no results".to_string()))?;
        if result.success && result.recid.is_none() {
            return Err(CallbackError::Malformed(
                "successful result without recid".to_string(),
            ));
        }

        if let Some(outcome) = self.try_upload(object_id, &result).await? {
            return Ok(outcome);
        }

        tracing::info!("⏳ Upload callback for object {} arrived while it is busy", object_id);
        let service = self.clone();
        self.retry_in_background(object_id, "upload", move || {
            let service = service.clone();
            let result = result.clone();
            async move {
                service
                    .try_upload(object_id, &result)
                    .await
                    .map(|outcome| outcome.is_some())
            }
        });
        Ok(UploadOutcome::Deferred { object_id })
    }

    /// Continue every object waiting for one of the indexed records
    pub async fn collector(
        &self,
        callback: CollectorCallback,
    ) -> Result<CollectorOutcome, CallbackError> {
        let mut outcome = CollectorOutcome::default();

        for recid in callback.record_ids {
            let Some(object_id) = self.pending.take(recid).await else {
                tracing::debug!("🤷 No object waiting for record {}", recid);
                outcome.unknown.push(recid);
                continue;
            };

            let collected = match self.try_collect(object_id, recid).await {
                Ok(collected) => collected,
                Err(e) => {
                    // Keep the association for a later report
                    self.pending.remember(recid, object_id).await;
                    return Err(e);
                }
            };

            match collected {
                Some(Collected::Resumed) => outcome.resumed.push(object_id),
                Some(Collected::Recorded) => outcome.recorded.push(object_id),
                Some(Collected::Stale) => outcome.unknown.push(recid),
                None => {
                    let service = self.clone();
                    self.retry_in_background(object_id, "collector", move || {
                        let service = service.clone();
                        async move {
                            service
                                .try_collect(object_id, recid)
                                .await
                                .map(|collected| collected.is_some())
                        }
                    });
                    outcome.deferred.push(object_id);
                }
            }
        }

        tracing::info!(
            "📚 Collector callback: {} resumed, {} recorded, {} deferred, {} unknown",
            outcome.resumed.len(),
            outcome.recorded.len(),
            outcome.deferred.len(),
            outcome.unknown.len()
        );
        Ok(outcome)
    }

    /// Apply an upload result under the object's lock; None while the object is busy
    async fn try_upload(
        &self,
        object_id: i64,
        result: &UploadResult,
    ) -> Result<Option<UploadOutcome>, CallbackError> {
        let Some(guard) = self.locks.try_acquire(object_id).await? else {
            return Ok(None);
        };
        let applied = self.apply_upload(object_id, result).await;
        if let Err(e) = self.locks.release(guard).await {
            tracing::warn!("⚠️ Failed to release lock for object {}: {}", object_id, e);
        }
        let Some(object) = applied? else {
            return Ok(None);
        };

        let continuation = match object.status {
            ObjectStatus::Error => None,
            _ => Some(self.resume(object_id).await?),
        };
        Ok(Some(UploadOutcome::Applied {
            object_id,
            status: object.status,
            continuation,
        }))
    }

    async fn apply_upload(
        &self,
        object_id: i64,
        result: &UploadResult,
    ) -> Result<Option<WorkflowObject>, CallbackError> {
        let mut object = self.load(object_id).await?;

        if object.status == ObjectStatus::Running {
            return Ok(None);
        }
        if !object.is_waiting_for(WaitingFor::Upload) {
            warn_stale("upload", &object);
            return Err(CallbackError::Stale {
                object_id,
                status: object.status,
                waiting_for: object.extra_data.waiting_for,
            });
        }

        match (result.success, result.recid) {
            (true, Some(recid)) => {
                tracing::info!("📬 Object {} ingested as record {}", object_id, recid);
                object.extra_data.recid = Some(recid);
                object.extra_data.waiting_for = Some(WaitingFor::Continuation);
                self.storage.save(&mut object).await?;
                self.pending.remember(recid, object_id).await;
            }
            _ => {
                let reason = result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "no error message".to_string());
                self.notifier
                    .notify(
                        &format!("Legacy upload failed for object {}", object_id),
                        &reason,
                    )
                    .await;
                object.mark_error(format!("legacy upload failed: {}", reason));
                self.storage.save(&mut object).await?;
            }
        }

        Ok(Some(object))
    }

    /// Apply a collector report under the object's lock; None while the object is busy
    async fn try_collect(
        &self,
        object_id: i64,
        recid: i64,
    ) -> Result<Option<Collected>, CallbackError> {
        let Some(guard) = self.locks.try_acquire(object_id).await? else {
            return Ok(None);
        };
        let applied = self.apply_collect(object_id, recid).await;
        if let Err(e) = self.locks.release(guard).await {
            tracing::warn!("⚠️ Failed to release lock for object {}: {}", object_id, e);
        }
        let collected = applied?;

        if collected == Some(Collected::Resumed) {
            self.resume(object_id).await?;
        }
        Ok(collected)
    }

    async fn apply_collect(
        &self,
        object_id: i64,
        recid: i64,
    ) -> Result<Option<Collected>, CallbackError> {
        let mut object = self.load(object_id).await?;

        if object.status == ObjectStatus::Running {
            return Ok(None);
        }

        if object.is_waiting_for(WaitingFor::Collector) {
            object.extra_data.waiting_for = Some(WaitingFor::Continuation);
            self.storage.save(&mut object).await?;
            return Ok(Some(Collected::Resumed));
        }

        // Uploaded, but the continuation has not reached the collector wait yet
        if object.is_waiting_for(WaitingFor::Continuation) && object.extra_data.recid == Some(recid)
        {
            tracing::info!(
                "📚 Record {} indexed before object {} waited for it",
                recid,
                object_id
            );
            record_result(
                &mut object,
                INDEXED_RESULT,
                json!({ "recid": recid, "indexed_at": Utc::now().to_rfc3339() }),
            );
            self.storage.save(&mut object).await?;
            return Ok(Some(Collected::Recorded));
        }

        warn_stale("collector", &object);
        Ok(Some(Collected::Stale))
    }

    async fn load(&self, object_id: i64) -> Result<WorkflowObject, CallbackError> {
        self.storage
            .get(object_id)
            .await?
            .ok_or(CallbackError::NotFound(object_id))
    }

    async fn resume(&self, object_id: i64) -> Result<DispatchOutcome, CallbackError> {
        let outcome = self
            .scheduler
            .dispatch(
                ContinuationRequest::new(
                    object_id,
                    ResumeReason::ExternalCallback,
                    RestartPoint::ContinueNext,
                ),
                Dispatch::Deferred,
            )
            .await?;
        Ok(outcome)
    }

    /// Retry `attempt` until it reports done, with the scheduler's backoff and
    /// attempt limit; the operator is notified when it gives up
    fn retry_in_background<F, Fut>(&self, object_id: i64, what: &'static str, mut attempt: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<bool, CallbackError>> + Send + 'static,
    {
        let scheduler = self.scheduler.clone();
        let notifier = Arc::clone(&self.notifier);
        let in_flight = scheduler.track();

        tokio::spawn(async move {
            let _in_flight = in_flight;
            let max_attempts = scheduler.config().scheduler.max_requeue_attempts;

            for retry in 0..max_attempts {
                scheduler.note_requeued();
                tokio::time::sleep(scheduler.config().requeue_delay(retry)).await;

                match attempt().await {
                    Ok(true) => {
                        tracing::info!(
                            "✅ {} callback for object {} applied on retry {}",
                            what,
                            object_id,
                            retry + 1
                        );
                        return;
                    }
                    Ok(false) => continue,
                    Err(e) => {
                        tracing::error!(
                            "❌ {} callback for object {} failed on retry: {}",
                            what,
                            object_id,
                            e
                        );
                        scheduler.note_dropped();
                        return;
                    }
                }
            }

            tracing::error!(
                "🗑️ Dropping {} callback for object {} after {} attempts",
                what,
                object_id,
                max_attempts
            );
            scheduler.note_dropped();
            notifier
                .notify(
                    &format!("Dropped {} callback for object {}", what, object_id),
                    "object stayed busy for every retry",
                )
                .await;
        });
    }
}
