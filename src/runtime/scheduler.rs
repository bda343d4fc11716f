/// Continuation scheduler
///
/// Every engine run goes through here. A request to continue an object is either
/// run on the caller's task (inline) or queued for a pool of tokio workers
/// (deferred). In both cases the object's advisory lock is held for the whole run,
/// so one object is never driven by two runs at once. A request that finds the lock
/// taken is requeued with exponential backoff and dropped after a bounded number of
/// attempts. The lease is renewed by a heartbeat for as long as the run lasts.

use crate::{
    config::Config,
    runtime::{
        engine::{EngineError, ExecutionEngine, RestartPoint, RunReport},
        lock::ObjectLocks,
    },
    workflow::types::{ObjectStatus, WaitingFor, WorkflowObject},
};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};

/// Why an object is being continued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeReason {
    /// First run of a freshly created object
    Start,
    /// A curator resolved the pending action
    ActionResolved,
    /// An external system reported back
    ExternalCallback,
    /// Explicit operator intervention
    OperatorRestart,
}

impl ResumeReason {
    /// Whether an object in `status`, suspended on `waiting_for`, may be continued
    /// for this reason
    pub fn accepts(&self, status: ObjectStatus, waiting_for: Option<WaitingFor>) -> bool {
        match self {
            ResumeReason::Start => status == ObjectStatus::Created,
            ResumeReason::ActionResolved | ResumeReason::ExternalCallback => {
                status == ObjectStatus::Waiting && waiting_for == Some(WaitingFor::Continuation)
            }
            ResumeReason::OperatorRestart => matches!(
                status,
                ObjectStatus::Error
                    | ObjectStatus::Running
                    | ObjectStatus::Halted
                    | ObjectStatus::Waiting
            ),
        }
    }
}

impl WorkflowObject {
    pub fn can_resume_for(&self, reason: ResumeReason) -> bool {
        reason.accepts(self.status, self.extra_data.waiting_for)
    }
}

/// Run on the caller's task or hand off to the worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispatch {
    Inline,
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationRequest {
    pub object_id: i64,
    pub reason: ResumeReason,
    pub restart: RestartPoint,
    /// Lock-contention requeues so far
    pub attempt: u32,
}

impl ContinuationRequest {
    pub fn new(object_id: i64, reason: ResumeReason, restart: RestartPoint) -> Self {
        Self {
            object_id,
            reason,
            restart,
            attempt: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Handed to the worker pool
    Queued,
    /// Ran inline to the given report
    Ran(RunReport),
    /// Not run because the object cannot resume for the given reason
    Skipped { reason: String },
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("object {0} not found")]
    NotFound(i64),

    #[error("object {0} is locked by another run")]
    LockContended(i64),

    #[error("continuation queue is closed")]
    QueueClosed,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Counters exposed for monitoring
#[derive(Debug, Default)]
pub struct SchedulerStats {
    executed: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub executed: u64,
    pub requeued: u64,
    pub dropped: u64,
}

impl SchedulerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            executed: self.executed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

struct Inner {
    engine: ExecutionEngine,
    locks: ObjectLocks,
    config: Config,
    sender: mpsc::UnboundedSender<ContinuationRequest>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<ContinuationRequest>>>,
    stats: SchedulerStats,
    /// Deferred requests accepted but not yet finished (requeues included)
    in_flight: AtomicUsize,
}

/// In-flight marker for work tracked by [`ContinuationScheduler::track`]
pub(crate) struct InFlight {
    scheduler: ContinuationScheduler,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.scheduler.finish();
    }
}

/// Cloneable handle to the scheduler and its queue
#[derive(Clone)]
pub struct ContinuationScheduler {
    inner: Arc<Inner>,
}

impl ContinuationScheduler {
    pub fn new(engine: ExecutionEngine, locks: ObjectLocks, config: Config) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(Inner {
                engine,
                locks,
                config,
                sender,
                receiver: Arc::new(Mutex::new(receiver)),
                stats: SchedulerStats::default(),
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.inner.engine
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Deferred requests still queued, running or waiting to be requeued
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Spawn the configured number of workers
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let workers = self.inner.config.scheduler.workers.max(1);
        tracing::info!("👷 Starting {} continuation workers", workers);

        (0..workers)
            .map(|worker_id| {
                let scheduler = self.clone();
                tokio::spawn(async move { scheduler.worker_loop(worker_id).await })
            })
            .collect()
    }

    /// Continue an object, inline or through the queue
    pub async fn dispatch(
        &self,
        request: ContinuationRequest,
        dispatch: Dispatch,
    ) -> Result<DispatchOutcome, SchedulerError> {
        match dispatch {
            Dispatch::Deferred => {
                self.enqueue(request)?;
                Ok(DispatchOutcome::Queued)
            }
            Dispatch::Inline => self.run_inline(request).await,
        }
    }

    /// Wait until no deferred request is in flight, false on timeout
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.in_flight() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    /// Count background work outside the queue as in flight until the guard drops
    pub(crate) fn track(&self) -> InFlight {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight {
            scheduler: self.clone(),
        }
    }

    pub(crate) fn note_requeued(&self) {
        self.inner.stats.requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_dropped(&self) {
        self.inner.stats.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn config(&self) -> &Config {
        &self.inner.config
    }

    fn enqueue(&self, request: ContinuationRequest) -> Result<(), SchedulerError> {
        tracing::debug!(
            "📥 Queued continuation for object {} ({:?})",
            request.object_id,
            request.reason
        );
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.inner.sender.send(request).is_err() {
            self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(SchedulerError::QueueClosed);
        }
        Ok(())
    }

    async fn run_inline(
        &self,
        mut request: ContinuationRequest,
    ) -> Result<DispatchOutcome, SchedulerError> {
        loop {
            if let Some(outcome) = self.execute(&request).await? {
                return Ok(outcome);
            }

            if request.attempt >= self.inner.config.scheduler.max_requeue_attempts {
                tracing::warn!(
                    "🔒 Object {} still locked after {} attempts",
                    request.object_id,
                    request.attempt
                );
                return Err(SchedulerError::LockContended(request.object_id));
            }

            let delay = self.inner.config.requeue_delay(request.attempt);
            request.attempt += 1;
            self.inner.stats.requeued.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(delay).await;
        }
    }

    async fn worker_loop(&self, worker_id: usize) {
        tracing::debug!("👷 Worker {} ready", worker_id);

        loop {
            let request = {
                let mut receiver = self.inner.receiver.lock().await;
                receiver.recv().await
            };
            let Some(request) = request else {
                break;
            };

            match self.execute(&request).await {
                Ok(Some(DispatchOutcome::Ran(report))) => {
                    tracing::debug!(
                        "👷 Worker {} finished object {}: {}",
                        worker_id,
                        report.object_id,
                        report.status
                    );
                    self.finish();
                }
                Ok(Some(_)) => self.finish(),
                Ok(None) => self.requeue(request),
                Err(e) => {
                    tracing::error!(
                        "❌ Continuation for object {} failed: {}",
                        request.object_id,
                        e
                    );
                    self.inner.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    self.finish();
                }
            }
        }

        tracing::debug!("👷 Worker {} stopped", worker_id);
    }

    fn finish(&self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Put a contended request back on the queue after its backoff delay
    fn requeue(&self, mut request: ContinuationRequest) {
        if request.attempt >= self.inner.config.scheduler.max_requeue_attempts {
            tracing::error!(
                "🗑️ Dropping continuation for object {} after {} attempts",
                request.object_id,
                request.attempt
            );
            self.inner.stats.dropped.fetch_add(1, Ordering::Relaxed);
            self.finish();
            return;
        }

        let delay = self.inner.config.requeue_delay(request.attempt);
        request.attempt += 1;
        self.inner.stats.requeued.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "🔁 Object {} locked, retrying in {:?} (attempt {})",
            request.object_id,
            delay,
            request.attempt
        );

        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if scheduler.inner.sender.send(request).is_err() {
                tracing::warn!("⚠️ Continuation queue closed during requeue");
                scheduler.finish();
            }
        });
    }

    /// Run one request under the object's lock; None when the lock is taken
    async fn execute(
        &self,
        request: &ContinuationRequest,
    ) -> Result<Option<DispatchOutcome>, SchedulerError> {
        let Some(guard) = self.inner.locks.try_acquire(request.object_id).await? else {
            return Ok(None);
        };

        let heartbeat = self.inner.locks.heartbeat(&guard);
        let result = self.run_locked(request).await;
        drop(heartbeat);

        if let Err(e) = self.inner.locks.release(guard).await {
            tracing::warn!(
                "⚠️ Failed to release lock for object {}: {}",
                request.object_id,
                e
            );
        }

        result.map(Some)
    }

    async fn run_locked(
        &self,
        request: &ContinuationRequest,
    ) -> Result<DispatchOutcome, SchedulerError> {
        let storage = &self.inner.engine.context().storage;
        let mut object = storage
            .get(request.object_id)
            .await?
            .ok_or(SchedulerError::NotFound(request.object_id))?;

        if !object.can_resume_for(request.reason) {
            let reason = match object.extra_data.waiting_for {
                Some(on) => format!(
                    "object {} is {} on {} and cannot resume for {:?}",
                    object.id, object.status, on, request.reason
                ),
                None => format!(
                    "object {} is {} and cannot resume for {:?}",
                    object.id, object.status, request.reason
                ),
            };
            tracing::warn!("⏭️ Skipping continuation: {}", reason);
            self.inner.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(DispatchOutcome::Skipped { reason });
        }

        let report = self.inner.engine.run(&mut object, request.restart).await?;
        self.inner.stats.executed.fetch_add(1, Ordering::Relaxed);
        Ok(DispatchOutcome::Ran(report))
    }
}
