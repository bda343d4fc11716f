/// Holdingpen service facade
///
/// Wires storage, registry, engine, scheduler and the action/callback services
/// together around one SQLite pool, and exposes the entry points that create and
/// restart objects. The HTTP layer and the tests both drive the engine through it.

use crate::{
    audit::AuditLog,
    cache::{KeyValueStore, MemoryKeyValueStore, PendingRecords, SqliteKeyValueStore},
    clients::{
        Classifier, DisabledClassifier, HttpClassifier, HttpPublisher, LoggingPublisher,
        OperatorNotifier, Publisher, TracingNotifier,
    },
    config::Config,
    runtime::{
        actions::ActionService,
        callbacks::CallbackService,
        diagnoser::ErrorChainDiagnoser,
        engine::{ExecutionEngine, RestartPoint},
        lock::ObjectLocks,
        scheduler::{
            ContinuationRequest, ContinuationScheduler, Dispatch, DispatchOutcome, ResumeReason,
            SchedulerError,
        },
        task::TaskContext,
    },
    workflow::{
        registry::WorkflowRegistry,
        storage::ObjectStorage,
        types::{NewObject, ObjectStatus, WorkflowObject},
    },
};
use anyhow::Result;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use thiserror::Error;

/// External systems the holdingpen talks to
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn Classifier>,
    pub publisher: Arc<dyn Publisher>,
    pub notifier: Arc<dyn OperatorNotifier>,
    pub cache: Arc<dyn KeyValueStore>,
}

impl Collaborators {
    /// HTTP clients for every configured endpoint, local fallbacks otherwise; the
    /// cache lives in the holdingpen database
    pub fn from_config(config: &Config, pool: &SqlitePool) -> Result<Self> {
        let timeout = config.task_timeout();

        let classifier: Arc<dyn Classifier> = match &config.services.classifier_url {
            Some(url) => {
                tracing::info!("🔮 Relevance classifier at {}", url);
                Arc::new(HttpClassifier::new(url.clone(), timeout)?)
            }
            None => {
                tracing::warn!("⚠️ No classifier configured, predictions disabled");
                Arc::new(DisabledClassifier)
            }
        };

        let publisher: Arc<dyn Publisher> = match &config.services.publisher_url {
            Some(url) => {
                tracing::info!("📤 Legacy upload endpoint at {}", url);
                Arc::new(HttpPublisher::new(url.clone(), timeout)?)
            }
            None => {
                tracing::warn!("⚠️ No legacy upload endpoint configured, uploads are logged only");
                Arc::new(LoggingPublisher)
            }
        };

        Ok(Self {
            classifier,
            publisher,
            notifier: Arc::new(TracingNotifier),
            cache: Arc::new(SqliteKeyValueStore::new(pool.clone())),
        })
    }

    /// Local stand-ins for every external system
    pub fn offline() -> Self {
        Self {
            classifier: Arc::new(DisabledClassifier),
            publisher: Arc::new(LoggingPublisher),
            notifier: Arc::new(TracingNotifier),
            cache: Arc::new(MemoryKeyValueStore::new()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown workflow kind '{0}'")]
    UnknownWorkflow(String),

    #[error("object {0} not found")]
    NotFound(i64),

    #[error("object {object_id} cannot be restarted ({status})")]
    NotRestartable { object_id: i64, status: ObjectStatus },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub object: WorkflowObject,
    pub continuation: DispatchOutcome,
}

/// Every component of a running holdingpen
#[derive(Clone)]
pub struct Holdingpen {
    pub config: Config,
    pub storage: ObjectStorage,
    pub registry: Arc<WorkflowRegistry>,
    pub scheduler: ContinuationScheduler,
    pub actions: ActionService,
    pub callbacks: CallbackService,
    pub diagnoser: ErrorChainDiagnoser,
    pub audit: AuditLog,
    pub pending: PendingRecords,
}

impl Holdingpen {
    /// Assemble the components; workers are not started
    pub fn new(
        pool: SqlitePool,
        registry: WorkflowRegistry,
        collaborators: Collaborators,
        config: Config,
    ) -> Self {
        let registry = Arc::new(registry);
        let storage = ObjectStorage::new(pool.clone());
        let locks = ObjectLocks::new(pool.clone(), config.lock_ttl());
        let audit = AuditLog::new(pool);
        let pending = PendingRecords::new(collaborators.cache, config.pending_ttl());

        let context = TaskContext {
            storage: storage.clone(),
            classifier: collaborators.classifier,
            publisher: collaborators.publisher,
            pending: pending.clone(),
            audit: audit.clone(),
            callback_base_url: config.services.callback_base_url.clone(),
        };
        let engine = ExecutionEngine::new(Arc::clone(&registry), context, config.task_timeout());
        let scheduler = ContinuationScheduler::new(engine, locks.clone(), config.clone());

        let actions = ActionService::new(
            storage.clone(),
            Arc::clone(&registry),
            locks.clone(),
            audit.clone(),
            scheduler.clone(),
        );
        let callbacks = CallbackService::new(
            storage.clone(),
            locks,
            scheduler.clone(),
            pending.clone(),
            collaborators.notifier,
        );

        Self {
            config,
            diagnoser: ErrorChainDiagnoser::new(storage.clone()),
            storage,
            registry,
            scheduler,
            actions,
            callbacks,
            audit,
            pending,
        }
    }

    /// Create an object and start it
    pub async fn submit(
        &self,
        new: NewObject,
        dispatch: Dispatch,
    ) -> Result<SubmitOutcome, ServiceError> {
        if !self.registry.contains(&new.workflow_kind) {
            return Err(ServiceError::UnknownWorkflow(new.workflow_kind));
        }

        let object = self.storage.create(new).await?;
        tracing::info!("📥 Submitted object {} ({})", object.id, object.workflow_kind);

        let continuation = self
            .scheduler
            .dispatch(
                ContinuationRequest::new(object.id, ResumeReason::Start, RestartPoint::ContinueNext),
                dispatch,
            )
            .await?;

        Ok(SubmitOutcome {
            object,
            continuation,
        })
    }

    /// Operator restart of a stuck, failed or suspended object
    pub async fn restart(
        &self,
        object_id: i64,
        restart: RestartPoint,
        dispatch: Dispatch,
    ) -> Result<DispatchOutcome, ServiceError> {
        let object = self
            .storage
            .get(object_id)
            .await?
            .ok_or(ServiceError::NotFound(object_id))?;

        if !object.can_resume_for(ResumeReason::OperatorRestart) {
            return Err(ServiceError::NotRestartable {
                object_id,
                status: object.status,
            });
        }

        tracing::info!("🔧 Operator restart of object {} ({:?})", object_id, restart);
        let outcome = self
            .scheduler
            .dispatch(
                ContinuationRequest::new(object_id, ResumeReason::OperatorRestart, restart),
                dispatch,
            )
            .await?;
        Ok(outcome)
    }
}
