/// Periodic maintenance jobs on tokio-cron-scheduler
///
/// On the configured cron schedule the error-chain diagnoser runs over the store
/// and its chains are written to the log, and expired pending-record associations
/// are purged from the cache.

use crate::{
    cache::PendingRecords,
    runtime::diagnoser::{ChainReport, ErrorChainDiagnoser, RootCause},
};
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Result of one maintenance pass
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub chains: Vec<ChainReport>,
    pub purged_pending: usize,
}

pub struct ReportService {
    scheduler: Arc<RwLock<JobScheduler>>,
    job_uuid: Arc<RwLock<Option<Uuid>>>,
    diagnoser: ErrorChainDiagnoser,
    pending: PendingRecords,
    schedule: String,
}

impl ReportService {
    pub async fn new(
        diagnoser: ErrorChainDiagnoser,
        pending: PendingRecords,
        schedule: impl Into<String>,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            job_uuid: Arc::new(RwLock::new(None)),
            diagnoser,
            pending,
            schedule: schedule.into(),
        })
    }

    /// Register the report job and start ticking
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting report scheduler ({})", self.schedule);

        let diagnoser = self.diagnoser.clone();
        let pending = self.pending.clone();

        let job = Job::new_async(self.schedule.as_str(), move |_uuid, _l| {
            let diagnoser = diagnoser.clone();
            let pending = pending.clone();

            Box::pin(async move {
                tracing::debug!("🔔 Report job triggered");
                if let Err(e) = run_report(&diagnoser, &pending).await {
                    tracing::error!("❌ Report job failed: {}", e);
                }
            })
        })?;

        {
            let scheduler = self.scheduler.write().await;
            let uuid = scheduler.add(job).await?;
            *self.job_uuid.write().await = Some(uuid);
            scheduler.start().await?;
        }

        tracing::info!("✅ Report scheduler started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping report scheduler");

        if let Some(uuid) = self.job_uuid.write().await.take() {
            let scheduler = self.scheduler.read().await;
            if let Err(e) = scheduler.remove(&uuid).await {
                tracing::warn!("⚠️ Failed to remove report job: {}", e);
            }
        }

        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.shutdown().await?;
        }

        tracing::info!("✅ Report scheduler stopped");
        Ok(())
    }

    /// Run one maintenance pass immediately
    pub async fn run_once(&self) -> Result<ReportSummary> {
        run_report(&self.diagnoser, &self.pending).await
    }
}

async fn run_report(
    diagnoser: &ErrorChainDiagnoser,
    pending: &PendingRecords,
) -> Result<ReportSummary> {
    let chains = diagnoser.diagnose().await?;

    for report in &chains {
        match &report.root {
            RootCause::Object { id, status, message } => tracing::warn!(
                "🧱 Object {} blocked via {:?} on object {} ({}): {}",
                report.start,
                report.chain,
                id,
                status,
                message.as_deref().unwrap_or("-")
            ),
            RootCause::Missing { id } => tracing::warn!(
                "👻 Object {} blocked via {:?} on missing object {}",
                report.start,
                report.chain,
                id
            ),
            RootCause::CircularDependency { cycle } => tracing::error!(
                "🔁 Object {} is in a blocking cycle {:?}",
                report.start,
                cycle
            ),
        }
        if !report.other_blockers.is_empty() {
            tracing::debug!(
                "   Object {} is also blocked by {:?}",
                report.start,
                report.other_blockers
            );
        }
    }

    let purged_pending = pending.purge_expired().await;
    if purged_pending > 0 {
        tracing::info!("🧹 Purged {} expired pending records", purged_pending);
    }

    Ok(ReportSummary {
        chains,
        purged_pending,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::MemoryKeyValueStore,
        database,
        runtime::diagnoser::format_blocking,
        workflow::{storage::ObjectStorage, types::NewObject},
    };
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn run_once_reports_chains_and_purges_cache() {
        let storage = ObjectStorage::new(database::in_memory().await.unwrap());
        let blocker = storage
            .create(NewObject {
                workflow_kind: "article".to_string(),
                data: json!({}),
                parent_id: None,
            })
            .await
            .unwrap();
        let mut blocked = storage
            .create(NewObject {
                workflow_kind: "article".to_string(),
                data: json!({}),
                parent_id: None,
            })
            .await
            .unwrap();
        blocked.mark_error(format_blocking("duplicate", &[blocker.id]));
        storage.save(&mut blocked).await.unwrap();

        let pending = PendingRecords::new(Arc::new(MemoryKeyValueStore::new()), Duration::ZERO);
        pending.remember(55, blocked.id).await;

        let service = ReportService::new(ErrorChainDiagnoser::new(storage), pending, "0 0 * * * *")
            .await
            .unwrap();
        let summary = service.run_once().await.unwrap();

        assert_eq!(summary.purged_pending, 1);
        assert_eq!(summary.chains.len(), 1);
        assert_eq!(summary.chains[0].chain, vec![blocked.id, blocker.id]);
    }
}
