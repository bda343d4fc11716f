/// Advisory per-object locks
///
/// A row in `object_locks` marks an object as being driven by one worker. Rows carry
/// an expiry so a lock held by a crashed worker lapses instead of blocking the object
/// forever. Acquisition never waits: callers decide whether to retry or requeue.
/// Holders of long runs keep their lease alive with [`ObjectLocks::heartbeat`].

use crate::workflow::storage::format_timestamp;
use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Proof of a held lock; hand it back to [`ObjectLocks::release`]
#[derive(Debug)]
#[must_use = "a held lock must be released"]
pub struct LockGuard {
    pub object_id: i64,
    owner: String,
}

/// Running lease renewal, stopped on drop
#[derive(Debug)]
pub struct Heartbeat(JoinHandle<()>);

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Debug, Clone)]
pub struct ObjectLocks {
    pool: SqlitePool,
    ttl: Duration,
}

impl ObjectLocks {
    pub fn new(pool: SqlitePool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    /// Take the lock for an object, None when another holder has it
    pub async fn try_acquire(&self, object_id: i64) -> Result<Option<LockGuard>> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| anyhow::anyhow!("Invalid lock ttl: {}", e))?;
        let owner = uuid::Uuid::new_v4().to_string();

        // Lapsed leases do not count
        sqlx::query("DELETE FROM object_locks WHERE object_id = ? AND expires_at <= ?")
            .bind(object_id)
            .bind(format_timestamp(now))
            .execute(&self.pool)
            .await?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO object_locks (object_id, owner, acquired_at, expires_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(object_id)
        .bind(&owner)
        .bind(format_timestamp(now))
        .bind(format_timestamp(now + ttl))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            tracing::debug!("🔒 Lock acquired for object {}", object_id);
            Ok(Some(LockGuard { object_id, owner }))
        } else {
            tracing::debug!("⏳ Object {} is locked by another worker", object_id);
            Ok(None)
        }
    }

    /// Release a held lock; a lease that already lapsed and was re-taken is left alone
    pub async fn release(&self, guard: LockGuard) -> Result<()> {
        sqlx::query("DELETE FROM object_locks WHERE object_id = ? AND owner = ?")
            .bind(guard.object_id)
            .bind(&guard.owner)
            .execute(&self.pool)
            .await?;

        tracing::debug!("🔓 Lock released for object {}", guard.object_id);
        Ok(())
    }

    /// Extend a held lease by a full ttl; false once the lease was lost
    pub async fn renew(&self, guard: &LockGuard) -> Result<bool> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| anyhow::anyhow!("Invalid lock ttl: {}", e))?;

        let result = sqlx::query(
            "UPDATE object_locks SET expires_at = ? WHERE object_id = ? AND owner = ?",
        )
        .bind(format_timestamp(Utc::now() + ttl))
        .bind(guard.object_id)
        .bind(&guard.owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Renew the lease every third of its ttl until the returned heartbeat drops
    pub fn heartbeat(&self, guard: &LockGuard) -> Heartbeat {
        let locks = self.clone();
        let guard = LockGuard {
            object_id: guard.object_id,
            owner: guard.owner.clone(),
        };
        let period = (self.ttl / 3).max(Duration::from_millis(10));

        Heartbeat(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match locks.renew(&guard).await {
                    Ok(true) => tracing::trace!("💓 Lease renewed for object {}", guard.object_id),
                    Ok(false) => {
                        tracing::error!(
                            "💔 Lease for object {} was lost while its run is in flight",
                            guard.object_id
                        );
                        break;
                    }
                    Err(e) => tracing::warn!(
                        "⚠️ Failed to renew lease for object {}: {}",
                        guard.object_id,
                        e
                    ),
                }
            }
        }))
    }

    pub async fn is_locked(&self, object_id: i64) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT object_id FROM object_locks WHERE object_id = ? AND expires_at > ?",
        )
        .bind(object_id)
        .bind(format_timestamp(Utc::now()))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }
}
