/// Key-value store abstraction with per-entry TTL
///
/// Holds short-lived associations the engine needs across callbacks, such as which
/// workflow object is waiting for a given legacy record id. Injected into the
/// components that need it rather than reached as global state. The SQLite store
/// keeps them across restarts; the in-memory one serves tests and offline runs.

use crate::workflow::storage::format_timestamp;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Minimal TTL key-value contract
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set(&self, key: &str, value: Value, ttl: Duration);

    /// Live value for the key, None when absent or expired
    async fn get(&self, key: &str) -> Option<Value>;

    /// Remove and return the live value for the key
    async fn take(&self, key: &str) -> Option<Value>;

    /// Drop expired entries, returning how many were removed
    async fn purge_expired(&self) -> usize;
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

/// In-process store backed by a RwLock'd HashMap
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
    }

    async fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    async fn take(&self, key: &str) -> Option<Value> {
        let entry = self.entries.write().await.remove(key)?;
        (entry.expires_at > Instant::now()).then_some(entry.value)
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}

/// Store on the holdingpen database, in the `kv_entries` table
///
/// Failures are logged and read as a miss: a lost association shows up as an
/// unknown record in the collector callback.
#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
}

impl SqliteKeyValueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn now() -> String {
        format_timestamp(Utc::now())
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let expires_at = match chrono::Duration::from_std(ttl) {
            Ok(ttl) => format_timestamp(Utc::now() + ttl),
            Err(e) => {
                tracing::warn!("⚠️ Invalid ttl for cache key '{}': {}", key, e);
                return;
            }
        };

        let result = sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value.to_string())
        .bind(expires_at)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!("⚠️ Failed to store cache key '{}': {}", key, e);
        }
    }

    async fn get(&self, key: &str) -> Option<Value> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM kv_entries WHERE key = ? AND expires_at > ?")
                .bind(key)
                .bind(Self::now())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| tracing::warn!("⚠️ Failed to read cache key '{}': {}", key, e))
                .ok()?;

        serde_json::from_str(&row?.0).ok()
    }

    async fn take(&self, key: &str) -> Option<Value> {
        let row: Option<(String, String)> =
            sqlx::query_as("DELETE FROM kv_entries WHERE key = ? RETURNING value, expires_at")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| tracing::warn!("⚠️ Failed to take cache key '{}': {}", key, e))
                .ok()?;

        let (value, expires_at) = row?;
        if expires_at <= Self::now() {
            return None;
        }
        serde_json::from_str(&value).ok()
    }

    async fn purge_expired(&self) -> usize {
        match sqlx::query("DELETE FROM kv_entries WHERE expires_at <= ?")
            .bind(Self::now())
            .execute(&self.pool)
            .await
        {
            Ok(result) => result.rows_affected() as usize,
            Err(e) => {
                tracing::warn!("⚠️ Failed to purge cache: {}", e);
                0
            }
        }
    }
}

/// Typed view over the store: legacy record id -> waiting object id
#[derive(Clone)]
pub struct PendingRecords {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl PendingRecords {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(recid: i64) -> String {
        format!("pending_record:{}", recid)
    }

    /// Remember that `object_id` waits for the collector to index `recid`
    pub async fn remember(&self, recid: i64, object_id: i64) {
        self.store
            .set(&Self::key(recid), Value::from(object_id), self.ttl)
            .await;
        tracing::debug!("📌 Pending record {} -> object {}", recid, object_id);
    }

    /// Consume the association for `recid`
    pub async fn take(&self, recid: i64) -> Option<i64> {
        self.store.take(&Self::key(recid)).await?.as_i64()
    }

    pub async fn purge_expired(&self) -> usize {
        self.store.purge_expired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let store = MemoryKeyValueStore::new();
        store.set("live", json!(1), Duration::from_secs(60)).await;
        store.set("dead", json!(2), Duration::ZERO).await;

        assert_eq!(store.get("live").await, Some(json!(1)));
        assert_eq!(store.get("dead").await, None);
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn sqlite_store_expires_and_purges() {
        let store = SqliteKeyValueStore::new(crate::database::in_memory().await.unwrap());
        store.set("live", json!({ "id": 1 }), Duration::from_secs(60)).await;
        store.set("dead", json!(2), Duration::ZERO).await;

        assert_eq!(store.get("live").await, Some(json!({ "id": 1 })));
        assert_eq!(store.get("dead").await, None);
        assert_eq!(store.take("dead").await, None);

        store.set("again", json!(3), Duration::ZERO).await;
        assert_eq!(store.purge_expired().await, 1);

        store.set("live", json!(4), Duration::from_secs(60)).await;
        assert_eq!(store.take("live").await, Some(json!(4)));
        assert_eq!(store.get("live").await, None);
    }

    #[tokio::test]
    async fn pending_records_survive_a_new_store_on_the_same_database() {
        let pool = crate::database::in_memory().await.unwrap();
        let ttl = Duration::from_secs(60);
        PendingRecords::new(Arc::new(SqliteKeyValueStore::new(pool.clone())), ttl)
            .remember(1234, 7)
            .await;

        let reopened = PendingRecords::new(Arc::new(SqliteKeyValueStore::new(pool)), ttl);
        assert_eq!(reopened.take(1234).await, Some(7));
        assert_eq!(reopened.take(1234).await, None);
    }

    #[tokio::test]
    async fn pending_records_are_consumed_once() {
        let pending = PendingRecords::new(
            Arc::new(MemoryKeyValueStore::new()),
            Duration::from_secs(60),
        );
        pending.remember(1234, 7).await;

        assert_eq!(pending.take(1234).await, Some(7));
        assert_eq!(pending.take(1234).await, None);
        assert_eq!(pending.take(999).await, None);
    }
}
