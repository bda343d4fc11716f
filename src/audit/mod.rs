/// Append-only audit trail of curation decisions
///
/// Each entry pairs what the classifier predicted with what a human (or an automatic
/// rule) actually decided. Writing an entry never fails the caller: errors are logged
/// and dropped so the engine is never blocked by the audit store.

use crate::workflow::storage::{format_timestamp, parse_timestamp};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePool, Row};

/// Immutable decision record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub object_id: i64,
    /// Curator who decided; None for automatic decisions
    pub user_id: Option<String>,
    pub predicted_score: Option<f64>,
    pub predicted_decision: Option<String>,
    /// Decision actually taken (e.g. "accept_core", "reject")
    pub human_action: String,
    /// Where the decision came from ("holdingpen", "automatic")
    pub source: String,
    /// Action kind the decision resolved (e.g. "hep_approval")
    pub action_kind: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    pool: SqlitePool,
}

impl AuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append an entry; failures are logged and swallowed
    pub async fn record(&self, entry: &AuditEntry) {
        if let Err(e) = self.try_record(entry).await {
            tracing::warn!(
                "⚠️ Failed to write audit entry for object {} ({}): {}",
                entry.object_id,
                entry.action_kind,
                e
            );
        }
    }

    async fn try_record(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_entries
                (object_id, user_id, predicted_score, predicted_decision,
                 human_action, source, action_kind, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.object_id)
        .bind(&entry.user_id)
        .bind(entry.predicted_score)
        .bind(&entry.predicted_decision)
        .bind(&entry.human_action)
        .bind(&entry.source)
        .bind(&entry.action_kind)
        .bind(format_timestamp(entry.timestamp))
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "🧾 Audit: object {} {} -> {} ({})",
            entry.object_id,
            entry.action_kind,
            entry.human_action,
            entry.source
        );
        Ok(())
    }

    /// Entries for one object in insertion order
    pub async fn entries_for(&self, object_id: i64) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query("SELECT * FROM audit_entries WHERE object_id = ? ORDER BY id")
            .bind(object_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let timestamp: String = row.get("timestamp");
                Ok(AuditEntry {
                    object_id: row.get("object_id"),
                    user_id: row.get("user_id"),
                    predicted_score: row.get("predicted_score"),
                    predicted_decision: row.get("predicted_decision"),
                    human_action: row.get("human_action"),
                    source: row.get("source"),
                    action_kind: row.get("action_kind"),
                    timestamp: parse_timestamp(&timestamp)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database;

    fn entry(object_id: i64, action: &str) -> AuditEntry {
        AuditEntry {
            object_id,
            user_id: Some("curator@example.org".to_string()),
            predicted_score: Some(0.91),
            predicted_decision: Some("CORE".to_string()),
            human_action: action.to_string(),
            source: "holdingpen".to_string(),
            action_kind: "hep_approval".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn appends_in_order() {
        let log = AuditLog::new(database::in_memory().await.unwrap());
        log.record(&entry(1, "reject")).await;
        log.record(&entry(1, "accept_core")).await;
        log.record(&entry(2, "accept")).await;

        let entries = log.entries_for(1).await.unwrap();
        let actions: Vec<&str> = entries.iter().map(|e| e.human_action.as_str()).collect();
        assert_eq!(actions, vec!["reject", "accept_core"]);
        assert_eq!(entries[0].predicted_decision.as_deref(), Some("CORE"));
    }

    #[tokio::test]
    async fn write_failures_are_swallowed() {
        let pool = database::in_memory().await.unwrap();
        sqlx::query("DROP TABLE audit_entries").execute(&pool).await.unwrap();

        // Must return normally even though the table is gone
        AuditLog::new(pool).record(&entry(1, "accept")).await;
    }
}
