/// SQLite persistence layer for workflow objects
///
/// One row per WorkflowObject. The payload and the typed side-channel are stored as
/// JSON columns while id, kind and status stay queryable.

use crate::workflow::types::{ExtraData, NewObject, ObjectStatus, WorkflowObject};
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::{
    sqlite::{SqlitePool, SqliteRow},
    Row,
};

/// Fixed-width UTC timestamp, so stored values also compare correctly as text
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

/// SQLite-based workflow object store
#[derive(Debug, Clone)]
pub struct ObjectStorage {
    pool: SqlitePool,
}

impl ObjectStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new object in CREATED with an empty resume position
    pub async fn create(&self, new: NewObject) -> Result<WorkflowObject> {
        let now = Utc::now();
        let extra_data = ExtraData::default();

        let result = sqlx::query(
            r#"
            INSERT INTO workflow_objects
                (workflow_kind, status, data, extra_data, parent_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.workflow_kind)
        .bind(ObjectStatus::Created.as_str())
        .bind(serde_json::to_string(&new.data)?)
        .bind(serde_json::to_string(&extra_data)?)
        .bind(new.parent_id)
        .bind(format_timestamp(now))
        .bind(format_timestamp(now))
        .execute(&self.pool)
        .await?;

        let object = WorkflowObject {
            id: result.last_insert_rowid(),
            workflow_kind: new.workflow_kind,
            data: new.data,
            extra_data,
            status: ObjectStatus::Created,
            parent_id: new.parent_id,
            created_at: now,
            updated_at: now,
        };

        tracing::debug!("📝 Created workflow object {} ({})", object.id, object.workflow_kind);

        Ok(object)
    }

    /// Persist status, payload and side-channel; bumps `updated_at`
    pub async fn save(&self, object: &mut WorkflowObject) -> Result<()> {
        object.updated_at = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE workflow_objects
            SET status = ?, data = ?, extra_data = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(object.status.as_str())
        .bind(serde_json::to_string(&object.data)?)
        .bind(serde_json::to_string(&object.extra_data)?)
        .bind(format_timestamp(object.updated_at))
        .bind(object.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow::anyhow!("Workflow object not found: {}", object.id));
        }

        Ok(())
    }

    /// Retrieve an object by id
    pub async fn get(&self, id: i64) -> Result<Option<WorkflowObject>> {
        let row = sqlx::query("SELECT * FROM workflow_objects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(object_from_row).transpose()
    }

    /// List objects, optionally restricted to one status, newest first
    pub async fn list(&self, status: Option<ObjectStatus>) -> Result<Vec<WorkflowObject>> {
        let rows = match status {
            Some(status) => {
                sqlx::query("SELECT * FROM workflow_objects WHERE status = ? ORDER BY id DESC")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM workflow_objects ORDER BY id DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(object_from_row).collect()
    }

    /// Every object as of one read, for cross-object analysis
    pub async fn snapshot(&self) -> Result<Vec<WorkflowObject>> {
        let rows = sqlx::query("SELECT * FROM workflow_objects ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(object_from_row).collect()
    }

    /// Ids of unfinished objects of the same kind whose payload has `value` at
    /// the JSON path, excluding `exclude_id`
    pub async fn find_unfinished_matching(
        &self,
        workflow_kind: &str,
        json_path: &str,
        value: &Value,
        exclude_id: i64,
    ) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM workflow_objects
            WHERE workflow_kind = ?
              AND id != ?
              AND status NOT IN ('COMPLETED', 'ERROR')
              AND json_extract(data, ?) = json_extract(?, '$')
            ORDER BY id
            "#,
        )
        .bind(workflow_kind)
        .bind(exclude_id)
        .bind(json_path)
        .bind(serde_json::to_string(value)?)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get::<i64, _>("id")).collect())
    }
}

fn object_from_row(row: &SqliteRow) -> Result<WorkflowObject> {
    let status: String = row.get("status");
    let data: String = row.get("data");
    let extra_data: String = row.get("extra_data");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(WorkflowObject {
        id: row.get("id"),
        workflow_kind: row.get("workflow_kind"),
        data: serde_json::from_str(&data)?,
        extra_data: serde_json::from_str(&extra_data)?,
        status: status.parse().map_err(anyhow::Error::msg)?,
        parent_id: row.get("parent_id"),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}
