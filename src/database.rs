/// SQLite database setup for the holdingpen
///
/// One database file ({data_dir}/holdingpen.db) holds workflow objects, advisory
/// object locks, the audit trail and the TTL key-value entries. Tests use a
/// single-connection in-memory pool.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;

/// Open (creating if missing) the holdingpen database and initialize its schema
pub async fn connect(data_dir: &str) -> Result<SqlitePool> {
    std::fs::create_dir_all(data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory '{}': {}", data_dir, e))?;
    let db_path = Path::new(data_dir).join("holdingpen.db");

    tracing::info!("🗄️ Opening holdingpen database: {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;

    init_schema(&pool).await?;

    tracing::info!("✅ Holdingpen database ready: {}", db_path.display());

    Ok(pool)
}

/// Private in-memory database, schema included
///
/// Limited to one connection: every new in-memory connection would otherwise see
/// its own empty database.
pub async fn in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create every table the engine needs. Safe to call multiple times.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_objects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            workflow_kind TEXT NOT NULL,
            status TEXT NOT NULL,
            data JSON NOT NULL,
            extra_data JSON NOT NULL,
            parent_id INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Advisory locks: one lease row per object being driven
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS object_locks (
            object_id INTEGER PRIMARY KEY,
            owner TEXT NOT NULL,
            acquired_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only audit trail of decisions
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            object_id INTEGER NOT NULL,
            user_id TEXT,
            predicted_score REAL,
            predicted_decision TEXT,
            human_action TEXT NOT NULL,
            source TEXT NOT NULL,
            action_kind TEXT NOT NULL,
            timestamp TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // TTL key-value entries, e.g. pending record associations
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_entries (
            key TEXT PRIMARY KEY,
            value JSON NOT NULL,
            expires_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_objects_status ON workflow_objects(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_object ON audit_entries(object_id)")
        .execute(pool)
        .await?;

    Ok(())
}
