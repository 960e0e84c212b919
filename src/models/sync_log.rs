//! Rolling sync operation log.
//!
//! Every sync engine records its outcomes here for status display. The log
//! is bounded; old entries are pruned on every insert.

use crate::db::pool::DbPool;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum number of log entries to keep.
const MAX_LOG_ENTRIES: i64 = 50;

/// A recorded sync operation.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SyncLogEntry {
    pub id: i64,
    pub operation: String,
    pub status: String,
    /// Person UUID, user id, or other identifier the operation acted on.
    pub subject: Option<String>,
    pub message: Option<String>,
    pub duration_ms: Option<i64>,
    pub timestamp: i64,
}

/// Get the current Unix timestamp.
pub(crate) fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Record a sync operation and prune entries beyond the rolling window.
pub async fn log_operation(
    pool: &DbPool,
    operation: &str,
    status: &str,
    subject: Option<&str>,
    message: Option<String>,
    duration_ms: Option<i64>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO sync_log (operation, status, subject, message, duration_ms, timestamp)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(operation)
    .bind(status)
    .bind(subject)
    .bind(&message)
    .bind(duration_ms)
    .bind(now())
    .execute(pool)
    .await?;

    // Keep only the newest MAX_LOG_ENTRIES
    sqlx::query(
        r#"
        DELETE FROM sync_log WHERE id NOT IN (
            SELECT id FROM sync_log ORDER BY timestamp DESC, id DESC LIMIT ?
        )
        "#,
    )
    .bind(MAX_LOG_ENTRIES)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get recent sync log entries, newest first.
pub async fn get_recent(pool: &DbPool, limit: i64) -> Result<Vec<SyncLogEntry>, sqlx::Error> {
    sqlx::query_as::<_, SyncLogEntry>(
        "SELECT id, operation, status, subject, message, duration_ms, timestamp
         FROM sync_log ORDER BY timestamp DESC, id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
