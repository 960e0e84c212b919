//! Scalar key-value settings store.
//!
//! Holds run-state keys that don't warrant their own table: last-sync
//! timestamps, last-sync stats blobs, and the bulk-run lease.

use crate::db::pool::DbPool;
use crate::error::SyncError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Get a setting value, `None` when the key has never been written.
pub async fn get_setting(pool: &DbPool, key: &str) -> Result<Option<String>, SyncError> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|(value,)| value))
}

/// Set a setting value, overwriting any existing value.
pub async fn set_setting(pool: &DbPool, key: &str, value: &str) -> Result<(), SyncError> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete a setting key. Deleting an absent key is a no-op.
pub async fn delete_setting(pool: &DbPool, key: &str) -> Result<(), SyncError> {
    sqlx::query("DELETE FROM settings WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;

    Ok(())
}

/// Get a setting parsed as an integer.
pub async fn get_setting_i64(pool: &DbPool, key: &str) -> Result<Option<i64>, SyncError> {
    Ok(get_setting(pool, key).await?.and_then(|v| v.parse().ok()))
}

/// Set an integer setting.
pub async fn set_setting_i64(pool: &DbPool, key: &str, value: i64) -> Result<(), SyncError> {
    set_setting(pool, key, &value.to_string()).await
}

/// Get a setting deserialized from its JSON blob.
pub async fn get_setting_json<T: DeserializeOwned>(
    pool: &DbPool,
    key: &str,
) -> Result<Option<T>, SyncError> {
    match get_setting(pool, key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Set a setting from a JSON-serializable value.
pub async fn set_setting_json<T: Serialize>(
    pool: &DbPool,
    key: &str,
    value: &T,
) -> Result<(), SyncError> {
    set_setting(pool, key, &serde_json::to_string(value)?).await
}
