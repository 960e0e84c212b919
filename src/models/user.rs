//! Local user directory and per-user metadata.
//!
//! The host identity provider owns accounts; this module mirrors the stable
//! identifiers the sync engines need (email, CRM person UUID, primary
//! organization choice) as rows plus key-value metadata.

use crate::db::pool::DbPool;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata key holding a user's CRM person UUID.
pub const META_PERSON_UUID: &str = "person_uuid";

/// Metadata key holding a user's chosen primary organization UUID.
pub const META_PRIMARY_ORG_UUID: &str = "primary_org_uuid";

/// A user known to the host identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub display_name: Option<String>,
    pub created_at: i64,
}

/// Create a user record, returning its id.
pub async fn create_user(
    pool: &DbPool,
    email: &str,
    display_name: Option<&str>,
) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        "INSERT INTO users (email, display_name) VALUES (?, ?) RETURNING id",
    )
    .bind(email)
    .bind(display_name)
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

/// Total number of users, the bulk sync target count.
pub async fn count_users(pool: &DbPool) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    Ok(row.0)
}

/// Fetch one batch of users at the given offset, in stable id order.
pub async fn list_users(pool: &DbPool, offset: i64, limit: i64) -> Result<Vec<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        "SELECT id, email, display_name, created_at FROM users ORDER BY id LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

/// Get a single metadata value for a user.
pub async fn get_user_meta(
    pool: &DbPool,
    user_id: i64,
    key: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT meta_value FROM user_meta WHERE user_id = ? AND meta_key = ?",
    )
    .bind(user_id)
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(value,)| value))
}

/// Set a metadata value for a user, overwriting any existing value.
pub async fn set_user_meta(
    pool: &DbPool,
    user_id: i64,
    key: &str,
    value: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO user_meta (user_id, meta_key, meta_value) VALUES (?, ?, ?)
         ON CONFLICT(user_id, meta_key) DO UPDATE SET meta_value = excluded.meta_value",
    )
    .bind(user_id)
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete a metadata key for a user. Absent keys are a no-op.
pub async fn delete_user_meta(pool: &DbPool, user_id: i64, key: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM user_meta WHERE user_id = ? AND meta_key = ?")
        .bind(user_id)
        .bind(key)
        .execute(pool)
        .await?;

    Ok(())
}
