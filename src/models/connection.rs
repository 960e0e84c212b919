//! Cached person-organization connection model.
//!
//! The active set for a person is rewritten by the connection sync engine
//! ("mark all inactive, then upsert observed as active"), so rows are only
//! ever deactivated, never hard-deleted.

use crate::db::pool::DbPool;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A typed relationship between a person and an organization.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Connection {
    /// Remote-assigned connection UUID, immutable.
    pub connection_uuid: String,

    /// Person UUID in the CRM.
    pub person_uuid: String,

    /// Target organization UUID.
    pub org_uuid: String,

    /// Optional local user linkage.
    pub user_id: Option<i64>,

    /// Connection type/role (free text, e.g. "member", "primary contact").
    pub connection_type: Option<String>,

    pub description: Option<String>,

    /// Validity window start (ISO 8601).
    pub starts_at: Option<String>,

    /// Validity window end (ISO 8601).
    pub ends_at: Option<String>,

    pub is_active: bool,

    /// Unix timestamp of the last local sync of this row.
    pub synced_at: i64,
}

/// A connection joined with its cached organization, for "what organizations
/// is this person in" reads.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ConnectionWithOrganization {
    pub connection_uuid: String,
    pub person_uuid: String,
    pub org_uuid: String,
    pub connection_type: Option<String>,
    pub starts_at: Option<String>,
    pub ends_at: Option<String>,
    /// Legal name from the organizations table; `None` when the organization
    /// has not been cached yet.
    pub legal_name: Option<String>,
    pub alternate_name: Option<String>,
    pub org_type: Option<String>,
}

/// Upsert a connection keyed by its remote UUID.
pub async fn upsert_connection(pool: &DbPool, conn: &Connection) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO person_org_connections (
            connection_uuid, person_uuid, org_uuid, user_id, connection_type,
            description, starts_at, ends_at, is_active, synced_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(connection_uuid) DO UPDATE SET
            person_uuid = excluded.person_uuid,
            org_uuid = excluded.org_uuid,
            user_id = excluded.user_id,
            connection_type = excluded.connection_type,
            description = excluded.description,
            starts_at = excluded.starts_at,
            ends_at = excluded.ends_at,
            is_active = excluded.is_active,
            synced_at = excluded.synced_at
        "#,
    )
    .bind(&conn.connection_uuid)
    .bind(&conn.person_uuid)
    .bind(&conn.org_uuid)
    .bind(conn.user_id)
    .bind(&conn.connection_type)
    .bind(&conn.description)
    .bind(&conn.starts_at)
    .bind(&conn.ends_at)
    .bind(conn.is_active)
    .bind(conn.synced_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark every connection for a person inactive.
///
/// First step of per-person reconciliation. Callers must have confirmed the
/// remote fetch succeeded before invoking this; a failed call must never
/// trigger mass deactivation.
pub async fn deactivate_all_for_person(
    pool: &DbPool,
    person_uuid: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE person_org_connections SET is_active = 0 WHERE person_uuid = ?")
        .bind(person_uuid)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Deactivate a single connection (explicit removal path).
pub async fn deactivate_connection(
    pool: &DbPool,
    connection_uuid: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE person_org_connections SET is_active = 0 WHERE connection_uuid = ?",
    )
    .bind(connection_uuid)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Get a person's active connections joined with cached organization data,
/// in insertion order.
pub async fn get_active_connections_for_person(
    pool: &DbPool,
    person_uuid: &str,
) -> Result<Vec<ConnectionWithOrganization>, sqlx::Error> {
    sqlx::query_as::<_, ConnectionWithOrganization>(
        r#"
        SELECT c.connection_uuid, c.person_uuid, c.org_uuid, c.connection_type,
               c.starts_at, c.ends_at,
               o.legal_name, o.alternate_name, o.org_type
        FROM person_org_connections c
        LEFT JOIN organizations o ON o.uuid = c.org_uuid
        WHERE c.person_uuid = ? AND c.is_active = 1
        ORDER BY c.rowid
        "#,
    )
    .bind(person_uuid)
    .fetch_all(pool)
    .await
}

/// Look up a single cached connection by UUID.
pub async fn get_connection(
    pool: &DbPool,
    connection_uuid: &str,
) -> Result<Option<Connection>, sqlx::Error> {
    sqlx::query_as::<_, Connection>(
        "SELECT * FROM person_org_connections WHERE connection_uuid = ?",
    )
    .bind(connection_uuid)
    .fetch_optional(pool)
    .await
}
