//! Per-person connection sync engine.
//!
//! Reconciles one person's organizational memberships by rewriting the local
//! connection cache: mark all rows inactive, then upsert every connection the
//! remote currently reports as active. No diffing.
//!
//! The fetch outcome is checked before any cache mutation. A failed remote
//! call propagates as an error with the cache untouched; only a successful
//! (possibly empty) response may deactivate rows.

use crate::db;
use crate::db::pool::DbPool;
use crate::error::SyncError;
use crate::models::connection::{self, Connection};
use crate::models::organization;
use crate::models::sync_log;
use crate::models::user::{self, META_PRIMARY_ORG_UUID};
use crate::services::crm_client::{CrmClient, CrmConnection};
use crate::services::org_sync;
use std::time::Instant;

/// Reconcile one person's active connections against the remote.
///
/// Returns the number of connections now active locally. A successful empty
/// remote response leaves the person with an empty active set; a failed call
/// returns an error without touching the cache.
pub async fn sync_person_connections(
    pool: &DbPool,
    client: &CrmClient,
    person_uuid: &str,
    user_id: Option<i64>,
) -> Result<usize, SyncError> {
    db::ensure_schema(pool)
        .await
        .map_err(|e| SyncError::schema_missing(e.to_string()))?;

    let start = Instant::now();

    // Fetch first; deactivation only happens once the remote answered.
    let remote = client.get_person_connections(person_uuid).await.map_err(|e| {
        log::warn!("connection fetch for person {} failed: {}", person_uuid, e);
        e
    })?;

    connection::deactivate_all_for_person(pool, person_uuid).await?;

    let synced_at = sync_log::now();
    for conn in &remote {
        cache_organization_if_missing(pool, client, &conn.organization_uuid).await;
        connection::upsert_connection(pool, &to_cached(conn, person_uuid, user_id, synced_at))
            .await?;
    }

    if let Some(user_id) = user_id {
        ensure_primary_org(pool, user_id, person_uuid).await?;
    }

    sync_log::log_operation(
        pool,
        "person_sync",
        "success",
        Some(person_uuid),
        Some(format!("{} active connections", remote.len())),
        Some(start.elapsed().as_millis() as i64),
    )
    .await?;

    Ok(remote.len())
}

/// Opportunistically cache an organization referenced by a connection but
/// absent from the local store. Lookup failures are logged, never fatal to
/// the connection upsert.
async fn cache_organization_if_missing(pool: &DbPool, client: &CrmClient, org_uuid: &str) {
    match organization::get_organization(pool, org_uuid).await {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(e) => {
            log::warn!("organization lookup for {} failed: {}", org_uuid, e);
            return;
        }
    }

    match client.get_organization(org_uuid).await {
        Ok(Some(org)) => {
            let cached = org_sync::to_cached(org, sync_log::now());
            if let Err(e) = organization::upsert_organization(pool, &cached).await {
                log::warn!("failed to cache organization {}: {}", org_uuid, e);
            }
        }
        Ok(None) => {
            log::warn!("organization {} referenced by connection not found remotely", org_uuid);
        }
        Err(e) => {
            log::warn!("failed to fetch organization {}: {}", org_uuid, e);
        }
    }
}

/// Ensure the user's primary organization references an organization they
/// currently have an active connection to.
///
/// A stale or unset pointer is re-derived as the first active connection by
/// insertion order. Returns the primary organization UUID, `None` when the
/// person has no active connections (pointer cleared).
pub async fn ensure_primary_org(
    pool: &DbPool,
    user_id: i64,
    person_uuid: &str,
) -> Result<Option<String>, SyncError> {
    let active = connection::get_active_connections_for_person(pool, person_uuid).await?;

    if active.is_empty() {
        user::delete_user_meta(pool, user_id, META_PRIMARY_ORG_UUID).await?;
        return Ok(None);
    }

    let current = user::get_user_meta(pool, user_id, META_PRIMARY_ORG_UUID).await?;
    if let Some(current) = current {
        if active.iter().any(|c| c.org_uuid == current) {
            return Ok(Some(current));
        }
    }

    // First-by-insertion fallback
    let first = active[0].org_uuid.clone();
    user::set_user_meta(pool, user_id, META_PRIMARY_ORG_UUID, &first).await?;

    Ok(Some(first))
}

/// Create a connection remotely and mirror it into the cache.
///
/// The remote create is idempotent; `already_existed` is passed through.
/// When the remote response omits the connection UUID, the person is fully
/// re-synced instead of guessing a cache key.
pub async fn create_person_connection(
    pool: &DbPool,
    client: &CrmClient,
    person_uuid: &str,
    org_uuid: &str,
    connection_type: &str,
    user_id: Option<i64>,
) -> Result<bool, SyncError> {
    let result = client
        .create_connection(person_uuid, org_uuid, connection_type)
        .await?;

    if !result.success {
        return Err(SyncError::remote_api(format!(
            "CRM declined connection of person {} to organization {}",
            person_uuid, org_uuid
        )));
    }

    match &result.connection_uuid {
        Some(uuid) => {
            cache_organization_if_missing(pool, client, org_uuid).await;
            let conn = Connection {
                connection_uuid: uuid.clone(),
                person_uuid: person_uuid.to_string(),
                org_uuid: org_uuid.to_string(),
                user_id,
                connection_type: Some(connection_type.to_string()),
                description: None,
                starts_at: None,
                ends_at: None,
                is_active: true,
                synced_at: sync_log::now(),
            };
            connection::upsert_connection(pool, &conn).await?;

            if let Some(user_id) = user_id {
                ensure_primary_org(pool, user_id, person_uuid).await?;
            }
        }
        None => {
            sync_person_connections(pool, client, person_uuid, user_id).await?;
        }
    }

    Ok(result.already_existed)
}

/// Delete a connection remotely and deactivate the cached row.
pub async fn remove_person_connection(
    pool: &DbPool,
    client: &CrmClient,
    connection_uuid: &str,
) -> Result<bool, SyncError> {
    let deleted = client.delete_connection(connection_uuid).await?;

    if deleted {
        connection::deactivate_connection(pool, connection_uuid).await?;
    }

    Ok(deleted)
}

fn to_cached(
    conn: &CrmConnection,
    person_uuid: &str,
    user_id: Option<i64>,
    synced_at: i64,
) -> Connection {
    Connection {
        connection_uuid: conn.uuid.clone(),
        person_uuid: person_uuid.to_string(),
        org_uuid: conn.organization_uuid.clone(),
        user_id,
        connection_type: conn.connection_type.clone(),
        description: conn.description.clone(),
        starts_at: conn.starts_at.clone(),
        ends_at: conn.ends_at.clone(),
        is_active: true,
        synced_at,
    }
}
