//! Bulk user sync worker.
//!
//! Drives person-level synchronization across the entire user population in
//! fixed-size batches, so each invocation stays within a bounded time budget
//! and an external driver can poll `process_batch` to completion.
//!
//! Mutual exclusion is a lease, not a bare flag: the lock holder refreshes an
//! expiry timestamp on every batch, so a crashed run self-clears after the
//! lease times out instead of wedging the worker forever.

use crate::db::pool::DbPool;
use crate::db::{self, settings};
use crate::error::SyncError;
use crate::models::sync_log;
use crate::models::user::{self, User, META_PERSON_UUID};
use crate::services::connection_sync;
use crate::services::crm_client::CrmClient;
use serde::{Deserialize, Serialize};

/// Default number of users processed per batch.
pub const DEFAULT_BATCH_SIZE: i64 = 10;

/// Lease duration; a run that stops refreshing reads as idle after this.
pub const LEASE_SECS: i64 = 10 * 60;

/// Settings key: JSON run-state blob.
const RUN_STATE_KEY: &str = "bulk_sync.run_state";

/// Settings key: Unix timestamp the current lease expires at.
const LEASE_KEY: &str = "bulk_sync.lease_expires_at";

/// Lifecycle of a bulk run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
}

/// Persisted state of a bulk run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkRunState {
    /// Total target user count captured at start.
    pub total: i64,

    /// Pagination offset for the next batch.
    pub offset: i64,

    /// Users attempted so far.
    pub processed: i64,

    pub success_count: i64,
    pub error_count: i64,

    pub started_at: i64,
    pub completed_at: Option<i64>,

    pub status: RunStatus,
}

/// Outcome of one `process_batch` invocation.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    /// Whether the run has finished (including stale-driver no-ops).
    pub completed: bool,

    /// Users attempted in this batch.
    pub processed: i64,

    pub success_count: i64,
    pub error_count: i64,
}

/// Whether a live run currently holds the lease.
pub async fn is_running(pool: &DbPool) -> Result<bool, SyncError> {
    let state: Option<BulkRunState> = settings::get_setting_json(pool, RUN_STATE_KEY).await?;
    let Some(state) = state else {
        return Ok(false);
    };
    if state.status != RunStatus::Running {
        return Ok(false);
    }

    let lease = settings::get_setting_i64(pool, LEASE_KEY).await?;
    Ok(matches!(lease, Some(expires_at) if expires_at > sync_log::now()))
}

/// Start a bulk run.
///
/// Rejected while a live run holds the lease; rejection does not reset the
/// in-flight run's progress. A run whose lease has expired is treated as
/// dead and replaced.
pub async fn start(pool: &DbPool) -> Result<BulkRunState, SyncError> {
    db::ensure_schema(pool)
        .await
        .map_err(|e| SyncError::schema_missing(e.to_string()))?;

    if is_running(pool).await? {
        return Err(SyncError::sync_in_progress(
            "A bulk user sync is already running; cancel it before starting another",
        ));
    }

    let total = user::count_users(pool).await?;
    let state = BulkRunState {
        total,
        offset: 0,
        processed: 0,
        success_count: 0,
        error_count: 0,
        started_at: sync_log::now(),
        completed_at: None,
        status: RunStatus::Running,
    };

    settings::set_setting_json(pool, RUN_STATE_KEY, &state).await?;
    refresh_lease(pool).await?;

    sync_log::log_operation(
        pool,
        "bulk_sync_start",
        "success",
        None,
        Some(format!("{} users to sync", total)),
        None,
    )
    .await?;

    Ok(state)
}

/// Process one batch of users at the current offset.
///
/// A stale driver (run cancelled, completed, or lease expired underneath it)
/// observes idle and declines to proceed: a no-op reporting `completed`,
/// not an error. Per-user failures are counted and logged, never abort the
/// batch.
pub async fn process_batch(
    pool: &DbPool,
    client: &CrmClient,
    batch_size: i64,
) -> Result<BatchOutcome, SyncError> {
    let state: Option<BulkRunState> = settings::get_setting_json(pool, RUN_STATE_KEY).await?;
    let mut state = match state {
        Some(s) if s.status == RunStatus::Running => s,
        _ => return Ok(noop_outcome()),
    };

    let lease = settings::get_setting_i64(pool, LEASE_KEY).await?;
    if !matches!(lease, Some(expires_at) if expires_at > sync_log::now()) {
        return Ok(noop_outcome());
    }

    refresh_lease(pool).await?;

    let batch_size = batch_size.max(1);
    let users = user::list_users(pool, state.offset, batch_size).await?;

    if users.is_empty() {
        complete_run(pool, &mut state).await?;
        return Ok(BatchOutcome {
            completed: true,
            processed: 0,
            success_count: 0,
            error_count: 0,
        });
    }

    let mut success_count = 0i64;
    let mut error_count = 0i64;

    for u in &users {
        match sync_user(pool, client, u).await {
            Ok(()) => success_count += 1,
            Err(e) => {
                log::warn!("bulk sync failed for user {} ({}): {}", u.id, u.email, e);
                let subject = u.id.to_string();
                sync_log::log_operation(
                    pool,
                    "person_sync",
                    "error",
                    Some(subject.as_str()),
                    Some(e.to_string()),
                    None,
                )
                .await?;
                error_count += 1;
            }
        }
    }

    let processed = users.len() as i64;
    state.processed += processed;
    state.success_count += success_count;
    state.error_count += error_count;
    state.offset += batch_size;

    let completed = state.offset >= state.total;
    if completed {
        complete_run(pool, &mut state).await?;
    } else {
        settings::set_setting_json(pool, RUN_STATE_KEY, &state).await?;
    }

    Ok(BatchOutcome {
        completed,
        processed,
        success_count,
        error_count,
    })
}

/// Cancel the current run. Idle is a no-op.
///
/// Cancellation only prevents the next batch from starting; it does not
/// reach into an in-flight remote call.
pub async fn cancel(pool: &DbPool) -> Result<(), SyncError> {
    let state: Option<BulkRunState> = settings::get_setting_json(pool, RUN_STATE_KEY).await?;

    if let Some(mut state) = state {
        if state.status == RunStatus::Running {
            state.status = RunStatus::Cancelled;
            state.completed_at = Some(sync_log::now());
            settings::set_setting_json(pool, RUN_STATE_KEY, &state).await?;

            sync_log::log_operation(
                pool,
                "bulk_sync_cancel",
                "success",
                None,
                Some(format!("{} of {} users processed", state.processed, state.total)),
                None,
            )
            .await?;
        }
    }

    settings::delete_setting(pool, LEASE_KEY).await?;

    Ok(())
}

/// State of the most recent run, if any.
pub async fn status(pool: &DbPool) -> Result<Option<BulkRunState>, SyncError> {
    settings::get_setting_json(pool, RUN_STATE_KEY).await
}

/// Sync a single user's connections: resolve the person by email first,
/// falling back to the stored person UUID when the email lookup fails.
async fn sync_user(pool: &DbPool, client: &CrmClient, u: &User) -> Result<(), SyncError> {
    let person_uuid = match client.get_person_uuid_by_email(&u.email).await {
        Ok(Some(uuid)) => {
            user::set_user_meta(pool, u.id, META_PERSON_UUID, &uuid).await?;
            uuid
        }
        Ok(None) | Err(_) => user::get_user_meta(pool, u.id, META_PERSON_UUID)
            .await?
            .ok_or_else(|| {
                SyncError::not_found_with_id("Person for user", u.id.to_string())
            })?,
    };

    connection_sync::sync_person_connections(pool, client, &person_uuid, Some(u.id)).await?;

    Ok(())
}

async fn refresh_lease(pool: &DbPool) -> Result<(), SyncError> {
    settings::set_setting_i64(pool, LEASE_KEY, sync_log::now() + LEASE_SECS).await
}

async fn complete_run(pool: &DbPool, state: &mut BulkRunState) -> Result<(), SyncError> {
    state.status = RunStatus::Completed;
    state.completed_at = Some(sync_log::now());
    settings::set_setting_json(pool, RUN_STATE_KEY, state).await?;
    settings::delete_setting(pool, LEASE_KEY).await?;

    sync_log::log_operation(
        pool,
        "bulk_sync_complete",
        if state.error_count == 0 { "success" } else { "error" },
        None,
        Some(format!(
            "{} users: {} ok, {} errors",
            state.processed, state.success_count, state.error_count
        )),
        None,
    )
    .await?;

    Ok(())
}

fn noop_outcome() -> BatchOutcome {
    BatchOutcome {
        completed: true,
        processed: 0,
        success_count: 0,
        error_count: 0,
    }
}
