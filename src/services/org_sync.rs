//! Full-catalog organization sync engine.
//!
//! Pages through the remote organization collection and upserts every record
//! into the local cache, tracking created/updated/error counts. Exposed as an
//! on-demand operation and a recurring scheduled job.
//!
//! Concurrent runs are not locked out: upserts are idempotent and convergent,
//! so overlapping full syncs are wasteful but safe (last writer wins per row).

use crate::db::pool::DbPool;
use crate::db::{self, settings};
use crate::error::SyncError;
use crate::models::organization::{self, Organization, UpsertOutcome};
use crate::models::sync_log;
use crate::services::crm_client::{CrmClient, CrmOrganization, OrganizationPage};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time;

/// Default page size for the remote organization collection.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Default hard ceiling on fetched pages per run.
pub const DEFAULT_MAX_PAGES: u32 = 1000;

/// Default recurring sync interval (weekly).
pub const DEFAULT_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// Settings key: Unix timestamp of the last fully successful run.
const LAST_SYNC_AT_KEY: &str = "org_sync.last_sync_at";

/// Settings key: JSON stats blob of the most recent run.
const LAST_STATS_KEY: &str = "org_sync.last_stats";

/// Guards against duplicate background loop registration within a process.
static SCHEDULE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Organization sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgSyncConfig {
    /// Records requested per page.
    pub per_page: u32,

    /// Hard ceiling on pages fetched in one run, protecting against a
    /// misbehaving remote pagination cursor.
    pub max_pages: u32,

    /// Attempts per page fetch before the failure is terminal.
    pub retry_attempts: u32,

    /// Base delay for exponential backoff between attempts, in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Recurring background sync interval in seconds.
    pub interval_secs: u64,
}

impl Default for OrgSyncConfig {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

/// Counts accumulated over one full-catalog sync run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    /// Records observed across all fetched pages.
    pub total: i64,

    /// Records inserted for the first time.
    pub created: i64,

    /// Records that already had a local row.
    pub updated: i64,

    /// Page fetches and per-record upserts that failed.
    pub errors: i64,

    /// Pages fetched.
    pub pages: i64,
}

/// Run one full-catalog reconciliation.
///
/// A page fetch that fails after bounded retries increments the error count
/// and terminates the run early; already-upserted pages stay cached and a
/// re-run is safe. Per-record upsert failures are counted and isolated.
pub async fn sync_all(
    pool: &DbPool,
    client: &CrmClient,
    config: &OrgSyncConfig,
) -> Result<SyncStats, SyncError> {
    db::ensure_schema(pool)
        .await
        .map_err(|e| SyncError::schema_missing(e.to_string()))?;

    let start = Instant::now();
    let mut stats = SyncStats::default();
    let mut page = 1u32;
    let mut total_pages = 1u32;
    let mut aborted = false;

    loop {
        if page > config.max_pages {
            log::warn!(
                "organization sync hit the {}-page ceiling, terminating",
                config.max_pages
            );
            break;
        }

        let fetched = match fetch_page_with_retry(client, page, config).await {
            Ok(fetched) => fetched,
            Err(e) => {
                log::error!("organization page {} failed: {}", page, e);
                stats.errors += 1;
                aborted = true;
                break;
            }
        };

        stats.pages += 1;
        total_pages = fetched.total_pages;

        for org in fetched.organizations {
            stats.total += 1;
            let cached = to_cached(org, sync_log::now());
            match organization::upsert_organization(pool, &cached).await {
                Ok(UpsertOutcome::Created) => stats.created += 1,
                Ok(UpsertOutcome::Updated) => stats.updated += 1,
                Err(e) => {
                    log::warn!("failed to upsert organization {}: {}", cached.uuid, e);
                    stats.errors += 1;
                }
            }
        }

        if page >= total_pages {
            break;
        }
        page += 1;
    }

    let duration_ms = start.elapsed().as_millis() as i64;

    // Persist run statistics; the last-successful-sync timestamp only moves
    // on a run that walked every page.
    settings::set_setting_json(pool, LAST_STATS_KEY, &stats).await?;
    if !aborted {
        settings::set_setting_i64(pool, LAST_SYNC_AT_KEY, sync_log::now()).await?;
    }

    sync_log::log_operation(
        pool,
        "org_sync",
        if stats.errors == 0 { "success" } else { "error" },
        None,
        Some(format!(
            "{} orgs over {} pages: {} created, {} updated, {} errors",
            stats.total, stats.pages, stats.created, stats.updated, stats.errors
        )),
        Some(duration_ms),
    )
    .await?;

    Ok(stats)
}

/// Fetch one page, retrying transient remote failures with exponential
/// backoff before the error becomes terminal.
async fn fetch_page_with_retry(
    client: &CrmClient,
    page: u32,
    config: &OrgSyncConfig,
) -> Result<OrganizationPage, SyncError> {
    let attempts = config.retry_attempts.max(1);

    let mut delay = Duration::from_millis(config.retry_base_delay_ms);
    let mut attempt = 1u32;
    loop {
        match client.get_organizations_page(page, config.per_page).await {
            Ok(fetched) => return Ok(fetched),
            Err(e) if e.is_remote_failure() && attempt < attempts => {
                log::warn!(
                    "organization page {} attempt {}/{} failed: {}, retrying in {:?}",
                    page,
                    attempt,
                    attempts,
                    e,
                    delay
                );
                time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Unix timestamp of the last fully successful run, if any.
pub async fn last_sync_at(pool: &DbPool) -> Result<Option<i64>, SyncError> {
    settings::get_setting_i64(pool, LAST_SYNC_AT_KEY).await
}

/// Stats of the most recent run, if any.
pub async fn last_stats(pool: &DbPool) -> Result<Option<SyncStats>, SyncError> {
    settings::get_setting_json(pool, LAST_STATS_KEY).await
}

pub(crate) fn to_cached(org: CrmOrganization, synced_at: i64) -> Organization {
    Organization {
        uuid: org.uuid,
        legal_name: org.legal_name,
        legal_name_en: org.legal_name_en,
        legal_name_fr: org.legal_name_fr,
        alternate_name: org.alternate_name,
        org_type: org.org_type,
        slug: org.slug,
        description: org.description,
        identifying_number: org.identifying_number,
        people_count: org.people_count,
        parent_org_uuid: org.parent_org_uuid,
        remote_created_at: org.created_at,
        remote_updated_at: org.updated_at,
        synced_at,
    }
}

/// Commands accepted by the background sync loop.
#[derive(Debug)]
pub enum SyncCommand {
    /// Trigger an immediate full sync.
    TriggerSync,

    /// Stop the background loop.
    Stop,
}

/// Lightweight handle for controlling the background sync loop.
#[derive(Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    /// Trigger an immediate full sync.
    pub async fn trigger_sync(&self) -> Result<(), SyncError> {
        self.command_tx
            .send(SyncCommand::TriggerSync)
            .await
            .map_err(|_| SyncError::internal("Background sync loop not running"))
    }

    /// Stop the background loop and release the schedule registration.
    pub async fn stop(&self) -> Result<(), SyncError> {
        self.command_tx
            .send(SyncCommand::Stop)
            .await
            .map_err(|_| SyncError::internal("Background sync loop not running"))
    }
}

/// Start the recurring background sync loop.
///
/// Registration is idempotent: a second call while a loop is live is
/// rejected rather than spawning a duplicate recurring job. [`SyncHandle::stop`]
/// releases the registration.
pub fn start_background(
    pool: DbPool,
    client: CrmClient,
    config: OrgSyncConfig,
) -> Result<SyncHandle, SyncError> {
    if SCHEDULE_ACTIVE
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(SyncError::sync_in_progress(
            "Background organization sync is already scheduled",
        ));
    }

    let (tx, mut rx) = mpsc::channel::<SyncCommand>(16);

    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(config.interval_secs.max(1)));
        // Consume the first (immediate) tick; the schedule fires after one
        // full interval, on-demand runs go through TriggerSync.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    log::info!("running scheduled organization sync");
                    match sync_all(&pool, &client, &config).await {
                        Ok(stats) => log::info!(
                            "scheduled organization sync complete: {} orgs, {} errors",
                            stats.total, stats.errors
                        ),
                        Err(e) => log::error!("scheduled organization sync failed: {}", e),
                    }
                }
                cmd = rx.recv() => {
                    match cmd {
                        Some(SyncCommand::TriggerSync) => {
                            log::info!("manual organization sync triggered");
                            if let Err(e) = sync_all(&pool, &client, &config).await {
                                log::error!("manual organization sync failed: {}", e);
                            }
                        }
                        Some(SyncCommand::Stop) | None => {
                            log::info!("background organization sync stopping");
                            break;
                        }
                    }
                }
            }
        }

        SCHEDULE_ACTIVE.store(false, Ordering::SeqCst);
    });

    Ok(SyncHandle { command_tx: tx })
}
