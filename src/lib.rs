//! Organization and connection synchronization for a JSON:API CRM backend.
//!
//! This crate mirrors a CRM's organization catalog and per-person
//! organizational connections into a local SQLite cache so the host
//! application can serve lookups without a network round trip. The remote is
//! the source of truth; local writes exist only as a cache of it.
//!
//! The main pieces:
//!
//! - [`services::crm_client`]: JSON:API HTTP client with per-request bearer
//!   tokens.
//! - [`services::org_sync`]: paginated full-catalog organization sync, on
//!   demand or on a recurring background schedule.
//! - [`services::connection_sync`]: per-person connection reconciliation and
//!   primary-organization selection.
//! - [`services::bulk_sync`]: batched sync across the whole user directory,
//!   guarded by a lease so only one run drives at a time.
//! - [`db`] and [`models`]: SQLite pool, schema management, and typed access
//!   to the cached rows.

pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use error::SyncError;
