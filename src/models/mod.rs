//! Data models for the local cache.
//!
//! These models represent the entities mirrored from the CRM into the local
//! SQLite database, plus the user directory and run-state bookkeeping.
//!
//! All models derive Serialize for status surfaces and FromRow for SQLx.

pub mod connection;
pub mod organization;
pub mod sync_log;
pub mod user;

// Re-exports for convenient access
pub use connection::{Connection, ConnectionWithOrganization};
pub use organization::{Organization, UpsertOutcome};
pub use sync_log::SyncLogEntry;
pub use user::User;
