//! Service layer: the CRM client and the sync engines built on it.

pub mod bulk_sync;
pub mod connection_sync;
pub mod crm_client;
pub mod org_sync;

pub use crm_client::{CrmClient, CrmClientConfig};
pub use org_sync::{OrgSyncConfig, SyncHandle};
