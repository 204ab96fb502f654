//! CRM Sync Services Layer
//!
//! Hosts the tenant sync orchestrator. Binaries and the authentication flow build a
//! [`SyncOrchestrator`] with explicit collaborators (wrapper API, tenant data store,
//! sync status store) and call [`SyncOrchestrator::sync_tenant`].

pub mod sync;

pub use sync::{BackgroundState, BackgroundSupervisor, SyncOrchestrator};
