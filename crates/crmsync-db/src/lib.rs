//! CRM Sync Database Layer
//!
//! PostgreSQL repositories for the synced tenant collections, the sync-status
//! lease and the assignment event store, plus the store traits the orchestrator
//! and the event consumer are written against.

pub mod db;
pub mod store_traits;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

// Re-exports: repositories
pub use db::{
    connect, run_migrations, PgAssignmentEventStore, PgTenantDataStore, SyncStatusRepository,
};

// Re-exports: Transaction utilities
pub use db::transaction::with_transaction;

// Re-exports: store traits
pub use store_traits::{
    AssignmentEventStore, EssentialData, LinkStats, SyncStatusStore, TenantDataStore,
};
