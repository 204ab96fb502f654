//! Database repositories for data access layer
//!
//! `tenant_data/` holds the per-collection upsert writers used by the sync
//! orchestrator, `sync_status` the lease-backed status record and
//! `assignment_events` the queries of the assignment stream consumer.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use crmsync_core::BaseConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

// Synced tenant collections
pub mod tenant_data;
//
// Sync status record and lease
pub mod sync_status;
//
// Organization-assignment event consumer queries
pub mod assignment_events;
//
// Transaction utilities
pub mod transaction;

pub use assignment_events::PgAssignmentEventStore;
pub use sync_status::SyncStatusRepository;
pub use tenant_data::PgTenantDataStore;

/// Open the connection pool described by `config`.
pub async fn connect(config: &BaseConfig) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Database connected successfully"
    );
    Ok(pool)
}

/// Apply pending migrations from the workspace `migrations/` directory.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .context("Failed to load migrations")?;
    migrator
        .run(pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");
    Ok(())
}
