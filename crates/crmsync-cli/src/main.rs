//! crmsync: operator CLI for tenant data sync.
//!
//! Reads the same environment as the sync service (DATABASE_URL, WRAPPER_API_URL, ...).

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use crmsync_cli::{pick_token, print_json, StatusSummary, TOKEN_ENV};
use crmsync_core::SyncConfig;
use crmsync_infra::init_telemetry;
use crmsync_services::{BackgroundState, SyncOrchestrator};

#[derive(Parser)]
#[command(name = "crmsync", about = "Tenant data sync CLI")]
struct Cli {
    /// Apply pending database migrations first
    #[arg(long, global = true)]
    migrate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync a tenant from the wrapper API
    Sync {
        /// Tenant id
        tenant: String,
        /// Bearer token for the wrapper API (default: $WRAPPER_API_TOKEN)
        #[arg(long)]
        token: Option<String>,
    },
    /// Show a tenant's sync status
    Status {
        /// Tenant id
        tenant: String,
        /// Print the full status record
        #[arg(long)]
        full: bool,
    },
    /// Reset a tenant's sync status so the next sync runs in full
    Reset {
        /// Tenant id
        tenant: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = SyncConfig::from_env().context("Failed to load sync configuration")?;
    init_telemetry("crmsync-cli", config.base.json_logs())?;

    let pool = crmsync_db::connect(&config.base).await?;
    if cli.migrate {
        crmsync_db::run_migrations(&pool).await?;
    }
    let orchestrator = SyncOrchestrator::from_config(&config, pool.clone())?;

    let result = run(cli.command, &orchestrator).await;
    pool.close().await;
    result
}

async fn run(command: Commands, orchestrator: &SyncOrchestrator) -> anyhow::Result<()> {
    match command {
        Commands::Sync { tenant, token } => {
            let token = pick_token(token, std::env::var(TOKEN_ENV).ok())
                .ok_or_else(|| anyhow!("No token given; pass --token or set {}", TOKEN_ENV))?;

            let outcome = orchestrator.sync_tenant(&tenant, &token).await?;
            print_json(&outcome)?;

            // The background phase runs on this process's runtime, so the command
            // stays up until it has finished and released the lease.
            if outcome.background_sync_started == Some(true) {
                if let Some(BackgroundState::Failed(reason)) =
                    orchestrator.wait_for_background(&tenant).await
                {
                    tracing::error!(tenant_id = %tenant, reason = %reason, "Background sync failed");
                }
                if let Some(status) = orchestrator.sync_status(&tenant).await? {
                    print_json(&StatusSummary::from(&status))?;
                }
            }
        }
        Commands::Status { tenant, full } => {
            let status = orchestrator
                .sync_status(&tenant)
                .await?
                .ok_or_else(|| anyhow!("No sync status for tenant {}", tenant))?;
            if full {
                print_json(&status)?;
            } else {
                print_json(&StatusSummary::from(&status))?;
            }
        }
        Commands::Reset { tenant } => match orchestrator.reset_sync_status(&tenant).await? {
            Some(status) => print_json(&StatusSummary::from(&status))?,
            None => print_json(&serde_json::json!({
                "success": false,
                "error": format!("No sync status for tenant {}", tenant),
            }))?,
        },
    }
    Ok(())
}
