//! Long-running organization-assignment consumer.
//!
//! Configuration comes from the environment (see `ConsumerConfig::from_env`).
//! Stops after the batch in flight on Ctrl+C or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crmsync_core::ConsumerConfig;
use crmsync_db::PgAssignmentEventStore;
use crmsync_infra::{init_telemetry, shutdown_telemetry};
use crmsync_worker::{AssignmentConsumer, AssignmentEventHandler, RedisEventStream};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConsumerConfig::from_env().context("Failed to load consumer configuration")?;
    init_telemetry("org-assignment-consumer", config.base.json_logs())?;

    tracing::info!(
        environment = %config.base.environment,
        stream = %config.stream_key,
        group = %config.group_name,
        consumer = %config.consumer_name,
        "Starting organization assignment consumer"
    );

    let pool = crmsync_db::connect(&config.base).await?;
    crmsync_db::run_migrations(&pool).await?;

    let stream = RedisEventStream::new(&config).context("Invalid Redis URL")?;
    let handler = AssignmentEventHandler::new(
        Arc::new(PgAssignmentEventStore::new(pool.clone())),
        Duration::from_millis(config.org_retry_delay_ms),
    );
    let mut consumer = AssignmentConsumer::new(
        stream,
        handler,
        Duration::from_secs(config.error_backoff_secs),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let totals = consumer.run(shutdown_rx).await;
    tracing::info!(processed = totals.total(), "Consumer exited");

    pool.close().await;
    shutdown_telemetry().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        _ = terminate => tracing::info!("Received terminate signal"),
    }
    tracing::info!("Shutting down consumer...");
}
