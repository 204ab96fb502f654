//! Tenant sync orchestrator
//!
//! A sync moves a tenant's status through
//! `pending -> syncing(independent) -> syncing(dependent) -> completed`, with `failed`
//! reachable from either syncing state. The status row's lease is the only
//! mutual-exclusion primitive: it is taken before the essential phase and released
//! when the background phase completes or the essential phase fails.

mod background;
mod essential;
pub mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use crmsync_api_client::{WrapperApi, WrapperClient};
use crmsync_core::constants::SYNC_IN_PROGRESS_MESSAGE;
use crmsync_core::models::{CollectionOutcome, SyncCollection, SyncOutcome, TenantSyncStatus};
use crmsync_core::{AppError, SyncConfig};
use crmsync_db::{PgTenantDataStore, SyncStatusRepository, SyncStatusStore, TenantDataStore};
use crmsync_infra::RetryPolicy;
use sqlx::PgPool;
use uuid::Uuid;

pub use supervisor::{BackgroundState, BackgroundSupervisor};

/// Collaborators shared by the essential phase and the spawned background phase.
#[derive(Clone)]
pub(crate) struct SyncContext {
    api: Arc<dyn WrapperApi>,
    data: Arc<dyn TenantDataStore>,
    status: Arc<dyn SyncStatusStore>,
    retry: RetryPolicy,
}

impl SyncContext {
    /// Record a collection outcome. Status bookkeeping never fails a sync.
    async fn record(
        &self,
        tenant_id: &str,
        owner: &str,
        collection: SyncCollection,
        outcome: CollectionOutcome,
    ) {
        match self
            .status
            .record_collection(tenant_id, owner, collection, &outcome)
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                tenant_id = %tenant_id,
                owner = %owner,
                collection = %collection,
                "Sync lease not held, collection status not recorded"
            ),
            Err(e) => tracing::warn!(
                tenant_id = %tenant_id,
                collection = %collection,
                error = %e,
                "Failed to record collection status"
            ),
        }
    }
}

pub struct SyncOrchestrator {
    ctx: SyncContext,
    lock_ttl: chrono::Duration,
    background: BackgroundSupervisor,
}

impl SyncOrchestrator {
    pub fn new(
        api: Arc<dyn WrapperApi>,
        data: Arc<dyn TenantDataStore>,
        status: Arc<dyn SyncStatusStore>,
        retry: RetryPolicy,
        lock_ttl: Duration,
    ) -> Self {
        let lock_ttl = chrono::Duration::from_std(lock_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
        Self {
            ctx: SyncContext {
                api,
                data,
                status,
                retry,
            },
            lock_ttl,
            background: BackgroundSupervisor::new(),
        }
    }

    /// Orchestrator backed by the wrapper API over HTTP and PostgreSQL stores.
    pub fn from_config(config: &SyncConfig, pool: PgPool) -> anyhow::Result<Self> {
        let client = WrapperClient::from_config(config)?;
        Ok(Self::new(
            Arc::new(client),
            Arc::new(PgTenantDataStore::new(pool.clone())),
            Arc::new(SyncStatusRepository::new(pool)),
            RetryPolicy::new(config.retry.clone()),
            config.lock_ttl(),
        ))
    }

    fn new_owner() -> String {
        format!("sync-{}-{}", std::process::id(), Uuid::new_v4())
    }

    /// Sync a tenant's data with the caller's bearer token.
    ///
    /// Returns once the essential data is stored; the dependent collections are
    /// synced by a supervised background task. A tenant already synced returns
    /// without any upstream call. A tenant whose lease is held by a live run is
    /// rejected with [`SYNC_IN_PROGRESS_MESSAGE`]. Essential-phase failures are
    /// recorded on the status row and returned.
    #[tracing::instrument(skip(self, token), fields(tenant_id = %tenant_id))]
    pub async fn sync_tenant(&self, tenant_id: &str, token: &str) -> Result<SyncOutcome, AppError> {
        if tenant_id.trim().is_empty() {
            return Err(AppError::Validation("Tenant id is required".to_string()));
        }

        if let Some(status) = self.ctx.status.get(tenant_id).await? {
            if status.is_completed() {
                tracing::info!("Tenant already synced, skipping");
                return Ok(SyncOutcome::already_synced(status));
            }
        }

        self.ctx.status.get_or_create(tenant_id).await?;

        let owner = Self::new_owner();
        if self
            .ctx
            .status
            .try_acquire_lock(tenant_id, &owner, self.lock_ttl)
            .await?
            .is_none()
        {
            tracing::warn!("Sync lease held by another run");
            return Ok(SyncOutcome::rejected(SYNC_IN_PROGRESS_MESSAGE));
        }

        let essential = async {
            if !self.ctx.status.begin_attempt(tenant_id, &owner).await? {
                return Err(AppError::Conflict(format!(
                    "Sync lease for tenant {} was lost before the attempt started",
                    tenant_id
                )));
            }
            self.ctx.run_essential(tenant_id, token, &owner).await
        };

        let stats = match essential.await {
            Ok(stats) => stats,
            Err(e) => {
                self.fail(tenant_id, &owner, &e).await;
                return Err(e);
            }
        };

        let ctx = self.ctx.clone();
        self.background.spawn(
            tenant_id,
            ctx.run_background(tenant_id.to_string(), token.to_string(), owner),
        );

        Ok(SyncOutcome::started(stats))
    }

    async fn fail(&self, tenant_id: &str, owner: &str, error: &AppError) {
        let kind = error.kind();
        tracing::error!(
            tenant_id = %tenant_id,
            error = %error,
            error_code = kind.as_str(),
            "Essential sync failed"
        );
        let reason = error.to_string();
        self.ctx
            .record_essential_failure(tenant_id, owner, &reason)
            .await;
        match self
            .ctx
            .status
            .mark_failed(tenant_id, owner, &reason, kind)
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::warn!(tenant_id = %tenant_id, "Sync lease lost before failure was recorded"),
            Err(e) => tracing::error!(tenant_id = %tenant_id, error = %e, "Failed to mark sync failed"),
        }
    }

    /// The persisted sync status of a tenant.
    pub async fn sync_status(&self, tenant_id: &str) -> Result<Option<TenantSyncStatus>, AppError> {
        self.ctx.status.get(tenant_id).await
    }

    /// Return a tenant's status to `pending` so the next call performs a full sync.
    /// Refused with `Conflict` while a live run holds the lease.
    #[tracing::instrument(skip(self))]
    pub async fn reset_sync_status(
        &self,
        tenant_id: &str,
    ) -> Result<Option<TenantSyncStatus>, AppError> {
        let status = self.ctx.status.reset(tenant_id).await?;
        if status.is_some() {
            tracing::info!(tenant_id = %tenant_id, "Sync status reset");
        }
        Ok(status)
    }

    pub fn background_state(&self, tenant_id: &str) -> Option<BackgroundState> {
        self.background.state(tenant_id)
    }

    /// Wait for the tenant's background run, if one was started by this orchestrator.
    pub async fn wait_for_background(&self, tenant_id: &str) -> Option<BackgroundState> {
        self.background.wait(tenant_id).await
    }

    /// Wait for every background run still in flight.
    pub async fn shutdown(&self) {
        self.background.drain().await;
    }
}
