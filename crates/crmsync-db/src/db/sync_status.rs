//! Sync status repository
//!
//! The lease lives on the status row itself (`locked_by`, `lock_expiry`). Every
//! lease check happens inside the `UPDATE ... WHERE` that changes it, so two
//! processes can never both observe a free lease and take it.

use async_trait::async_trait;
use chrono::Duration;
use crmsync_core::models::{
    CollectionOutcome, CollectionSyncEntry, SyncCollection, SyncPhase, TenantSyncStatus,
};
use crmsync_core::{AppError, SyncErrorKind};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};

use crate::store_traits::SyncStatusStore;

const STATUS_COLUMNS: &str = "id, tenant_id, status, phase, locked_by, lock_expiry, collections, \
     attempts, last_error, error_code, started_at, completed_at, duration_ms, created_at, updated_at";

/// Repository for the `tenant_sync_status` table
#[derive(Clone)]
pub struct SyncStatusRepository {
    pool: PgPool,
}

impl SyncStatusRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncStatusStore for SyncStatusRepository {
    #[tracing::instrument(skip(self), fields(db.table = "tenant_sync_status", db.operation = "select"))]
    async fn get(&self, tenant_id: &str) -> Result<Option<TenantSyncStatus>, AppError> {
        let status = sqlx::query_as::<Postgres, TenantSyncStatus>(&format!(
            "SELECT {} FROM tenant_sync_status WHERE tenant_id = $1",
            STATUS_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status)
    }

    #[tracing::instrument(skip(self), fields(db.table = "tenant_sync_status", db.operation = "insert"))]
    async fn get_or_create(&self, tenant_id: &str) -> Result<TenantSyncStatus, AppError> {
        // Concurrent first syncs of the same tenant both land here; the loser of
        // the insert race simply reads the winner's row.
        sqlx::query(
            "INSERT INTO tenant_sync_status (tenant_id) VALUES ($1) ON CONFLICT (tenant_id) DO NOTHING",
        )
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        self.get(tenant_id).await?.ok_or_else(|| {
            AppError::Internal(format!("Sync status for tenant {} vanished", tenant_id))
        })
    }

    #[tracing::instrument(skip(self), fields(db.table = "tenant_sync_status", db.operation = "update"))]
    async fn try_acquire_lock(
        &self,
        tenant_id: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<Option<TenantSyncStatus>, AppError> {
        let status = sqlx::query_as::<Postgres, TenantSyncStatus>(&format!(
            r#"
            UPDATE tenant_sync_status
            SET locked_by = $2,
                lock_expiry = NOW() + ($3::bigint * INTERVAL '1 millisecond'),
                updated_at = NOW()
            WHERE tenant_id = $1
              AND (locked_by IS NULL OR lock_expiry IS NULL OR lock_expiry < NOW() OR locked_by = $2)
            RETURNING {}
            "#,
            STATUS_COLUMNS
        ))
        .bind(tenant_id)
        .bind(owner)
        .bind(ttl.num_milliseconds())
        .fetch_optional(&self.pool)
        .await?;

        Ok(status)
    }

    #[tracing::instrument(skip(self), fields(db.table = "tenant_sync_status", db.operation = "update"))]
    async fn release_lock(&self, tenant_id: &str, owner: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE tenant_sync_status
            SET locked_by = NULL, lock_expiry = NULL, updated_at = NOW()
            WHERE tenant_id = $1 AND locked_by = $2
            "#,
        )
        .bind(tenant_id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), fields(db.table = "tenant_sync_status", db.operation = "update"))]
    async fn begin_attempt(&self, tenant_id: &str, owner: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE tenant_sync_status
            SET status = 'syncing',
                phase = 'independent',
                attempts = attempts + 1,
                last_error = NULL,
                error_code = NULL,
                started_at = NOW(),
                completed_at = NULL,
                duration_ms = NULL,
                collections = '{}'::jsonb,
                updated_at = NOW()
            WHERE tenant_id = $1 AND locked_by = $2
            "#,
        )
        .bind(tenant_id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_phase(
        &self,
        tenant_id: &str,
        owner: &str,
        phase: SyncPhase,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE tenant_sync_status
            SET phase = $3, updated_at = NOW()
            WHERE tenant_id = $1 AND locked_by = $2
            "#,
        )
        .bind(tenant_id)
        .bind(owner)
        .bind(phase)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self, outcome), fields(db.table = "tenant_sync_status", db.operation = "update"))]
    async fn record_collection(
        &self,
        tenant_id: &str,
        owner: &str,
        collection: SyncCollection,
        outcome: &CollectionOutcome,
    ) -> Result<bool, AppError> {
        let entry = CollectionSyncEntry::from_outcome(outcome, chrono::Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE tenant_sync_status
            SET collections = jsonb_set(collections, ARRAY[$3::text], $4::jsonb, true),
                updated_at = NOW()
            WHERE tenant_id = $1 AND locked_by = $2
            "#,
        )
        .bind(tenant_id)
        .bind(owner)
        .bind(collection.as_str())
        .bind(Json(&entry))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), fields(db.table = "tenant_sync_status", db.operation = "update"))]
    async fn mark_completed(&self, tenant_id: &str, owner: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE tenant_sync_status
            SET status = 'completed',
                completed_at = NOW(),
                duration_ms = (EXTRACT(EPOCH FROM (NOW() - started_at)) * 1000)::bigint,
                locked_by = NULL,
                lock_expiry = NULL,
                updated_at = NOW()
            WHERE tenant_id = $1 AND locked_by = $2
            "#,
        )
        .bind(tenant_id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self, reason), fields(db.table = "tenant_sync_status", db.operation = "update"))]
    async fn mark_failed(
        &self,
        tenant_id: &str,
        owner: &str,
        reason: &str,
        kind: SyncErrorKind,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE tenant_sync_status
            SET status = 'failed',
                last_error = $3,
                error_code = $4,
                locked_by = NULL,
                lock_expiry = NULL,
                updated_at = NOW()
            WHERE tenant_id = $1 AND locked_by = $2
            "#,
        )
        .bind(tenant_id)
        .bind(owner)
        .bind(reason)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), fields(db.table = "tenant_sync_status", db.operation = "update"))]
    async fn reset(&self, tenant_id: &str) -> Result<Option<TenantSyncStatus>, AppError> {
        let status = sqlx::query_as::<Postgres, TenantSyncStatus>(&format!(
            r#"
            UPDATE tenant_sync_status
            SET status = 'pending',
                phase = NULL,
                locked_by = NULL,
                lock_expiry = NULL,
                collections = '{{}}'::jsonb,
                last_error = NULL,
                error_code = NULL,
                started_at = NULL,
                completed_at = NULL,
                duration_ms = NULL,
                updated_at = NOW()
            WHERE tenant_id = $1
              AND (locked_by IS NULL OR lock_expiry IS NULL OR lock_expiry < NOW())
            RETURNING {}
            "#,
            STATUS_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        match status {
            Some(status) => Ok(Some(status)),
            None => match self.get(tenant_id).await? {
                Some(_) => Err(AppError::Conflict(format!(
                    "Sync for tenant {} is in progress",
                    tenant_id
                ))),
                None => Ok(None),
            },
        }
    }
}
