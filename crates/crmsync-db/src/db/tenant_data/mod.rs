//! Collection store writers
//!
//! `essential` holds the connection-level writers of the independent collections,
//! `dependent` the isolated writers of assignments and credits, `links` the
//! reference maps and relink pass.

pub mod dependent;
pub mod essential;
pub mod links;

use async_trait::async_trait;
use crmsync_core::models::{
    CreditConfigUpsert, EmployeeAssignmentUpsert, EntityCreditUpsert, EssentialStats,
    ReferenceMaps, RoleAssignmentUpsert, StoreReport,
};
use crmsync_core::AppError;
use sqlx::PgPool;

use crate::db::transaction::with_transaction;
use crate::store_traits::{EssentialData, LinkStats, TenantDataStore};

/// PostgreSQL implementation of [`TenantDataStore`]
#[derive(Clone)]
pub struct PgTenantDataStore {
    pool: PgPool,
}

impl PgTenantDataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantDataStore for PgTenantDataStore {
    #[tracing::instrument(skip(self, data), fields(organizations = data.organizations.len(), roles = data.roles.len(), users = data.users.len()))]
    async fn store_essential(
        &self,
        tenant_id: &str,
        data: &EssentialData,
    ) -> Result<EssentialStats, AppError> {
        let tenant_id = tenant_id.to_string();
        let data = data.clone();

        with_transaction(&self.pool, move |tx| {
            Box::pin(async move {
                essential::upsert_tenant(&mut **tx, &data.tenant).await?;
                let organizations =
                    essential::upsert_organizations(&mut **tx, &tenant_id, &data.organizations)
                        .await?;
                let roles = essential::upsert_roles(&mut **tx, &tenant_id, &data.roles).await?;
                let users = essential::upsert_users(&mut **tx, &tenant_id, &data.users).await?;
                Ok(EssentialStats::new(
                    1,
                    organizations.len() as u64,
                    roles,
                    users,
                ))
            })
        })
        .await
    }

    async fn load_reference_maps(&self, tenant_id: &str) -> Result<ReferenceMaps, AppError> {
        links::load_reference_maps(&self.pool, tenant_id).await
    }

    async fn store_employee_assignments(
        &self,
        tenant_id: &str,
        records: &[EmployeeAssignmentUpsert],
    ) -> Result<StoreReport, AppError> {
        dependent::upsert_employee_assignments(&self.pool, tenant_id, records).await
    }

    async fn store_role_assignments(
        &self,
        tenant_id: &str,
        records: &[RoleAssignmentUpsert],
    ) -> Result<StoreReport, AppError> {
        dependent::upsert_role_assignments(&self.pool, tenant_id, records).await
    }

    async fn store_credit_configs(
        &self,
        tenant_id: &str,
        records: &[CreditConfigUpsert],
    ) -> Result<StoreReport, AppError> {
        dependent::upsert_credit_configs(&self.pool, tenant_id, records).await
    }

    async fn store_entity_credits(
        &self,
        tenant_id: &str,
        records: &[EntityCreditUpsert],
    ) -> Result<StoreReport, AppError> {
        dependent::upsert_entity_credits(&self.pool, tenant_id, records).await
    }

    async fn link_user_assignments(&self, tenant_id: &str) -> Result<LinkStats, AppError> {
        links::link_user_assignments(&self.pool, tenant_id).await
    }
}
