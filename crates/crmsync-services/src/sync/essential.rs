//! Essential phase: tenant, organizations, roles and users.
//!
//! The four datasets are fetched in parallel and written in a single transaction.
//! Both steps run under the retry controller.

use crmsync_core::models::{
    CollectionOutcome, EssentialStats, OrganizationUpsert, RoleUpsert, SyncCollection,
    SyncPhase, TenantUpsert, UserUpsert,
};
use crmsync_core::AppError;
use crmsync_db::EssentialData;

use super::SyncContext;

const ESSENTIAL_COLLECTIONS: [SyncCollection; 3] = [
    SyncCollection::Organizations,
    SyncCollection::Roles,
    SyncCollection::Users,
];

impl SyncContext {
    async fn fetch_essential(&self, tenant_id: &str, token: &str) -> Result<EssentialData, AppError> {
        let (tenant, organizations, roles, users) = tokio::try_join!(
            self.api.fetch_tenant(tenant_id, token),
            self.api.fetch_organizations(tenant_id, token),
            self.api.fetch_roles(tenant_id, token),
            self.api.fetch_users(tenant_id, token),
        )?;

        if tenant.tenant_id != tenant_id {
            return Err(AppError::Validation(format!(
                "Upstream returned tenant {} for {}",
                tenant.tenant_id, tenant_id
            )));
        }

        Ok(EssentialData {
            tenant: TenantUpsert::from_wrapper(&tenant),
            organizations: organizations
                .iter()
                .filter(|o| !o.org_code.trim().is_empty())
                .map(OrganizationUpsert::from_wrapper)
                .collect(),
            roles: roles
                .iter()
                .filter(|r| !r.role_id.trim().is_empty())
                .map(RoleUpsert::from_wrapper)
                .collect(),
            users: users
                .iter()
                .filter(|u| !u.user_id.trim().is_empty())
                .map(UserUpsert::from_wrapper)
                .collect(),
        })
    }

    /// Fetch and store the independent collections, then move the run to the
    /// dependent phase.
    #[tracing::instrument(skip(self, token, owner), fields(tenant_id = %tenant_id))]
    pub(crate) async fn run_essential(
        &self,
        tenant_id: &str,
        token: &str,
        owner: &str,
    ) -> Result<EssentialStats, AppError> {
        for collection in ESSENTIAL_COLLECTIONS {
            self.record(tenant_id, owner, collection, CollectionOutcome::Syncing)
                .await;
        }

        let data = self
            .retry
            .run("essential_fetch", move || self.fetch_essential(tenant_id, token))
            .await?;

        let data_ref = &data;
        let stats = self
            .retry
            .run("essential_store", move || {
                self.data.store_essential(tenant_id, data_ref)
            })
            .await?;

        self.record(
            tenant_id,
            owner,
            SyncCollection::Organizations,
            CollectionOutcome::Success(stats.organizations),
        )
        .await;
        self.record(
            tenant_id,
            owner,
            SyncCollection::Roles,
            CollectionOutcome::Success(stats.roles),
        )
        .await;
        self.record(
            tenant_id,
            owner,
            SyncCollection::Users,
            CollectionOutcome::Success(stats.users),
        )
        .await;

        if !self
            .status
            .set_phase(tenant_id, owner, SyncPhase::Dependent)
            .await?
        {
            return Err(AppError::Conflict(format!(
                "Sync lease for tenant {} was lost during the essential phase",
                tenant_id
            )));
        }

        tracing::info!(
            organizations = stats.organizations,
            roles = stats.roles,
            users = stats.users,
            total_records = stats.total_records,
            "Essential data synced"
        );
        Ok(stats)
    }

    /// Mark the independent collections failed after an essential-phase error.
    pub(crate) async fn record_essential_failure(
        &self,
        tenant_id: &str,
        owner: &str,
        reason: &str,
    ) {
        for collection in ESSENTIAL_COLLECTIONS {
            self.record(
                tenant_id,
                owner,
                collection,
                CollectionOutcome::Failed(reason.to_string()),
            )
            .await;
        }
    }
}
