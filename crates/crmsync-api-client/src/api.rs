//! Resource methods of the wrapper API.
//!
//! [`WrapperApi`] is the seam the orchestrator depends on; [`WrapperClient`] is the
//! HTTP implementation.

use async_trait::async_trait;
use crmsync_core::models::{
    WrapperCreditConfig, WrapperEmployeeAssignment, WrapperEntityCredit, WrapperOrganization,
    WrapperRole, WrapperRoleAssignment, WrapperTenant, WrapperUser,
};
use crmsync_core::AppError;

use crate::WrapperClient;

#[async_trait]
pub trait WrapperApi: Send + Sync {
    async fn fetch_tenant(&self, tenant_id: &str, token: &str) -> Result<WrapperTenant, AppError>;

    async fn fetch_organizations(
        &self,
        tenant_id: &str,
        token: &str,
    ) -> Result<Vec<WrapperOrganization>, AppError>;

    async fn fetch_roles(&self, tenant_id: &str, token: &str)
        -> Result<Vec<WrapperRole>, AppError>;

    async fn fetch_users(&self, tenant_id: &str, token: &str)
        -> Result<Vec<WrapperUser>, AppError>;

    async fn fetch_employee_assignments(
        &self,
        tenant_id: &str,
        token: &str,
    ) -> Result<Vec<WrapperEmployeeAssignment>, AppError>;

    async fn fetch_role_assignments(
        &self,
        tenant_id: &str,
        token: &str,
    ) -> Result<Vec<WrapperRoleAssignment>, AppError>;

    async fn fetch_credit_configs(
        &self,
        tenant_id: &str,
        token: &str,
    ) -> Result<Vec<WrapperCreditConfig>, AppError>;

    async fn fetch_entity_credits(
        &self,
        tenant_id: &str,
        token: &str,
    ) -> Result<Vec<WrapperEntityCredit>, AppError>;
}

#[async_trait]
impl WrapperApi for WrapperClient {
    #[tracing::instrument(skip(self, token), fields(resource = "tenant"))]
    async fn fetch_tenant(&self, tenant_id: &str, token: &str) -> Result<WrapperTenant, AppError> {
        let url = self.tenant_url(tenant_id, "");
        self.fetch_one(&url, "tenant", token).await
    }

    #[tracing::instrument(skip(self, token), fields(resource = "organizations"))]
    async fn fetch_organizations(
        &self,
        tenant_id: &str,
        token: &str,
    ) -> Result<Vec<WrapperOrganization>, AppError> {
        let url = self.tenant_url(tenant_id, "/organizations");
        self.fetch_all(&url, "organizations", token).await
    }

    #[tracing::instrument(skip(self, token), fields(resource = "roles"))]
    async fn fetch_roles(
        &self,
        tenant_id: &str,
        token: &str,
    ) -> Result<Vec<WrapperRole>, AppError> {
        let url = self.tenant_url(tenant_id, "/roles");
        self.fetch_all(&url, "roles", token).await
    }

    #[tracing::instrument(skip(self, token), fields(resource = "users"))]
    async fn fetch_users(
        &self,
        tenant_id: &str,
        token: &str,
    ) -> Result<Vec<WrapperUser>, AppError> {
        let url = self.tenant_url(tenant_id, "/users");
        self.fetch_all(&url, "users", token).await
    }

    #[tracing::instrument(skip(self, token), fields(resource = "employee-assignments"))]
    async fn fetch_employee_assignments(
        &self,
        tenant_id: &str,
        token: &str,
    ) -> Result<Vec<WrapperEmployeeAssignment>, AppError> {
        let url = self.tenant_url(tenant_id, "/employee-assignments");
        self.fetch_all_lenient(&url, "employee-assignments", token).await
    }

    #[tracing::instrument(skip(self, token), fields(resource = "role-assignments"))]
    async fn fetch_role_assignments(
        &self,
        tenant_id: &str,
        token: &str,
    ) -> Result<Vec<WrapperRoleAssignment>, AppError> {
        let url = self.tenant_url(tenant_id, "/role-assignments");
        self.fetch_all_lenient(&url, "role-assignments", token).await
    }

    #[tracing::instrument(skip(self, token), fields(resource = "credit-configs"))]
    async fn fetch_credit_configs(
        &self,
        tenant_id: &str,
        token: &str,
    ) -> Result<Vec<WrapperCreditConfig>, AppError> {
        let url = self.tenant_url(tenant_id, "/credit-configs");
        self.fetch_all_lenient(&url, "credit-configs", token).await
    }

    #[tracing::instrument(skip(self, token), fields(resource = "entity-credits"))]
    async fn fetch_entity_credits(
        &self,
        tenant_id: &str,
        token: &str,
    ) -> Result<Vec<WrapperEntityCredit>, AppError> {
        let url = self.tenant_url(tenant_id, "/entity-credits");
        self.fetch_all_lenient(&url, "entity-credits", token).await
    }
}
