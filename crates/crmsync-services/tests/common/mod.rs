//! Scripted wrapper API for orchestrator tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use crmsync_api_client::WrapperApi;
use crmsync_core::models::{
    WrapperCreditConfig, WrapperEmployeeAssignment, WrapperEntityCredit, WrapperOrganization,
    WrapperRole, WrapperRoleAssignment, WrapperTenant, WrapperUser,
};
use crmsync_core::{AppError, RetrySettings};
use crmsync_db::test_helpers::{MemorySyncStatusStore, MemoryTenantStore};
use crmsync_infra::RetryPolicy;
use crmsync_services::SyncOrchestrator;
use serde_json::{json, Value};

#[derive(Default)]
struct Script {
    tenant: Option<Value>,
    collections: HashMap<&'static str, Vec<Value>>,
    failures: HashMap<&'static str, u16>,
    calls: HashMap<&'static str, usize>,
    delay: Option<Duration>,
}

/// Wrapper API double serving canned JSON rows and counting calls per resource.
#[derive(Clone, Default)]
pub struct ScriptedWrapperApi {
    script: Arc<Mutex<Script>>,
}

impl ScriptedWrapperApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant(self, tenant: Value) -> Self {
        self.script.lock().unwrap().tenant = Some(tenant);
        self
    }

    pub fn with(self, resource: &'static str, rows: Vec<Value>) -> Self {
        self.script.lock().unwrap().collections.insert(resource, rows);
        self
    }

    /// Answer every call for `resource` with an upstream error status.
    pub fn failing(self, resource: &'static str, status: u16) -> Self {
        self.script.lock().unwrap().failures.insert(resource, status);
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.script.lock().unwrap().delay = Some(delay);
        self
    }

    pub fn calls(&self, resource: &str) -> usize {
        self.script
            .lock()
            .unwrap()
            .calls
            .get(resource)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_calls(&self) -> usize {
        self.script.lock().unwrap().calls.values().sum()
    }

    async fn serve<T: serde::de::DeserializeOwned>(
        &self,
        resource: &'static str,
    ) -> Result<T, AppError> {
        let (delay, failure, body) = {
            let mut script = self.script.lock().unwrap();
            *script.calls.entry(resource).or_default() += 1;
            let body = if resource == "tenant" {
                script.tenant.clone().unwrap_or(Value::Null)
            } else {
                Value::Array(
                    script
                        .collections
                        .get(resource)
                        .cloned()
                        .unwrap_or_default(),
                )
            };
            (script.delay, script.failures.get(resource).copied(), body)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(status) = failure {
            return Err(AppError::UpstreamStatus {
                status,
                message: format!("{} unavailable", resource),
            });
        }
        Ok(serde_json::from_value(body)?)
    }
}

#[async_trait]
impl WrapperApi for ScriptedWrapperApi {
    async fn fetch_tenant(&self, _tenant_id: &str, _token: &str) -> Result<WrapperTenant, AppError> {
        self.serve("tenant").await
    }

    async fn fetch_organizations(
        &self,
        _tenant_id: &str,
        _token: &str,
    ) -> Result<Vec<WrapperOrganization>, AppError> {
        self.serve("organizations").await
    }

    async fn fetch_roles(&self, _tenant_id: &str, _token: &str) -> Result<Vec<WrapperRole>, AppError> {
        self.serve("roles").await
    }

    async fn fetch_users(&self, _tenant_id: &str, _token: &str) -> Result<Vec<WrapperUser>, AppError> {
        self.serve("users").await
    }

    async fn fetch_employee_assignments(
        &self,
        _tenant_id: &str,
        _token: &str,
    ) -> Result<Vec<WrapperEmployeeAssignment>, AppError> {
        self.serve("employee-assignments").await
    }

    async fn fetch_role_assignments(
        &self,
        _tenant_id: &str,
        _token: &str,
    ) -> Result<Vec<WrapperRoleAssignment>, AppError> {
        self.serve("role-assignments").await
    }

    async fn fetch_credit_configs(
        &self,
        _tenant_id: &str,
        _token: &str,
    ) -> Result<Vec<WrapperCreditConfig>, AppError> {
        self.serve("credit-configs").await
    }

    async fn fetch_entity_credits(
        &self,
        _tenant_id: &str,
        _token: &str,
    ) -> Result<Vec<WrapperEntityCredit>, AppError> {
        self.serve("entity-credits").await
    }
}

/// Upstream data of tenant `t1`: ROOT with child SALES, one role, two users and one
/// row of every dependent collection.
pub fn tenant_t1() -> ScriptedWrapperApi {
    ScriptedWrapperApi::new()
        .with_tenant(json!({"tenantId": "t1", "tenantName": "Tenant One", "status": "active"}))
        .with(
            "organizations",
            vec![
                json!({"orgCode": "ROOT", "orgName": "Root", "parentId": null}),
                json!({"orgCode": "SALES", "orgName": "Sales", "parentId": "ROOT"}),
            ],
        )
        .with(
            "roles",
            vec![json!({"roleId": "r-admin", "roleName": "Admin", "permissions": ["*"]})],
        )
        .with(
            "users",
            vec![
                json!({"userId": "u-1", "firstName": "Ada", "email": "ada@example.com"}),
                json!({"userId": "u-2", "firstName": "Lin"}),
            ],
        )
        .with(
            "employee-assignments",
            vec![json!({"assignmentId": "a-1", "userId": "u-1", "entityId": "SALES", "priority": 7})],
        )
        .with(
            "role-assignments",
            vec![json!({"userId": "u-1", "roleId": "r-admin", "entityId": "SALES"})],
        )
        .with(
            "credit-configs",
            vec![json!({"configId": "c-1", "operationCode": "EXPORT", "creditCost": 2.5, "entityId": "ROOT"})],
        )
        .with(
            "entity-credits",
            vec![
                json!({"entityId": "SALES", "allocatedCredits": 100, "usedCredits": 30, "availableCredits": 999}),
                json!({"allocatedCredits": 10}),
                json!({"entityId": "ROOT", "allocatedCredits": "n/a"}),
            ],
        )
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(RetrySettings {
        max_attempts: 3,
        base_delay_ms: 1,
        multiplier: 2.0,
        max_delay_ms: 5,
        jitter_ms: 0,
    })
}

pub struct Harness {
    pub api: ScriptedWrapperApi,
    pub data: MemoryTenantStore,
    pub status: MemorySyncStatusStore,
    pub orchestrator: SyncOrchestrator,
}

pub fn harness(api: ScriptedWrapperApi) -> Harness {
    let data = MemoryTenantStore::new();
    let status = MemorySyncStatusStore::new();
    let orchestrator = SyncOrchestrator::new(
        Arc::new(api.clone()),
        Arc::new(data.clone()),
        Arc::new(status.clone()),
        fast_retry(),
        Duration::from_secs(600),
    );
    Harness {
        api,
        data,
        status,
        orchestrator,
    }
}
