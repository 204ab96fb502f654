//! Wire shapes of the upstream wrapper API.
//!
//! Every endpoint answers with a [`WrapperEnvelope`]. List endpoints carry a
//! `pagination` block; the tenant endpoint carries a single object in `data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrapperEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub pagination: Option<Pagination>,
    pub message: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrapperTenant {
    #[serde(alias = "id")]
    pub tenant_id: String,
    #[serde(alias = "name")]
    pub tenant_name: String,
    pub status: Option<String>,
    pub settings: Option<JsonValue>,
    pub subscription: Option<JsonValue>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrapperHierarchy {
    pub level: Option<i32>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrapperOrganization {
    pub org_code: String,
    #[serde(alias = "name")]
    pub org_name: String,
    /// Parent org code; `None` for roots.
    pub parent_id: Option<String>,
    pub status: Option<String>,
    pub hierarchy: Option<WrapperHierarchy>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrapperRole {
    pub role_id: String,
    #[serde(alias = "name")]
    pub role_name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub priority: Option<i32>,
    pub is_active: Option<bool>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrapperUser {
    pub user_id: String,
    pub employee_code: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrapperEmployeeAssignment {
    pub assignment_id: String,
    pub user_id: String,
    /// Org code of the assigned organization.
    #[serde(alias = "organizationId", alias = "orgCode")]
    pub entity_id: String,
    pub assignment_type: Option<String>,
    pub is_active: Option<bool>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub assigned_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrapperRoleAssignment {
    pub assignment_id: Option<String>,
    pub user_id: String,
    pub role_id: String,
    #[serde(alias = "organizationId", alias = "orgCode")]
    pub entity_id: Option<String>,
    pub is_active: Option<bool>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub assigned_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrapperCreditConfig {
    #[serde(alias = "id")]
    pub config_id: String,
    pub config_name: Option<String>,
    pub operation_code: Option<String>,
    #[serde(default)]
    pub credit_cost: f64,
    #[serde(alias = "organizationId")]
    pub entity_id: Option<String>,
    pub is_active: Option<bool>,
    pub description: Option<String>,
}

/// Entity credit rows are validated record by record, so the numeric fields are kept
/// loosely typed here; see `EntityCreditUpsert::from_wrapper`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrapperEntityCredit {
    #[serde(alias = "organizationId")]
    pub entity_id: Option<String>,
    pub allocated_credits: Option<JsonValue>,
    pub used_credits: Option<JsonValue>,
    pub available_credits: Option<JsonValue>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}
