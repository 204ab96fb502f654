use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

use super::wrapper::WrapperTenant;

/// Tenant lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
}

impl TenantStatus {
    /// Map an upstream status string; anything unrecognised counts as active.
    pub fn from_upstream(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("inactive") | Some("disabled") => TenantStatus::Inactive,
            Some("suspended") => TenantStatus::Suspended,
            _ => TenantStatus::Active,
        }
    }
}

impl Display for TenantStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TenantStatus::Active => write!(f, "active"),
            TenantStatus::Inactive => write!(f, "inactive"),
            TenantStatus::Suspended => write!(f, "suspended"),
        }
    }
}

/// Customer organization root. Never hard-deleted by the sync path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Tenant {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub status: TenantStatus,
    pub settings: JsonValue,
    pub subscription: JsonValue,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Natural-key upsert of a tenant, keyed by `tenant_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantUpsert {
    pub tenant_id: String,
    pub name: String,
    pub status: TenantStatus,
    pub settings: JsonValue,
    pub subscription: JsonValue,
}

impl TenantUpsert {
    pub fn from_wrapper(tenant: &WrapperTenant) -> Self {
        Self {
            tenant_id: tenant.tenant_id.clone(),
            name: tenant.tenant_name.clone(),
            status: TenantStatus::from_upstream(tenant.status.as_deref()),
            settings: tenant
                .settings
                .clone()
                .unwrap_or_else(|| JsonValue::Object(Default::default())),
            subscription: tenant
                .subscription
                .clone()
                .unwrap_or_else(|| JsonValue::Object(Default::default())),
        }
    }
}
