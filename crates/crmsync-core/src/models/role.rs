use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::wrapper::WrapperRole;

/// CRM role, unique per (tenant_id, role_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Role {
    pub id: Uuid,
    pub tenant_id: String,
    pub role_id: String,
    pub name: String,
    pub permissions: Vec<String>,
    pub priority: i32,
    pub is_active: bool,
    pub description: Option<String>,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoleUpsert {
    pub role_id: String,
    pub name: String,
    pub permissions: Vec<String>,
    pub priority: i32,
    pub is_active: bool,
    pub description: Option<String>,
}

impl RoleUpsert {
    pub fn from_wrapper(role: &WrapperRole) -> Self {
        let mut permissions = role.permissions.clone();
        permissions.sort();
        permissions.dedup();
        Self {
            role_id: role.role_id.trim().to_string(),
            name: role.role_name.clone(),
            permissions,
            priority: role.priority.unwrap_or(0),
            is_active: role.is_active.unwrap_or(true),
            description: role.description.clone(),
        }
    }
}
