use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::wrapper::WrapperUser;

/// Local profile of an upstream user, unique per (tenant_id, user_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct UserProfile {
    pub id: Uuid,
    pub tenant_id: String,
    pub user_id: String,
    pub employee_code: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
    /// Active employee-org assignments, relinked after each background sync.
    pub assignment_ids: Vec<Uuid>,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn display_name(&self) -> Option<String> {
        match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
            (Some(name), None) | (None, Some(name)) => Some(name.to_string()),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserUpsert {
    pub user_id: String,
    pub employee_code: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
}

impl UserUpsert {
    pub fn from_wrapper(user: &WrapperUser) -> Self {
        Self {
            user_id: user.user_id.trim().to_string(),
            employee_code: user.employee_code.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.as_deref().map(|e| e.trim().to_lowercase()),
            is_active: user.is_active.unwrap_or(true),
        }
    }
}
