use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::reference::{Reference, ReferenceMaps};
use super::wrapper::{WrapperEmployeeAssignment, WrapperRoleAssignment};

pub const MIN_ASSIGNMENT_PRIORITY: i32 = 1;
pub const MAX_ASSIGNMENT_PRIORITY: i32 = 10;
pub const DEFAULT_ASSIGNMENT_PRIORITY: i32 = 5;
pub const DEFAULT_ASSIGNMENT_TYPE: &str = "primary";

/// Assignment priority, higher wins on conflicting lookups.
pub fn clamp_priority(priority: Option<i32>) -> i32 {
    priority
        .unwrap_or(DEFAULT_ASSIGNMENT_PRIORITY)
        .clamp(MIN_ASSIGNMENT_PRIORITY, MAX_ASSIGNMENT_PRIORITY)
}

/// Link between a user and an organization.
///
/// Unique per (tenant_id, assignment_id); at most one active row per
/// (tenant_id, user, organization).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmployeeOrgAssignment {
    pub id: Uuid,
    pub tenant_id: String,
    pub assignment_id: String,
    pub user: Reference,
    pub organization: Reference,
    pub assignment_type: String,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub deactivated_by: Option<String>,
    pub priority: i32,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmployeeOrgAssignment {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for EmployeeOrgAssignment {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(EmployeeOrgAssignment {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            assignment_id: row.try_get("assignment_id")?,
            user: Reference::from_columns(row.try_get("user_key")?, row.try_get("user_ref")?),
            organization: Reference::from_columns(
                row.try_get("org_key")?,
                row.try_get("org_ref")?,
            ),
            assignment_type: row.try_get("assignment_type")?,
            assigned_at: row.try_get("assigned_at")?,
            assigned_by: row.try_get("assigned_by")?,
            expires_at: row.try_get("expires_at")?,
            is_active: row.try_get("is_active")?,
            deactivated_at: row.try_get("deactivated_at")?,
            deactivated_by: row.try_get("deactivated_by")?,
            priority: row.try_get("priority")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Employee-org assignment as written by either the bulk sync or the event consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct EmployeeAssignmentUpsert {
    pub assignment_id: String,
    pub user: Reference,
    pub organization: Reference,
    pub assignment_type: String,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub priority: i32,
    pub metadata: JsonValue,
}

impl EmployeeAssignmentUpsert {
    pub fn from_wrapper(
        assignment: &WrapperEmployeeAssignment,
        maps: &ReferenceMaps,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            assignment_id: assignment.assignment_id.trim().to_string(),
            user: maps.user(assignment.user_id.trim()),
            organization: maps.organization(assignment.entity_id.trim()),
            assignment_type: assignment
                .assignment_type
                .clone()
                .unwrap_or_else(|| DEFAULT_ASSIGNMENT_TYPE.to_string()),
            assigned_at: assignment.assigned_at.unwrap_or(now),
            assigned_by: assignment.assigned_by.clone(),
            expires_at: assignment.expires_at,
            is_active: assignment.is_active.unwrap_or(true),
            priority: clamp_priority(assignment.priority),
            metadata: assignment
                .metadata
                .clone()
                .unwrap_or_else(|| JsonValue::Object(Default::default())),
        }
    }
}

/// Partial update of the mutable assignment fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentPatch {
    pub assignment_type: Option<String>,
    pub is_active: Option<bool>,
    pub priority: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Option<JsonValue>,
}

impl AssignmentPatch {
    pub fn is_empty(&self) -> bool {
        self.assignment_type.is_none()
            && self.is_active.is_none()
            && self.priority.is_none()
            && self.expires_at.is_none()
            && self.metadata.is_none()
    }

    /// Apply the patch in place. Priority is clamped to its valid range.
    pub fn apply_to(&self, assignment: &mut EmployeeOrgAssignment, now: DateTime<Utc>) {
        if let Some(ref kind) = self.assignment_type {
            assignment.assignment_type = kind.clone();
        }
        if let Some(active) = self.is_active {
            assignment.is_active = active;
        }
        if let Some(priority) = self.priority {
            assignment.priority = clamp_priority(Some(priority));
        }
        if let Some(expires_at) = self.expires_at {
            assignment.expires_at = Some(expires_at);
        }
        if let Some(ref metadata) = self.metadata {
            assignment.metadata = metadata.clone();
        }
        assignment.updated_at = now;
    }
}

/// Link between a user, a role and optionally an organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrmRoleAssignment {
    pub id: Uuid,
    pub tenant_id: String,
    pub assignment_id: String,
    pub user: Reference,
    pub role: Reference,
    pub organization: Option<Reference>,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for CrmRoleAssignment {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let org_key: Option<String> = row.try_get("org_key")?;
        let org_ref: Option<Uuid> = row.try_get("org_ref")?;
        Ok(CrmRoleAssignment {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            assignment_id: row.try_get("assignment_id")?,
            user: Reference::from_columns(row.try_get("user_key")?, row.try_get("user_ref")?),
            role: Reference::from_columns(row.try_get("role_key")?, row.try_get("role_ref")?),
            organization: org_key.map(|key| Reference::from_columns(key, org_ref)),
            assigned_at: row.try_get("assigned_at")?,
            assigned_by: row.try_get("assigned_by")?,
            expires_at: row.try_get("expires_at")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoleAssignmentUpsert {
    pub assignment_id: String,
    pub user: Reference,
    pub role: Reference,
    pub organization: Option<Reference>,
    pub assigned_at: DateTime<Utc>,
    pub assigned_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl RoleAssignmentUpsert {
    /// Upstream role assignments do not always carry an id; the (user, role, org)
    /// triple is their business identity in that case.
    pub fn natural_key(user_id: &str, role_id: &str, org_code: Option<&str>) -> String {
        format!("{}:{}:{}", user_id, role_id, org_code.unwrap_or("*"))
    }

    pub fn from_wrapper(
        assignment: &WrapperRoleAssignment,
        maps: &ReferenceMaps,
        now: DateTime<Utc>,
    ) -> Self {
        let user_id = assignment.user_id.trim();
        let role_id = assignment.role_id.trim();
        let org_code = assignment
            .entity_id
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty());
        Self {
            assignment_id: assignment
                .assignment_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| Self::natural_key(user_id, role_id, org_code)),
            user: maps.user(user_id),
            role: maps.role(role_id),
            organization: org_code.map(|code| maps.organization(code)),
            assigned_at: assignment.assigned_at.unwrap_or(now),
            assigned_by: assignment.assigned_by.clone(),
            expires_at: assignment.expires_at,
            is_active: assignment.is_active.unwrap_or(true),
        }
    }
}
