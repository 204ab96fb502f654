use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::reference::Reference;
use super::wrapper::WrapperOrganization;

/// Node of a tenant's organization hierarchy, unique per (tenant_id, org_code).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Organization {
    pub id: Uuid,
    pub tenant_id: String,
    pub org_code: String,
    pub name: String,
    pub status: String,
    pub level: Option<i32>,
    pub path: Option<String>,
    pub description: Option<String>,
    pub parent: Option<Reference>,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Organization {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let parent_key: Option<String> = row.try_get("parent_key")?;
        let parent_id: Option<Uuid> = row.try_get("parent_id")?;
        Ok(Organization {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            org_code: row.try_get("org_code")?,
            name: row.try_get("name")?,
            status: row.try_get("status")?,
            level: row.try_get("level")?,
            path: row.try_get("path")?,
            description: row.try_get("description")?,
            parent: parent_key.map(|key| Reference::from_columns(key, parent_id)),
            last_synced_at: row.try_get("last_synced_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// First write of the two-phase organization store: the parent is only known by its
/// org code at this point.
#[derive(Debug, Clone, PartialEq)]
pub struct OrganizationUpsert {
    pub org_code: String,
    pub name: String,
    pub status: String,
    pub level: Option<i32>,
    pub path: Option<String>,
    pub description: Option<String>,
    pub parent_code: Option<String>,
}

impl OrganizationUpsert {
    pub fn from_wrapper(org: &WrapperOrganization) -> Self {
        let hierarchy = org.hierarchy.clone().unwrap_or_default();
        Self {
            org_code: org.org_code.trim().to_string(),
            name: org.org_name.clone(),
            status: org
                .status
                .as_deref()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "active".to_string()),
            level: hierarchy.level,
            path: hierarchy.path,
            description: org.description.clone(),
            parent_code: org
                .parent_id
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        }
    }
}

/// Second pass of the two-phase store: for every organization with a parent code,
/// the parent's internal id once both rows exist. Parents missing from `ids` stay
/// pending and are skipped.
pub fn plan_parent_links(
    organizations: &[OrganizationUpsert],
    ids: &HashMap<String, Uuid>,
) -> Vec<(Uuid, Uuid)> {
    organizations
        .iter()
        .filter_map(|org| {
            let parent_code = org.parent_code.as_ref()?;
            let child = ids.get(&org.org_code)?;
            let parent = ids.get(parent_code)?;
            Some((*child, *parent))
        })
        .collect()
}
