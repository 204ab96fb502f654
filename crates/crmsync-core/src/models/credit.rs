use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

use super::reference::{Reference, ReferenceMaps};
use super::wrapper::{WrapperCreditConfig, WrapperEntityCredit};

/// Cost of a CRM operation, per tenant and optionally per organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreditConfig {
    pub id: Uuid,
    pub tenant_id: String,
    pub config_id: String,
    pub config_name: Option<String>,
    pub operation_code: Option<String>,
    pub credit_cost: f64,
    pub organization: Option<Reference>,
    pub is_active: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for CreditConfig {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let org_key: Option<String> = row.try_get("org_key")?;
        let org_ref: Option<Uuid> = row.try_get("org_ref")?;
        Ok(CreditConfig {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            config_id: row.try_get("config_id")?,
            config_name: row.try_get("config_name")?,
            operation_code: row.try_get("operation_code")?,
            credit_cost: row.try_get("credit_cost")?,
            organization: org_key.map(|key| Reference::from_columns(key, org_ref)),
            is_active: row.try_get("is_active")?,
            description: row.try_get("description")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreditConfigUpsert {
    pub config_id: String,
    pub config_name: Option<String>,
    pub operation_code: Option<String>,
    pub credit_cost: f64,
    pub organization: Option<Reference>,
    pub is_active: bool,
    pub description: Option<String>,
}

impl CreditConfigUpsert {
    pub fn from_wrapper(config: &WrapperCreditConfig, maps: &ReferenceMaps) -> Self {
        Self {
            config_id: config.config_id.trim().to_string(),
            config_name: config.config_name.clone(),
            operation_code: config.operation_code.clone(),
            credit_cost: config.credit_cost,
            organization: config
                .entity_id
                .as_deref()
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(|code| maps.organization(code)),
            is_active: config.is_active.unwrap_or(true),
            description: config.description.clone(),
        }
    }
}

/// Credit allocation of an organization. `available_credits` is always
/// `allocated_credits - used_credits`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityCredit {
    pub id: Uuid,
    pub tenant_id: String,
    pub entity: Reference,
    pub allocated_credits: f64,
    pub used_credits: f64,
    pub available_credits: f64,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for EntityCredit {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(EntityCredit {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            entity: Reference::from_columns(row.try_get("entity_key")?, row.try_get("entity_ref")?),
            allocated_credits: row.try_get("allocated_credits")?,
            used_credits: row.try_get("used_credits")?,
            available_credits: row.try_get("available_credits")?,
            expires_at: row.try_get("expires_at")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Why an upstream entity-credit row was not stored.
#[derive(Debug, Clone, PartialEq)]
pub enum CreditSkipReason {
    MissingEntityId,
    NonNumericAllocation(Option<JsonValue>),
}

impl Display for CreditSkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            CreditSkipReason::MissingEntityId => write!(f, "missing entityId"),
            CreditSkipReason::NonNumericAllocation(value) => {
                write!(f, "allocatedCredits is not numeric: {:?}", value)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityCreditUpsert {
    pub entity: Reference,
    pub allocated_credits: f64,
    pub used_credits: f64,
    pub available_credits: f64,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl EntityCreditUpsert {
    /// Validate an upstream row and recompute the available balance. The upstream
    /// `availableCredits` value is ignored.
    pub fn from_wrapper(
        credit: &WrapperEntityCredit,
        maps: &ReferenceMaps,
    ) -> Result<Self, CreditSkipReason> {
        let entity_id = credit
            .entity_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(CreditSkipReason::MissingEntityId)?;

        let allocated = credit
            .allocated_credits
            .as_ref()
            .and_then(JsonValue::as_f64)
            .filter(|v| v.is_finite())
            .ok_or_else(|| {
                CreditSkipReason::NonNumericAllocation(credit.allocated_credits.clone())
            })?;

        let used = credit
            .used_credits
            .as_ref()
            .and_then(JsonValue::as_f64)
            .filter(|v| v.is_finite())
            .unwrap_or(0.0);

        Ok(Self {
            entity: maps.organization(entity_id),
            allocated_credits: allocated,
            used_credits: used,
            available_credits: allocated - used,
            expires_at: credit.expires_at,
            is_active: credit.is_active.unwrap_or(true),
        })
    }
}
