//! Per-tenant sync control record.
//!
//! One row per tenant holds the overall state, the current phase, the sync lease,
//! one entry per synced collection and attempt bookkeeping. Every transition is a
//! method on [`TenantSyncStatus`] so the database repository and the in-memory
//! store apply exactly the same rules.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, SyncErrorKind};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Pending,
    Syncing,
    Completed,
    Failed,
}

impl Display for SyncState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            SyncState::Pending => write!(f, "pending"),
            SyncState::Syncing => write!(f, "syncing"),
            SyncState::Completed => write!(f, "completed"),
            SyncState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "text", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    /// Tenant, organizations, roles and users.
    Independent,
    /// Assignments and credits.
    Dependent,
}

impl Display for SyncPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            SyncPhase::Independent => write!(f, "independent"),
            SyncPhase::Dependent => write!(f, "dependent"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SyncCollection {
    Organizations,
    Roles,
    Users,
    EmployeeAssignments,
    RoleAssignments,
    CreditConfigs,
    EntityCredits,
}

impl SyncCollection {
    pub const ALL: [SyncCollection; 7] = [
        SyncCollection::Organizations,
        SyncCollection::Roles,
        SyncCollection::Users,
        SyncCollection::EmployeeAssignments,
        SyncCollection::RoleAssignments,
        SyncCollection::CreditConfigs,
        SyncCollection::EntityCredits,
    ];

    pub const DEPENDENT: [SyncCollection; 4] = [
        SyncCollection::EmployeeAssignments,
        SyncCollection::RoleAssignments,
        SyncCollection::CreditConfigs,
        SyncCollection::EntityCredits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncCollection::Organizations => "organizations",
            SyncCollection::Roles => "roles",
            SyncCollection::Users => "users",
            SyncCollection::EmployeeAssignments => "employeeAssignments",
            SyncCollection::RoleAssignments => "roleAssignments",
            SyncCollection::CreditConfigs => "creditConfigs",
            SyncCollection::EntityCredits => "entityCredits",
        }
    }

    pub fn phase(&self) -> SyncPhase {
        if SyncCollection::DEPENDENT.contains(self) {
            SyncPhase::Dependent
        } else {
            SyncPhase::Independent
        }
    }
}

impl Display for SyncCollection {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncCollection {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SyncCollection::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("Unknown sync collection: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CollectionState {
    #[default]
    Pending,
    Syncing,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSyncEntry {
    pub status: CollectionState,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

/// Result of storing one collection, as recorded on the status row.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionOutcome {
    Syncing,
    Success(u64),
    /// Some records were stored and some were rejected.
    Partial {
        stored: u64,
        failed: u64,
        error: String,
    },
    Failed(String),
}

/// Per-record tally of one collection write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreReport {
    pub stored: u64,
    pub failed: u64,
    pub first_error: Option<String>,
}

impl StoreReport {
    pub fn all(stored: u64) -> Self {
        Self {
            stored,
            ..Default::default()
        }
    }

    pub fn stored_one(&mut self) {
        self.stored += 1;
    }

    pub fn failed_one(&mut self, error: impl ToString) {
        self.failed += 1;
        if self.first_error.is_none() {
            self.first_error = Some(error.to_string());
        }
    }

    pub fn is_partial(&self) -> bool {
        self.failed > 0
    }

    pub fn outcome(&self) -> CollectionOutcome {
        if self.failed == 0 {
            return CollectionOutcome::Success(self.stored);
        }
        CollectionOutcome::Partial {
            stored: self.stored,
            failed: self.failed,
            error: self
                .first_error
                .clone()
                .unwrap_or_else(|| "record rejected".to_string()),
        }
    }
}

impl CollectionSyncEntry {
    pub fn from_outcome(outcome: &CollectionOutcome, now: DateTime<Utc>) -> Self {
        match outcome {
            CollectionOutcome::Syncing => CollectionSyncEntry {
                status: CollectionState::Syncing,
                ..Default::default()
            },
            CollectionOutcome::Success(count) => CollectionSyncEntry {
                status: CollectionState::Success,
                count: *count,
                error: None,
                synced_at: Some(now),
            },
            CollectionOutcome::Partial {
                stored,
                failed,
                error,
            } => CollectionSyncEntry {
                status: CollectionState::Failed,
                count: *stored,
                error: Some(format!(
                    "{} of {} records failed: {}",
                    failed,
                    stored + failed,
                    error
                )),
                synced_at: Some(now),
            },
            CollectionOutcome::Failed(error) => CollectionSyncEntry {
                status: CollectionState::Failed,
                count: 0,
                error: Some(error.clone()),
                synced_at: None,
            },
        }
    }
}

/// Sync lease. Held by one owner until it is released or `lock_expiry` passes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncLock {
    pub locked: bool,
    pub locked_by: Option<String>,
    pub lock_expiry: Option<DateTime<Utc>>,
}

impl SyncLock {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.locked && self.lock_expiry.is_some_and(|expiry| expiry > now)
    }

    pub fn is_held_by(&self, owner: &str) -> bool {
        self.locked && self.locked_by.as_deref() == Some(owner)
    }
}

pub type CollectionEntries = BTreeMap<SyncCollection, CollectionSyncEntry>;

fn pending_collections() -> CollectionEntries {
    SyncCollection::ALL
        .into_iter()
        .map(|c| (c, CollectionSyncEntry::default()))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantSyncStatus {
    pub id: Uuid,
    pub tenant_id: String,
    pub status: SyncState,
    pub phase: Option<SyncPhase>,
    pub lock: SyncLock,
    pub collections: CollectionEntries,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub error_code: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for TenantSyncStatus {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let locked_by: Option<String> = row.try_get("locked_by")?;
        let collections: sqlx::types::Json<CollectionEntries> = row.try_get("collections")?;
        let mut entries = pending_collections();
        entries.extend(collections.0);
        Ok(TenantSyncStatus {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            status: row.try_get("status")?,
            phase: row.try_get("phase")?,
            lock: SyncLock {
                locked: locked_by.is_some(),
                locked_by,
                lock_expiry: row.try_get("lock_expiry")?,
            },
            collections: entries,
            attempts: row.try_get("attempts")?,
            last_error: row.try_get("last_error")?,
            error_code: row.try_get("error_code")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            duration_ms: row.try_get("duration_ms")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TenantSyncStatus {
    pub fn new(tenant_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            status: SyncState::Pending,
            phase: None,
            lock: SyncLock::default(),
            collections: pending_collections(),
            attempts: 0,
            last_error: None,
            error_code: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == SyncState::Completed && self.completed_at.is_some()
    }

    /// Take the lease unless another owner holds a live one. Re-acquiring an owned
    /// lease extends it.
    pub fn try_acquire(&mut self, owner: &str, ttl: Duration, now: DateTime<Utc>) -> bool {
        if self.lock.is_live(now) && !self.lock.is_held_by(owner) {
            return false;
        }
        self.lock = SyncLock {
            locked: true,
            locked_by: Some(owner.to_string()),
            lock_expiry: Some(now + ttl),
        };
        self.updated_at = now;
        true
    }

    pub fn release(&mut self, owner: &str, now: DateTime<Utc>) -> bool {
        if !self.lock.is_held_by(owner) {
            return false;
        }
        self.lock = SyncLock::default();
        self.updated_at = now;
        true
    }

    pub fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.status = SyncState::Syncing;
        self.phase = Some(SyncPhase::Independent);
        self.attempts += 1;
        self.last_error = None;
        self.error_code = None;
        self.started_at = Some(now);
        self.completed_at = None;
        self.duration_ms = None;
        self.collections = pending_collections();
        self.updated_at = now;
    }

    pub fn set_phase(&mut self, phase: SyncPhase, now: DateTime<Utc>) {
        self.phase = Some(phase);
        self.updated_at = now;
    }

    pub fn record(
        &mut self,
        collection: SyncCollection,
        outcome: &CollectionOutcome,
        now: DateTime<Utc>,
    ) {
        self.collections
            .insert(collection, CollectionSyncEntry::from_outcome(outcome, now));
        self.updated_at = now;
    }

    /// Owner-checked completion; releases the lease.
    pub fn complete(&mut self, owner: &str, now: DateTime<Utc>) -> bool {
        if !self.lock.is_held_by(owner) {
            return false;
        }
        self.status = SyncState::Completed;
        self.completed_at = Some(now);
        self.duration_ms = self.started_at.map(|s| (now - s).num_milliseconds());
        self.lock = SyncLock::default();
        self.updated_at = now;
        true
    }

    /// Owner-checked failure; releases the lease.
    pub fn fail(
        &mut self,
        owner: &str,
        reason: &str,
        kind: SyncErrorKind,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.lock.is_held_by(owner) {
            return false;
        }
        self.status = SyncState::Failed;
        self.last_error = Some(reason.to_string());
        self.error_code = Some(kind.as_str().to_string());
        self.lock = SyncLock::default();
        self.updated_at = now;
        true
    }

    /// Return the record to `pending` so the next sync runs in full.
    pub fn reset(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        if self.lock.is_live(now) {
            return Err(AppError::Conflict(format!(
                "Sync for tenant {} is in progress",
                self.tenant_id
            )));
        }
        self.status = SyncState::Pending;
        self.phase = None;
        self.lock = SyncLock::default();
        self.collections = pending_collections();
        self.last_error = None;
        self.error_code = None;
        self.started_at = None;
        self.completed_at = None;
        self.duration_ms = None;
        self.updated_at = now;
        Ok(())
    }

    pub fn failed_collections(&self) -> Vec<SyncCollection> {
        self.collections
            .iter()
            .filter(|(_, entry)| entry.status == CollectionState::Failed)
            .map(|(collection, _)| *collection)
            .collect()
    }

    pub fn notice(&self) -> Option<SyncNotice> {
        let failed = self.failed_collections();
        if failed.is_empty() {
            return None;
        }
        Some(SyncNotice {
            message: format!(
                "Some records failed to sync: {}",
                failed
                    .iter()
                    .map(SyncCollection::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            failed_collections: failed,
        })
    }
}

/// "Some records failed to sync" notice surfaced after login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncNotice {
    pub message: String,
    pub failed_collections: Vec<SyncCollection>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EssentialStats {
    pub tenant: u64,
    pub organizations: u64,
    pub roles: u64,
    pub users: u64,
    pub total_records: u64,
}

impl EssentialStats {
    pub fn new(tenant: u64, organizations: u64, roles: u64, users: u64) -> Self {
        Self {
            tenant,
            organizations,
            roles,
            users,
            total_records: tenant + organizations + roles + users,
        }
    }
}

/// Answer of a sync request, as consumed by the authentication flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub already_synced: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<EssentialStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_sync_started: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_status: Option<TenantSyncStatus>,
}

impl SyncOutcome {
    pub fn already_synced(status: TenantSyncStatus) -> Self {
        Self {
            success: true,
            already_synced: Some(true),
            sync_status: Some(status),
            ..Default::default()
        }
    }

    pub fn started(stats: EssentialStats) -> Self {
        Self {
            success: true,
            stats: Some(stats),
            background_sync_started: Some(true),
            ..Default::default()
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}
