//! Store trait abstractions
//!
//! The orchestrator and the assignment consumer are written against these traits so
//! they can run on PostgreSQL in production and on the in-memory stores of
//! [`crate::test_helpers`] in tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use crmsync_core::models::{
    AssignmentPatch, CollectionOutcome, CreditConfigUpsert, EmployeeAssignmentUpsert,
    EmployeeOrgAssignment, EntityCreditUpsert, EssentialStats, OrganizationUpsert,
    ReferenceMaps, RoleAssignmentUpsert, RoleUpsert, StoreReport, SyncCollection, SyncPhase, TenantSyncStatus,
    TenantUpsert, UserUpsert,
};
use crmsync_core::{AppError, SyncErrorKind};
use uuid::Uuid;

/// Independent collections written by the essential phase.
#[derive(Debug, Clone, PartialEq)]
pub struct EssentialData {
    pub tenant: TenantUpsert,
    pub organizations: Vec<OrganizationUpsert>,
    pub roles: Vec<RoleUpsert>,
    pub users: Vec<UserUpsert>,
}

/// Outcome of the post-sync relink pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Pending references upgraded to resolved ones.
    pub resolved_references: u64,
    /// User profiles whose assignment list was rewritten.
    pub users_linked: u64,
}

/// Writer for the synced tenant collections.
#[async_trait]
pub trait TenantDataStore: Send + Sync {
    /// Store tenant, organizations, roles and users in one transaction. Either all
    /// four are persisted or none is.
    async fn store_essential(
        &self,
        tenant_id: &str,
        data: &EssentialData,
    ) -> Result<EssentialStats, AppError>;

    /// Key-to-id lookup tables of the tenant's persisted independent collections.
    async fn load_reference_maps(&self, tenant_id: &str) -> Result<ReferenceMaps, AppError>;

    /// Dependent writers store record by record. They fail outright only when no
    /// record could be stored; rejected records are tallied in the report.
    async fn store_employee_assignments(
        &self,
        tenant_id: &str,
        records: &[EmployeeAssignmentUpsert],
    ) -> Result<StoreReport, AppError>;

    async fn store_role_assignments(
        &self,
        tenant_id: &str,
        records: &[RoleAssignmentUpsert],
    ) -> Result<StoreReport, AppError>;

    async fn store_credit_configs(
        &self,
        tenant_id: &str,
        records: &[CreditConfigUpsert],
    ) -> Result<StoreReport, AppError>;

    async fn store_entity_credits(
        &self,
        tenant_id: &str,
        records: &[EntityCreditUpsert],
    ) -> Result<StoreReport, AppError>;

    /// Upgrade pending references whose referent now exists, then rewrite each
    /// user profile's list of active assignment ids.
    async fn link_user_assignments(&self, tenant_id: &str) -> Result<LinkStats, AppError>;
}

/// Persistence of the per-tenant sync status record and its lease.
///
/// Every mutating call that takes an `owner` only applies while that owner holds
/// the lease and reports whether it did.
#[async_trait]
pub trait SyncStatusStore: Send + Sync {
    async fn get(&self, tenant_id: &str) -> Result<Option<TenantSyncStatus>, AppError>;

    /// Fetch the record, creating a pending one if none exists. Safe to race.
    async fn get_or_create(&self, tenant_id: &str) -> Result<TenantSyncStatus, AppError>;

    /// Atomically take the lease if it is free, expired or already ours. Returns
    /// the updated record on success and `None` when another owner holds it.
    async fn try_acquire_lock(
        &self,
        tenant_id: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<Option<TenantSyncStatus>, AppError>;

    async fn release_lock(&self, tenant_id: &str, owner: &str) -> Result<bool, AppError>;

    /// Enter `syncing(independent)` and count the attempt.
    async fn begin_attempt(&self, tenant_id: &str, owner: &str) -> Result<bool, AppError>;

    async fn set_phase(
        &self,
        tenant_id: &str,
        owner: &str,
        phase: SyncPhase,
    ) -> Result<bool, AppError>;

    async fn record_collection(
        &self,
        tenant_id: &str,
        owner: &str,
        collection: SyncCollection,
        outcome: &CollectionOutcome,
    ) -> Result<bool, AppError>;

    /// Mark the run completed and release the lease.
    async fn mark_completed(&self, tenant_id: &str, owner: &str) -> Result<bool, AppError>;

    /// Mark the run failed with a reason and release the lease.
    async fn mark_failed(
        &self,
        tenant_id: &str,
        owner: &str,
        reason: &str,
        kind: SyncErrorKind,
    ) -> Result<bool, AppError>;

    /// Return the record to `pending`. Fails with `Conflict` while a live lease is
    /// held; `None` when the tenant has no record.
    async fn reset(&self, tenant_id: &str) -> Result<Option<TenantSyncStatus>, AppError>;
}

/// Data access used by the organization-assignment event consumer.
#[async_trait]
pub trait AssignmentEventStore: Send + Sync {
    /// Exact org-code lookup.
    async fn find_organization(
        &self,
        tenant_id: &str,
        org_code: &str,
    ) -> Result<Option<Uuid>, AppError>;

    /// Case-insensitive org-code lookup returning the stored code.
    async fn find_organization_ci(
        &self,
        tenant_id: &str,
        org_code: &str,
    ) -> Result<Option<(Uuid, String)>, AppError>;

    async fn find_user(&self, tenant_id: &str, user_id: &str) -> Result<Option<Uuid>, AppError>;

    async fn find_assignment(
        &self,
        tenant_id: &str,
        assignment_id: &str,
    ) -> Result<Option<EmployeeOrgAssignment>, AppError>;

    /// Assignment of `user_id` to `org_code`, active rows first, then most recent.
    async fn find_by_user_org(
        &self,
        tenant_id: &str,
        user_id: &str,
        org_code: &str,
    ) -> Result<Option<EmployeeOrgAssignment>, AppError>;

    /// Insert unless the assignment id already exists; `None` on conflict.
    async fn insert_assignment(
        &self,
        tenant_id: &str,
        assignment: &EmployeeAssignmentUpsert,
    ) -> Result<Option<EmployeeOrgAssignment>, AppError>;

    async fn update_assignment(
        &self,
        id: Uuid,
        patch: &AssignmentPatch,
    ) -> Result<Option<EmployeeOrgAssignment>, AppError>;

    async fn delete_assignment(&self, id: Uuid) -> Result<bool, AppError>;

    async fn set_assignment_active(
        &self,
        id: Uuid,
        active: bool,
        by: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<EmployeeOrgAssignment>, AppError>;
}
