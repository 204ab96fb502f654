//! Applying organization-assignment events
//!
//! Every event names its organization by code. The organization must exist in the
//! tenant's data before anything is written; otherwise the event is dropped. Writes
//! are idempotent: a replayed `created` event matches the existing row by
//! assignment id or by its active (user, organization) pair and does nothing.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crmsync_core::models::{
    AssignmentEvent, AssignmentKey, AssignmentPatch, EmployeeAssignmentUpsert,
    EmployeeOrgAssignment, NewAssignment, Reference,
};
use crmsync_core::AppError;
use crmsync_db::AssignmentEventStore;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    OrganizationNotFound,
    Duplicate,
    AssignmentNotFound,
    NoChanges,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let reason = match self {
            SkipReason::OrganizationNotFound => "organization not found",
            SkipReason::Duplicate => "assignment already exists",
            SkipReason::AssignmentNotFound => "assignment not found",
            SkipReason::NoChanges => "no changes",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    Applied,
    Skipped(SkipReason),
}

/// Organization resolved for an event: internal id and the code as stored.
struct ResolvedOrganization {
    id: Uuid,
    code: String,
}

pub struct AssignmentEventHandler {
    store: Arc<dyn AssignmentEventStore>,
    org_retry_delay: Duration,
}

impl AssignmentEventHandler {
    pub fn new(store: Arc<dyn AssignmentEventStore>, org_retry_delay: Duration) -> Self {
        Self {
            store,
            org_retry_delay,
        }
    }

    #[tracing::instrument(
        skip(self, event),
        fields(
            event_type = %event.kind(),
            tenant_id = %event.key().tenant_id,
            assignment_id = %event.key().assignment_id,
        )
    )]
    pub async fn handle(&self, event: &AssignmentEvent) -> Result<HandleOutcome, AppError> {
        let key = event.key();
        let Some(org) = self.resolve_organization(key).await? else {
            tracing::warn!(
                organization_id = %key.organization_id,
                "Organization not found, dropping event"
            );
            return Ok(HandleOutcome::Skipped(SkipReason::OrganizationNotFound));
        };

        match event {
            AssignmentEvent::Created { key, assignment } => {
                self.create(key, assignment, &org).await
            }
            AssignmentEvent::Updated { key, changes } => self.update(key, changes, &org).await,
            AssignmentEvent::Deleted { key } => self.delete(key, &org).await,
            AssignmentEvent::Deactivated { key, by, at } => {
                self.set_active(key, &org, false, by.as_deref(), *at).await
            }
            AssignmentEvent::Activated { key, by, at } => {
                self.set_active(key, &org, true, by.as_deref(), *at).await
            }
        }
    }

    /// Exact code, then exact code again after the replication-lag delay, then a
    /// case-insensitive match.
    async fn resolve_organization(
        &self,
        key: &AssignmentKey,
    ) -> Result<Option<ResolvedOrganization>, AppError> {
        let code = key.organization_id.as_str();
        if let Some(id) = self.store.find_organization(&key.tenant_id, code).await? {
            return Ok(Some(ResolvedOrganization {
                id,
                code: code.to_string(),
            }));
        }

        tracing::debug!(
            organization_id = %code,
            delay_ms = self.org_retry_delay.as_millis() as u64,
            "Organization not found, retrying after delay"
        );
        tokio::time::sleep(self.org_retry_delay).await;

        if let Some(id) = self.store.find_organization(&key.tenant_id, code).await? {
            return Ok(Some(ResolvedOrganization {
                id,
                code: code.to_string(),
            }));
        }

        let found = self
            .store
            .find_organization_ci(&key.tenant_id, code)
            .await?
            .map(|(id, stored)| {
                tracing::info!(
                    organization_id = %code,
                    stored_code = %stored,
                    "Organization matched case-insensitively"
                );
                ResolvedOrganization { id, code: stored }
            });
        Ok(found)
    }

    /// Target of a mutation: by assignment id, else by (user, organization).
    async fn find_target(
        &self,
        key: &AssignmentKey,
        org: &ResolvedOrganization,
    ) -> Result<Option<EmployeeOrgAssignment>, AppError> {
        if let Some(found) = self
            .store
            .find_assignment(&key.tenant_id, &key.assignment_id)
            .await?
        {
            return Ok(Some(found));
        }
        let found = self
            .store
            .find_by_user_org(&key.tenant_id, &key.user_id, &org.code)
            .await?;
        if let Some(found) = &found {
            tracing::debug!(
                stored_assignment_id = %found.assignment_id,
                "Assignment matched by user and organization"
            );
        }
        Ok(found)
    }

    async fn create(
        &self,
        key: &AssignmentKey,
        assignment: &NewAssignment,
        org: &ResolvedOrganization,
    ) -> Result<HandleOutcome, AppError> {
        if self
            .store
            .find_assignment(&key.tenant_id, &key.assignment_id)
            .await?
            .is_some()
        {
            tracing::debug!("Assignment id already stored");
            return Ok(HandleOutcome::Skipped(SkipReason::Duplicate));
        }

        if let Some(existing) = self
            .store
            .find_by_user_org(&key.tenant_id, &key.user_id, &org.code)
            .await?
            .filter(|a| a.is_active)
        {
            tracing::debug!(
                stored_assignment_id = %existing.assignment_id,
                "Active assignment for user and organization already stored"
            );
            return Ok(HandleOutcome::Skipped(SkipReason::Duplicate));
        }

        let user = match self.store.find_user(&key.tenant_id, &key.user_id).await? {
            Some(id) => Reference::resolved(id, key.user_id.as_str()),
            None => Reference::pending(key.user_id.as_str()),
        };

        let record = EmployeeAssignmentUpsert {
            assignment_id: key.assignment_id.clone(),
            user,
            organization: Reference::resolved(org.id, org.code.as_str()),
            assignment_type: assignment.assignment_type.clone(),
            assigned_at: assignment.assigned_at.unwrap_or_else(Utc::now),
            assigned_by: assignment.assigned_by.clone(),
            expires_at: assignment.expires_at,
            is_active: assignment.is_active,
            priority: assignment.priority,
            metadata: assignment.metadata.clone(),
        };

        match self.store.insert_assignment(&key.tenant_id, &record).await? {
            Some(stored) => {
                tracing::info!(id = %stored.id, "Assignment created");
                Ok(HandleOutcome::Applied)
            }
            None => Ok(HandleOutcome::Skipped(SkipReason::Duplicate)),
        }
    }

    async fn update(
        &self,
        key: &AssignmentKey,
        changes: &AssignmentPatch,
        org: &ResolvedOrganization,
    ) -> Result<HandleOutcome, AppError> {
        if changes.is_empty() {
            return Ok(HandleOutcome::Skipped(SkipReason::NoChanges));
        }
        let Some(target) = self.find_target(key, org).await? else {
            tracing::warn!("Assignment to update not found");
            return Ok(HandleOutcome::Skipped(SkipReason::AssignmentNotFound));
        };
        match self.store.update_assignment(target.id, changes).await? {
            Some(_) => {
                tracing::info!(id = %target.id, "Assignment updated");
                Ok(HandleOutcome::Applied)
            }
            None => Ok(HandleOutcome::Skipped(SkipReason::AssignmentNotFound)),
        }
    }

    async fn delete(
        &self,
        key: &AssignmentKey,
        org: &ResolvedOrganization,
    ) -> Result<HandleOutcome, AppError> {
        let Some(target) = self.find_target(key, org).await? else {
            tracing::debug!("Assignment to delete not found");
            return Ok(HandleOutcome::Skipped(SkipReason::AssignmentNotFound));
        };
        if self.store.delete_assignment(target.id).await? {
            tracing::info!(id = %target.id, "Assignment deleted");
            Ok(HandleOutcome::Applied)
        } else {
            Ok(HandleOutcome::Skipped(SkipReason::AssignmentNotFound))
        }
    }

    async fn set_active(
        &self,
        key: &AssignmentKey,
        org: &ResolvedOrganization,
        active: bool,
        by: Option<&str>,
        at: Option<DateTime<Utc>>,
    ) -> Result<HandleOutcome, AppError> {
        let Some(target) = self.find_target(key, org).await? else {
            tracing::warn!(active, "Assignment to toggle not found");
            return Ok(HandleOutcome::Skipped(SkipReason::AssignmentNotFound));
        };
        let at = at.unwrap_or_else(Utc::now);
        match self
            .store
            .set_assignment_active(target.id, active, by, at)
            .await?
        {
            Some(_) => {
                tracing::info!(id = %target.id, active, "Assignment active flag changed");
                Ok(HandleOutcome::Applied)
            }
            None => Ok(HandleOutcome::Skipped(SkipReason::AssignmentNotFound)),
        }
    }
}
