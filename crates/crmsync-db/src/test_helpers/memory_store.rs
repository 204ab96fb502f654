//! In-memory store implementations for testing
//!
//! These stores follow the same rules as the PostgreSQL repositories (natural-key
//! upserts, two-step organization parents, owner-checked lease) without a database.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use crmsync_core::models::{
    plan_parent_links, AssignmentPatch, CollectionOutcome, CreditConfig, CreditConfigUpsert,
    CrmRoleAssignment, EmployeeAssignmentUpsert, EmployeeOrgAssignment, EntityCredit,
    EntityCreditUpsert, EssentialStats, Organization, Reference, ReferenceMaps, Role,
    RoleAssignmentUpsert, StoreReport, SyncCollection, SyncPhase, Tenant, TenantSyncStatus,
    UserProfile,
};
use crmsync_core::{AppError, SyncErrorKind};
use uuid::Uuid;

use crate::store_traits::{
    AssignmentEventStore, EssentialData, LinkStats, SyncStatusStore, TenantDataStore,
};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Same contract as the per-record PostgreSQL writers: an error only when nothing
/// was stored.
fn finish(report: StoreReport, first_error: Option<AppError>) -> Result<StoreReport, AppError> {
    match first_error {
        Some(e) if report.stored == 0 => Err(e),
        _ => Ok(report),
    }
}

fn injected(collection: SyncCollection) -> AppError {
    AppError::Internal(format!("injected failure storing {}", collection))
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tenants: Vec<Tenant>,
    organizations: Vec<Organization>,
    roles: Vec<Role>,
    users: Vec<UserProfile>,
    employee_assignments: Vec<EmployeeOrgAssignment>,
    role_assignments: Vec<CrmRoleAssignment>,
    credit_configs: Vec<CreditConfig>,
    entity_credits: Vec<EntityCredit>,
}

impl MemoryState {
    fn reference_maps(&self, tenant_id: &str) -> ReferenceMaps {
        ReferenceMaps {
            organizations: self
                .organizations
                .iter()
                .filter(|o| o.tenant_id == tenant_id)
                .map(|o| (o.org_code.clone(), o.id))
                .collect(),
            roles: self
                .roles
                .iter()
                .filter(|r| r.tenant_id == tenant_id)
                .map(|r| (r.role_id.clone(), r.id))
                .collect(),
            users: self
                .users
                .iter()
                .filter(|u| u.tenant_id == tenant_id)
                .map(|u| (u.user_id.clone(), u.id))
                .collect(),
        }
    }

    fn write_essential(&mut self, tenant_id: &str, data: &EssentialData, now: DateTime<Utc>) {
        let tenant = &data.tenant;
        match self.tenants.iter_mut().find(|t| t.tenant_id == tenant.tenant_id) {
            Some(existing) => {
                existing.name = tenant.name.clone();
                existing.status = tenant.status;
                existing.settings = tenant.settings.clone();
                existing.subscription = tenant.subscription.clone();
                existing.last_synced_at = now;
                existing.updated_at = now;
            }
            None => self.tenants.push(Tenant {
                id: Uuid::new_v4(),
                tenant_id: tenant.tenant_id.clone(),
                name: tenant.name.clone(),
                status: tenant.status,
                settings: tenant.settings.clone(),
                subscription: tenant.subscription.clone(),
                last_synced_at: now,
                created_at: now,
                updated_at: now,
            }),
        }

        for org in &data.organizations {
            let parent = org.parent_code.clone().map(Reference::pending);
            match self
                .organizations
                .iter_mut()
                .find(|o| o.tenant_id == tenant_id && o.org_code == org.org_code)
            {
                Some(existing) => {
                    existing.name = org.name.clone();
                    existing.status = org.status.clone();
                    existing.level = org.level;
                    existing.path = org.path.clone();
                    existing.description = org.description.clone();
                    if existing.parent.as_ref().map(Reference::key) != org.parent_code.as_deref() {
                        existing.parent = parent;
                    }
                    existing.last_synced_at = now;
                    existing.updated_at = now;
                }
                None => self.organizations.push(Organization {
                    id: Uuid::new_v4(),
                    tenant_id: tenant_id.to_string(),
                    org_code: org.org_code.clone(),
                    name: org.name.clone(),
                    status: org.status.clone(),
                    level: org.level,
                    path: org.path.clone(),
                    description: org.description.clone(),
                    parent,
                    last_synced_at: now,
                    created_at: now,
                    updated_at: now,
                }),
            }
        }

        // Second step: resolve parents once every organization of the batch exists.
        let ids = self.reference_maps(tenant_id).organizations;
        for (child, parent) in plan_parent_links(&data.organizations, &ids) {
            if let Some(org) = self.organizations.iter_mut().find(|o| o.id == child) {
                let key = org.parent.as_ref().map(|p| p.key().to_string()).unwrap_or_default();
                org.parent = Some(Reference::resolved(parent, key));
            }
        }

        for role in &data.roles {
            match self
                .roles
                .iter_mut()
                .find(|r| r.tenant_id == tenant_id && r.role_id == role.role_id)
            {
                Some(existing) => {
                    existing.name = role.name.clone();
                    existing.permissions = role.permissions.clone();
                    existing.priority = role.priority;
                    existing.is_active = role.is_active;
                    existing.description = role.description.clone();
                    existing.last_synced_at = now;
                    existing.updated_at = now;
                }
                None => self.roles.push(Role {
                    id: Uuid::new_v4(),
                    tenant_id: tenant_id.to_string(),
                    role_id: role.role_id.clone(),
                    name: role.name.clone(),
                    permissions: role.permissions.clone(),
                    priority: role.priority,
                    is_active: role.is_active,
                    description: role.description.clone(),
                    last_synced_at: now,
                    created_at: now,
                    updated_at: now,
                }),
            }
        }
    }

    fn write_users(&mut self, tenant_id: &str, data: &EssentialData, now: DateTime<Utc>) {
        for user in &data.users {
            match self
                .users
                .iter_mut()
                .find(|u| u.tenant_id == tenant_id && u.user_id == user.user_id)
            {
                Some(existing) => {
                    existing.employee_code = user.employee_code.clone();
                    existing.first_name = user.first_name.clone();
                    existing.last_name = user.last_name.clone();
                    existing.email = user.email.clone();
                    existing.is_active = user.is_active;
                    existing.last_synced_at = now;
                    existing.updated_at = now;
                }
                None => self.users.push(UserProfile {
                    id: Uuid::new_v4(),
                    tenant_id: tenant_id.to_string(),
                    user_id: user.user_id.clone(),
                    employee_code: user.employee_code.clone(),
                    first_name: user.first_name.clone(),
                    last_name: user.last_name.clone(),
                    email: user.email.clone(),
                    is_active: user.is_active,
                    assignment_ids: Vec::new(),
                    last_synced_at: now,
                    created_at: now,
                    updated_at: now,
                }),
            }
        }
    }

    fn upsert_employee_assignment(
        &mut self,
        tenant_id: &str,
        a: &EmployeeAssignmentUpsert,
        now: DateTime<Utc>,
    ) -> Result<EmployeeOrgAssignment, AppError> {
        let conflict = self.employee_assignments.iter().any(|e| {
            e.tenant_id == tenant_id
                && e.assignment_id != a.assignment_id
                && e.is_active
                && a.is_active
                && e.user.key() == a.user.key()
                && e.organization.key() == a.organization.key()
        });
        if conflict {
            return Err(AppError::Conflict(format!(
                "active assignment of {} to {} already exists",
                a.user.key(),
                a.organization.key()
            )));
        }

        if let Some(existing) = self
            .employee_assignments
            .iter_mut()
            .find(|e| e.tenant_id == tenant_id && e.assignment_id == a.assignment_id)
        {
            existing.user = keep_resolved(&existing.user, &a.user);
            existing.organization = keep_resolved(&existing.organization, &a.organization);
            existing.assignment_type = a.assignment_type.clone();
            existing.assigned_at = a.assigned_at;
            existing.assigned_by = a.assigned_by.clone();
            existing.expires_at = a.expires_at;
            existing.is_active = a.is_active;
            existing.priority = a.priority;
            existing.metadata = a.metadata.clone();
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let stored = EmployeeOrgAssignment {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            assignment_id: a.assignment_id.clone(),
            user: a.user.clone(),
            organization: a.organization.clone(),
            assignment_type: a.assignment_type.clone(),
            assigned_at: a.assigned_at,
            assigned_by: a.assigned_by.clone(),
            expires_at: a.expires_at,
            is_active: a.is_active,
            deactivated_at: None,
            deactivated_by: None,
            priority: a.priority,
            metadata: a.metadata.clone(),
            created_at: now,
            updated_at: now,
        };
        self.employee_assignments.push(stored.clone());
        Ok(stored)
    }
}

/// A resolved reference with the same key is never downgraded by a later write.
fn keep_resolved(current: &Reference, incoming: &Reference) -> Reference {
    match (current, incoming) {
        (Reference::Resolved { key, .. }, Reference::Pending { key: new_key }) if key == new_key => {
            current.clone()
        }
        _ => incoming.clone(),
    }
}

/// In-memory tenant data store; also serves the assignment consumer's queries.
#[derive(Clone, Default)]
pub struct MemoryTenantStore {
    state: Arc<Mutex<MemoryState>>,
    failures: Arc<Mutex<HashSet<SyncCollection>>>,
    calls: Arc<Mutex<HashMap<&'static str, usize>>>,
}

impl MemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write of `collection` fail. Failing `Users` aborts the whole
    /// essential transaction.
    pub fn fail_on(&self, collection: SyncCollection) {
        guard(&self.failures).insert(collection);
    }

    pub fn clear_failures(&self) {
        guard(&self.failures).clear();
    }

    fn fails(&self, collection: SyncCollection) -> bool {
        guard(&self.failures).contains(&collection)
    }

    fn count_call(&self, name: &'static str) {
        *guard(&self.calls).entry(name).or_default() += 1;
    }

    pub fn calls(&self, name: &str) -> usize {
        guard(&self.calls).get(name).copied().unwrap_or_default()
    }

    pub fn seed_organization(&self, tenant_id: &str, org_code: &str) -> Uuid {
        let now = Utc::now();
        let org = Organization {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            org_code: org_code.to_string(),
            name: org_code.to_string(),
            status: "active".to_string(),
            level: None,
            path: None,
            description: None,
            parent: None,
            last_synced_at: now,
            created_at: now,
            updated_at: now,
        };
        let id = org.id;
        guard(&self.state).organizations.push(org);
        id
    }

    pub fn seed_user(&self, tenant_id: &str, user_id: &str) -> Uuid {
        let now = Utc::now();
        let user = UserProfile {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            employee_code: None,
            first_name: None,
            last_name: None,
            email: None,
            is_active: true,
            assignment_ids: Vec::new(),
            last_synced_at: now,
            created_at: now,
            updated_at: now,
        };
        let id = user.id;
        guard(&self.state).users.push(user);
        id
    }

    pub fn tenants(&self) -> Vec<Tenant> {
        guard(&self.state).tenants.clone()
    }

    pub fn organizations(&self, tenant_id: &str) -> Vec<Organization> {
        guard(&self.state)
            .organizations
            .iter()
            .filter(|o| o.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn roles(&self, tenant_id: &str) -> Vec<Role> {
        guard(&self.state)
            .roles
            .iter()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn users(&self, tenant_id: &str) -> Vec<UserProfile> {
        guard(&self.state)
            .users
            .iter()
            .filter(|u| u.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn employee_assignments(&self, tenant_id: &str) -> Vec<EmployeeOrgAssignment> {
        guard(&self.state)
            .employee_assignments
            .iter()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn role_assignments(&self, tenant_id: &str) -> Vec<CrmRoleAssignment> {
        guard(&self.state)
            .role_assignments
            .iter()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn credit_configs(&self, tenant_id: &str) -> Vec<CreditConfig> {
        guard(&self.state)
            .credit_configs
            .iter()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn entity_credits(&self, tenant_id: &str) -> Vec<EntityCredit> {
        guard(&self.state)
            .entity_credits
            .iter()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TenantDataStore for MemoryTenantStore {
    async fn store_essential(
        &self,
        tenant_id: &str,
        data: &EssentialData,
    ) -> Result<EssentialStats, AppError> {
        self.count_call("store_essential");
        let now = Utc::now();
        let mut state = guard(&self.state);

        // Work on a copy and swap it in at the end, like a committed transaction.
        let mut staged = state.clone();
        staged.write_essential(tenant_id, data, now);
        if self.fails(SyncCollection::Users) {
            return Err(injected(SyncCollection::Users));
        }
        staged.write_users(tenant_id, data, now);
        *state = staged;

        Ok(EssentialStats::new(
            1,
            data.organizations.len() as u64,
            data.roles.len() as u64,
            data.users.len() as u64,
        ))
    }

    async fn load_reference_maps(&self, tenant_id: &str) -> Result<ReferenceMaps, AppError> {
        self.count_call("load_reference_maps");
        Ok(guard(&self.state).reference_maps(tenant_id))
    }

    async fn store_employee_assignments(
        &self,
        tenant_id: &str,
        records: &[EmployeeAssignmentUpsert],
    ) -> Result<StoreReport, AppError> {
        self.count_call("store_employee_assignments");
        if self.fails(SyncCollection::EmployeeAssignments) {
            return Err(injected(SyncCollection::EmployeeAssignments));
        }
        let now = Utc::now();
        let mut state = guard(&self.state);
        let mut report = StoreReport::default();
        let mut first_error = None;
        for record in records {
            match state.upsert_employee_assignment(tenant_id, record, now) {
                Ok(_) => report.stored_one(),
                Err(e) => {
                    report.failed_one(&e);
                    first_error.get_or_insert(e);
                }
            }
        }
        finish(report, first_error)
    }

    async fn store_role_assignments(
        &self,
        tenant_id: &str,
        records: &[RoleAssignmentUpsert],
    ) -> Result<StoreReport, AppError> {
        self.count_call("store_role_assignments");
        if self.fails(SyncCollection::RoleAssignments) {
            return Err(injected(SyncCollection::RoleAssignments));
        }
        let now = Utc::now();
        let mut state = guard(&self.state);
        let mut report = StoreReport::default();
        let mut first_error = None;
        for a in records {
            let conflict = state.role_assignments.iter().any(|r| {
                r.tenant_id == tenant_id
                    && r.assignment_id != a.assignment_id
                    && r.is_active
                    && a.is_active
                    && r.user.key() == a.user.key()
                    && r.role.key() == a.role.key()
                    && r.organization.as_ref().map(Reference::key)
                        == a.organization.as_ref().map(Reference::key)
            });
            if conflict {
                let e = AppError::Conflict(format!(
                    "active role assignment of {} to {} already exists",
                    a.user.key(),
                    a.role.key()
                ));
                report.failed_one(&e);
                first_error.get_or_insert(e);
                continue;
            }
            report.stored_one();
            let row = CrmRoleAssignment {
                id: Uuid::new_v4(),
                tenant_id: tenant_id.to_string(),
                assignment_id: a.assignment_id.clone(),
                user: a.user.clone(),
                role: a.role.clone(),
                organization: a.organization.clone(),
                assigned_at: a.assigned_at,
                assigned_by: a.assigned_by.clone(),
                expires_at: a.expires_at,
                is_active: a.is_active,
                created_at: now,
                updated_at: now,
            };
            match state
                .role_assignments
                .iter_mut()
                .find(|r| r.tenant_id == tenant_id && r.assignment_id == a.assignment_id)
            {
                Some(existing) => {
                    *existing = CrmRoleAssignment {
                        id: existing.id,
                        created_at: existing.created_at,
                        ..row
                    }
                }
                None => state.role_assignments.push(row),
            }
        }
        finish(report, first_error)
    }

    async fn store_credit_configs(
        &self,
        tenant_id: &str,
        records: &[CreditConfigUpsert],
    ) -> Result<StoreReport, AppError> {
        self.count_call("store_credit_configs");
        if self.fails(SyncCollection::CreditConfigs) {
            return Err(injected(SyncCollection::CreditConfigs));
        }
        let now = Utc::now();
        let mut state = guard(&self.state);
        for c in records {
            let row = CreditConfig {
                id: Uuid::new_v4(),
                tenant_id: tenant_id.to_string(),
                config_id: c.config_id.clone(),
                config_name: c.config_name.clone(),
                operation_code: c.operation_code.clone(),
                credit_cost: c.credit_cost,
                organization: c.organization.clone(),
                is_active: c.is_active,
                description: c.description.clone(),
                created_at: now,
                updated_at: now,
            };
            match state
                .credit_configs
                .iter_mut()
                .find(|x| x.tenant_id == tenant_id && x.config_id == c.config_id)
            {
                Some(existing) => {
                    *existing = CreditConfig {
                        id: existing.id,
                        created_at: existing.created_at,
                        ..row
                    }
                }
                None => state.credit_configs.push(row),
            }
        }
        Ok(StoreReport::all(records.len() as u64))
    }

    async fn store_entity_credits(
        &self,
        tenant_id: &str,
        records: &[EntityCreditUpsert],
    ) -> Result<StoreReport, AppError> {
        self.count_call("store_entity_credits");
        if self.fails(SyncCollection::EntityCredits) {
            return Err(injected(SyncCollection::EntityCredits));
        }
        let now = Utc::now();
        let mut state = guard(&self.state);
        for c in records {
            let row = EntityCredit {
                id: Uuid::new_v4(),
                tenant_id: tenant_id.to_string(),
                entity: c.entity.clone(),
                allocated_credits: c.allocated_credits,
                used_credits: c.used_credits,
                available_credits: c.available_credits,
                expires_at: c.expires_at,
                is_active: c.is_active,
                created_at: now,
                updated_at: now,
            };
            match state
                .entity_credits
                .iter_mut()
                .find(|x| x.tenant_id == tenant_id && x.entity.key() == c.entity.key())
            {
                Some(existing) => {
                    *existing = EntityCredit {
                        id: existing.id,
                        created_at: existing.created_at,
                        ..row
                    }
                }
                None => state.entity_credits.push(row),
            }
        }
        Ok(StoreReport::all(records.len() as u64))
    }

    async fn link_user_assignments(&self, tenant_id: &str) -> Result<LinkStats, AppError> {
        self.count_call("link_user_assignments");
        let mut state = guard(&self.state);
        let maps = state.reference_maps(tenant_id);
        let mut stats = LinkStats::default();

        let mut resolve = |reference: &mut Reference, lookup: &HashMap<String, Uuid>| {
            if !reference.is_resolved() {
                *reference = reference.clone().resolve(lookup);
                if reference.is_resolved() {
                    stats.resolved_references += 1;
                }
            }
        };

        for a in state
            .employee_assignments
            .iter_mut()
            .filter(|a| a.tenant_id == tenant_id)
        {
            resolve(&mut a.user, &maps.users);
            resolve(&mut a.organization, &maps.organizations);
        }
        for a in state
            .role_assignments
            .iter_mut()
            .filter(|a| a.tenant_id == tenant_id)
        {
            resolve(&mut a.user, &maps.users);
            resolve(&mut a.role, &maps.roles);
            if let Some(org) = a.organization.as_mut() {
                resolve(org, &maps.organizations);
            }
        }
        for c in state
            .credit_configs
            .iter_mut()
            .filter(|c| c.tenant_id == tenant_id)
        {
            if let Some(org) = c.organization.as_mut() {
                resolve(org, &maps.organizations);
            }
        }
        for c in state
            .entity_credits
            .iter_mut()
            .filter(|c| c.tenant_id == tenant_id)
        {
            resolve(&mut c.entity, &maps.organizations);
        }

        let mut links: HashMap<String, Vec<(i32, DateTime<Utc>, Uuid)>> = HashMap::new();
        for a in state
            .employee_assignments
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.is_active)
        {
            links
                .entry(a.user.key().to_string())
                .or_default()
                .push((a.priority, a.assigned_at, a.id));
        }
        for user in state.users.iter_mut().filter(|u| u.tenant_id == tenant_id) {
            let mut ids = links.remove(&user.user_id).unwrap_or_default();
            ids.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
            user.assignment_ids = ids.into_iter().map(|(_, _, id)| id).collect();
            stats.users_linked += 1;
        }

        Ok(stats)
    }
}

#[async_trait]
impl AssignmentEventStore for MemoryTenantStore {
    async fn find_organization(
        &self,
        tenant_id: &str,
        org_code: &str,
    ) -> Result<Option<Uuid>, AppError> {
        self.count_call("find_organization");
        Ok(guard(&self.state)
            .organizations
            .iter()
            .find(|o| o.tenant_id == tenant_id && o.org_code == org_code)
            .map(|o| o.id))
    }

    async fn find_organization_ci(
        &self,
        tenant_id: &str,
        org_code: &str,
    ) -> Result<Option<(Uuid, String)>, AppError> {
        self.count_call("find_organization_ci");
        Ok(guard(&self.state)
            .organizations
            .iter()
            .find(|o| o.tenant_id == tenant_id && o.org_code.eq_ignore_ascii_case(org_code))
            .map(|o| (o.id, o.org_code.clone())))
    }

    async fn find_user(&self, tenant_id: &str, user_id: &str) -> Result<Option<Uuid>, AppError> {
        Ok(guard(&self.state)
            .users
            .iter()
            .find(|u| u.tenant_id == tenant_id && u.user_id == user_id)
            .map(|u| u.id))
    }

    async fn find_assignment(
        &self,
        tenant_id: &str,
        assignment_id: &str,
    ) -> Result<Option<EmployeeOrgAssignment>, AppError> {
        Ok(guard(&self.state)
            .employee_assignments
            .iter()
            .find(|a| a.tenant_id == tenant_id && a.assignment_id == assignment_id)
            .cloned())
    }

    async fn find_by_user_org(
        &self,
        tenant_id: &str,
        user_id: &str,
        org_code: &str,
    ) -> Result<Option<EmployeeOrgAssignment>, AppError> {
        let state = guard(&self.state);
        let mut matches: Vec<&EmployeeOrgAssignment> = state
            .employee_assignments
            .iter()
            .filter(|a| {
                a.tenant_id == tenant_id
                    && a.user.key() == user_id
                    && a.organization.key() == org_code
            })
            .collect();
        matches.sort_by(|a, b| {
            b.is_active
                .cmp(&a.is_active)
                .then(b.updated_at.cmp(&a.updated_at))
        });
        Ok(matches.first().map(|a| (*a).clone()))
    }

    async fn insert_assignment(
        &self,
        tenant_id: &str,
        assignment: &EmployeeAssignmentUpsert,
    ) -> Result<Option<EmployeeOrgAssignment>, AppError> {
        self.count_call("insert_assignment");
        let mut state = guard(&self.state);
        if state
            .employee_assignments
            .iter()
            .any(|a| a.tenant_id == tenant_id && a.assignment_id == assignment.assignment_id)
        {
            return Ok(None);
        }
        state
            .upsert_employee_assignment(tenant_id, assignment, Utc::now())
            .map(Some)
    }

    async fn update_assignment(
        &self,
        id: Uuid,
        patch: &AssignmentPatch,
    ) -> Result<Option<EmployeeOrgAssignment>, AppError> {
        self.count_call("update_assignment");
        let mut state = guard(&self.state);
        Ok(state
            .employee_assignments
            .iter_mut()
            .find(|a| a.id == id)
            .map(|a| {
                patch.apply_to(a, Utc::now());
                a.clone()
            }))
    }

    async fn delete_assignment(&self, id: Uuid) -> Result<bool, AppError> {
        self.count_call("delete_assignment");
        let mut state = guard(&self.state);
        let before = state.employee_assignments.len();
        state.employee_assignments.retain(|a| a.id != id);
        Ok(state.employee_assignments.len() < before)
    }

    async fn set_assignment_active(
        &self,
        id: Uuid,
        active: bool,
        by: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<EmployeeOrgAssignment>, AppError> {
        self.count_call("set_assignment_active");
        let mut state = guard(&self.state);
        Ok(state
            .employee_assignments
            .iter_mut()
            .find(|a| a.id == id)
            .map(|a| {
                a.is_active = active;
                if active {
                    a.deactivated_at = None;
                    a.deactivated_by = None;
                } else {
                    a.deactivated_at = Some(at);
                    a.deactivated_by = by.map(str::to_string);
                }
                a.updated_at = Utc::now();
                a.clone()
            }))
    }
}

/// In-memory sync status store applying the [`TenantSyncStatus`] transitions.
#[derive(Clone, Default)]
pub struct MemorySyncStatusStore {
    records: Arc<Mutex<HashMap<String, TenantSyncStatus>>>,
}

impl MemorySyncStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record, e.g. to start from a completed sync.
    pub fn put(&self, status: TenantSyncStatus) {
        guard(&self.records).insert(status.tenant_id.clone(), status);
    }

    fn update<R>(
        &self,
        tenant_id: &str,
        f: impl FnOnce(&mut TenantSyncStatus, DateTime<Utc>) -> R,
    ) -> Option<R> {
        guard(&self.records)
            .get_mut(tenant_id)
            .map(|status| f(status, Utc::now()))
    }
}

#[async_trait]
impl SyncStatusStore for MemorySyncStatusStore {
    async fn get(&self, tenant_id: &str) -> Result<Option<TenantSyncStatus>, AppError> {
        Ok(guard(&self.records).get(tenant_id).cloned())
    }

    async fn get_or_create(&self, tenant_id: &str) -> Result<TenantSyncStatus, AppError> {
        Ok(guard(&self.records)
            .entry(tenant_id.to_string())
            .or_insert_with(|| TenantSyncStatus::new(tenant_id, Utc::now()))
            .clone())
    }

    async fn try_acquire_lock(
        &self,
        tenant_id: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<Option<TenantSyncStatus>, AppError> {
        Ok(self
            .update(tenant_id, |status, now| {
                status.try_acquire(owner, ttl, now).then(|| status.clone())
            })
            .flatten())
    }

    async fn release_lock(&self, tenant_id: &str, owner: &str) -> Result<bool, AppError> {
        Ok(self
            .update(tenant_id, |status, now| status.release(owner, now))
            .unwrap_or(false))
    }

    async fn begin_attempt(&self, tenant_id: &str, owner: &str) -> Result<bool, AppError> {
        Ok(self
            .update(tenant_id, |status, now| {
                if status.lock.is_held_by(owner) {
                    status.begin_attempt(now);
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false))
    }

    async fn set_phase(
        &self,
        tenant_id: &str,
        owner: &str,
        phase: SyncPhase,
    ) -> Result<bool, AppError> {
        Ok(self
            .update(tenant_id, |status, now| {
                if status.lock.is_held_by(owner) {
                    status.set_phase(phase, now);
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false))
    }

    async fn record_collection(
        &self,
        tenant_id: &str,
        owner: &str,
        collection: SyncCollection,
        outcome: &CollectionOutcome,
    ) -> Result<bool, AppError> {
        Ok(self
            .update(tenant_id, |status, now| {
                if status.lock.is_held_by(owner) {
                    status.record(collection, outcome, now);
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false))
    }

    async fn mark_completed(&self, tenant_id: &str, owner: &str) -> Result<bool, AppError> {
        Ok(self
            .update(tenant_id, |status, now| status.complete(owner, now))
            .unwrap_or(false))
    }

    async fn mark_failed(
        &self,
        tenant_id: &str,
        owner: &str,
        reason: &str,
        kind: SyncErrorKind,
    ) -> Result<bool, AppError> {
        Ok(self
            .update(tenant_id, |status, now| status.fail(owner, reason, kind, now))
            .unwrap_or(false))
    }

    async fn reset(&self, tenant_id: &str) -> Result<Option<TenantSyncStatus>, AppError> {
        self.update(tenant_id, |status, now| {
            status.reset(now).map(|()| status.clone())
        })
        .transpose()
    }
}
