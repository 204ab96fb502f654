//! Background phase: assignments and credits.
//!
//! Runs after the essential phase released its caller. Each dependent collection
//! is fetched and stored on its own, and its outcome is recorded on the status
//! row; one collection failing never stops the others. The run always ends by
//! marking the status completed, which also releases the lease.

use chrono::Utc;
use crmsync_core::models::{
    CollectionOutcome, CreditConfigUpsert, EmployeeAssignmentUpsert, EntityCreditUpsert,
    ReferenceMaps, RoleAssignmentUpsert, StoreReport, SyncCollection, WrapperCreditConfig,
    WrapperEmployeeAssignment, WrapperEntityCredit, WrapperRoleAssignment,
};
use crmsync_core::AppError;

use super::SyncContext;

type Fetched<T> = Result<Vec<T>, AppError>;

impl SyncContext {
    /// Entry point of the spawned task.
    pub(crate) async fn run_background(
        self,
        tenant_id: String,
        token: String,
        owner: String,
    ) -> Result<(), AppError> {
        let result = self.sync_dependent(&tenant_id, &token, &owner).await;

        match self.status.mark_completed(&tenant_id, &owner).await {
            Ok(true) => tracing::info!(tenant_id = %tenant_id, "Tenant sync completed"),
            Ok(false) => tracing::warn!(
                tenant_id = %tenant_id,
                owner = %owner,
                "Sync lease no longer held, completion not recorded"
            ),
            Err(e) => {
                tracing::error!(tenant_id = %tenant_id, error = %e, "Failed to mark sync completed")
            }
        }

        result
    }

    #[tracing::instrument(skip(self, token, owner), fields(tenant_id = %tenant_id))]
    async fn sync_dependent(
        &self,
        tenant_id: &str,
        token: &str,
        owner: &str,
    ) -> Result<(), AppError> {
        let maps = self
            .retry
            .run("load_reference_maps", move || {
                self.data.load_reference_maps(tenant_id)
            })
            .await?;

        for collection in SyncCollection::DEPENDENT {
            self.record(tenant_id, owner, collection, CollectionOutcome::Syncing)
                .await;
        }

        let api = &self.api;
        let (employees, role_assignments, credit_configs, entity_credits) = tokio::join!(
            self.retry.run("fetch_employee_assignments", move || {
                api.fetch_employee_assignments(tenant_id, token)
            }),
            self.retry.run("fetch_role_assignments", move || {
                api.fetch_role_assignments(tenant_id, token)
            }),
            self.retry.run("fetch_credit_configs", move || {
                api.fetch_credit_configs(tenant_id, token)
            }),
            self.retry.run("fetch_entity_credits", move || {
                api.fetch_entity_credits(tenant_id, token)
            }),
        );

        let (employees, role_assignments, credit_configs, entity_credits) = tokio::join!(
            self.store_employee_assignments(tenant_id, &maps, employees),
            self.store_role_assignments(tenant_id, &maps, role_assignments),
            self.store_credit_configs(tenant_id, &maps, credit_configs),
            self.store_entity_credits(tenant_id, &maps, entity_credits),
        );

        let results = [
            (SyncCollection::EmployeeAssignments, employees),
            (SyncCollection::RoleAssignments, role_assignments),
            (SyncCollection::CreditConfigs, credit_configs),
            (SyncCollection::EntityCredits, entity_credits),
        ];
        let mut failed = 0;
        for (collection, result) in results {
            let outcome = match result {
                Ok(report) if report.is_partial() => {
                    failed += 1;
                    tracing::warn!(
                        collection = %collection,
                        stored = report.stored,
                        rejected = report.failed,
                        error = ?report.first_error,
                        "Collection partially synced"
                    );
                    report.outcome()
                }
                Ok(report) => {
                    tracing::info!(collection = %collection, count = report.stored, "Collection synced");
                    report.outcome()
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        collection = %collection,
                        error = %e,
                        error_code = e.kind().as_str(),
                        "Collection sync failed"
                    );
                    CollectionOutcome::Failed(e.to_string())
                }
            };
            self.record(tenant_id, owner, collection, outcome).await;
        }

        match self.data.link_user_assignments(tenant_id).await {
            Ok(stats) => tracing::debug!(
                resolved_references = stats.resolved_references,
                users_linked = stats.users_linked,
                "User assignments linked"
            ),
            Err(e) => tracing::warn!(error = %e, "Linking user assignments failed, continuing"),
        }

        tracing::info!(failed_collections = failed, "Dependent data sync finished");
        Ok(())
    }

    async fn store_employee_assignments(
        &self,
        tenant_id: &str,
        maps: &ReferenceMaps,
        fetched: Fetched<WrapperEmployeeAssignment>,
    ) -> Result<StoreReport, AppError> {
        let now = Utc::now();
        let records: Vec<_> = fetched?
            .iter()
            .filter(|a| {
                let valid = !a.assignment_id.trim().is_empty()
                    && !a.user_id.trim().is_empty()
                    && !a.entity_id.trim().is_empty();
                if !valid {
                    tracing::warn!(assignment_id = %a.assignment_id, "Skipping incomplete employee assignment");
                }
                valid
            })
            .map(|a| EmployeeAssignmentUpsert::from_wrapper(a, maps, now))
            .collect();
        self.data
            .store_employee_assignments(tenant_id, &records)
            .await
    }

    async fn store_role_assignments(
        &self,
        tenant_id: &str,
        maps: &ReferenceMaps,
        fetched: Fetched<WrapperRoleAssignment>,
    ) -> Result<StoreReport, AppError> {
        let now = Utc::now();
        let records: Vec<_> = fetched?
            .iter()
            .filter(|a| {
                let valid = !a.user_id.trim().is_empty() && !a.role_id.trim().is_empty();
                if !valid {
                    tracing::warn!(assignment_id = ?a.assignment_id, "Skipping incomplete role assignment");
                }
                valid
            })
            .map(|a| RoleAssignmentUpsert::from_wrapper(a, maps, now))
            .collect();
        self.data.store_role_assignments(tenant_id, &records).await
    }

    async fn store_credit_configs(
        &self,
        tenant_id: &str,
        maps: &ReferenceMaps,
        fetched: Fetched<WrapperCreditConfig>,
    ) -> Result<StoreReport, AppError> {
        let records: Vec<_> = fetched?
            .iter()
            .filter(|c| !c.config_id.trim().is_empty())
            .map(|c| CreditConfigUpsert::from_wrapper(c, maps))
            .collect();
        self.data.store_credit_configs(tenant_id, &records).await
    }

    async fn store_entity_credits(
        &self,
        tenant_id: &str,
        maps: &ReferenceMaps,
        fetched: Fetched<WrapperEntityCredit>,
    ) -> Result<StoreReport, AppError> {
        let records: Vec<_> = fetched?
            .iter()
            .filter_map(|c| match EntityCreditUpsert::from_wrapper(c, maps) {
                Ok(record) => Some(record),
                Err(reason) => {
                    tracing::warn!(
                        entity_id = ?c.entity_id,
                        reason = %reason,
                        "Skipping entity credit"
                    );
                    None
                }
            })
            .collect();
        self.data.store_entity_credits(tenant_id, &records).await
    }
}
