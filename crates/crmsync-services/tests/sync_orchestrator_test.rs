mod common;

use std::time::Duration;

use chrono::Utc;
use common::{harness, tenant_t1};
use crmsync_core::constants::SYNC_IN_PROGRESS_MESSAGE;
use crmsync_core::models::{
    CollectionState, SyncCollection, SyncPhase, SyncState, TenantSyncStatus,
};
use crmsync_core::{AppError, SyncErrorKind};
use crmsync_db::{SyncStatusStore, TenantDataStore};
use crmsync_services::BackgroundState;
use serde_json::json;

fn completed_status(tenant_id: &str) -> TenantSyncStatus {
    let now = Utc::now();
    let mut status = TenantSyncStatus::new(tenant_id, now);
    assert!(status.try_acquire("earlier-run", chrono::Duration::minutes(10), now));
    status.begin_attempt(now);
    assert!(status.complete("earlier-run", now));
    status
}

#[tokio::test]
async fn test_completed_tenant_makes_no_upstream_calls() {
    let h = harness(tenant_t1());
    h.status.put(completed_status("t1"));

    let outcome = h.orchestrator.sync_tenant("t1", "tok").await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.already_synced, Some(true));
    assert!(outcome.sync_status.is_some());
    assert_eq!(h.api.total_calls(), 0);
    assert_eq!(h.data.calls("store_essential"), 0);
}

#[tokio::test]
async fn test_second_sync_after_completion_is_already_synced() {
    let h = harness(tenant_t1());

    let first = h.orchestrator.sync_tenant("t1", "tok").await.unwrap();
    assert_eq!(first.background_sync_started, Some(true));
    assert_eq!(
        h.orchestrator.wait_for_background("t1").await,
        Some(BackgroundState::Completed)
    );
    let calls = h.api.total_calls();

    let second = h.orchestrator.sync_tenant("t1", "tok").await.unwrap();
    assert_eq!(second.already_synced, Some(true));
    assert_eq!(h.api.total_calls(), calls);
}

#[tokio::test]
async fn test_concurrent_syncs_only_one_acquires_the_lease() {
    let h = harness(tenant_t1().with_delay(Duration::from_millis(30)));

    let (a, b) = tokio::join!(
        h.orchestrator.sync_tenant("t1", "tok"),
        h.orchestrator.sync_tenant("t1", "tok"),
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    let started: Vec<_> = outcomes.iter().filter(|o| o.success).collect();
    let rejected: Vec<_> = outcomes.iter().filter(|o| !o.success).collect();
    assert_eq!(started.len(), 1);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].error.as_deref(), Some(SYNC_IN_PROGRESS_MESSAGE));
    assert_eq!(h.api.calls("tenant"), 1);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_live_lease_of_another_run_rejects_sync() {
    let h = harness(tenant_t1());
    let now = Utc::now();
    let mut status = TenantSyncStatus::new("t1", now);
    assert!(status.try_acquire("other-process", chrono::Duration::minutes(5), now));
    h.status.put(status);

    let outcome = h.orchestrator.sync_tenant("t1", "tok").await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some(SYNC_IN_PROGRESS_MESSAGE));
    assert_eq!(h.api.total_calls(), 0);
}

#[tokio::test]
async fn test_expired_lease_is_taken_over() {
    let h = harness(tenant_t1());
    let long_ago = Utc::now() - chrono::Duration::hours(1);
    let mut status = TenantSyncStatus::new("t1", long_ago);
    assert!(status.try_acquire("crashed-process", chrono::Duration::minutes(1), long_ago));
    h.status.put(status);

    let outcome = h.orchestrator.sync_tenant("t1", "tok").await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.background_sync_started, Some(true));
    h.orchestrator.wait_for_background("t1").await;

    let status = h.status.get("t1").await.unwrap().unwrap();
    assert_eq!(status.status, SyncState::Completed);
    assert!(!status.lock.locked);
}

#[tokio::test]
async fn test_failed_user_storage_leaves_no_essential_records() {
    let h = harness(tenant_t1());
    h.data.fail_on(SyncCollection::Users);

    let err = h.orchestrator.sync_tenant("t1", "tok").await.unwrap_err();
    assert!(matches!(err, AppError::Internal(_)));

    assert!(h.data.tenants().is_empty());
    assert!(h.data.organizations("t1").is_empty());
    assert!(h.data.roles("t1").is_empty());
    assert!(h.data.users("t1").is_empty());

    let status = h.status.get("t1").await.unwrap().unwrap();
    assert_eq!(status.status, SyncState::Failed);
    assert!(!status.lock.locked);
    assert!(status.last_error.is_some());
    assert_eq!(
        status.collections[&SyncCollection::Users].status,
        CollectionState::Failed
    );
    assert_eq!(h.orchestrator.background_state("t1"), None);
}

#[tokio::test]
async fn test_auth_failure_is_not_retried_and_is_recorded() {
    let h = harness(tenant_t1().failing("users", 401));

    let err = h.orchestrator.sync_tenant("t1", "expired").await.unwrap_err();

    assert_eq!(err.kind(), SyncErrorKind::Auth);
    assert_eq!(h.api.calls("users"), 1);
    let status = h.status.get("t1").await.unwrap().unwrap();
    assert_eq!(status.status, SyncState::Failed);
    assert_eq!(status.error_code.as_deref(), Some("AUTH_ERROR"));
    assert_eq!(status.attempts, 1);
}

#[tokio::test]
async fn test_network_failure_is_retried_up_to_the_limit() {
    let h = harness(tenant_t1().failing("roles", 503));

    let err = h.orchestrator.sync_tenant("t1", "tok").await.unwrap_err();

    assert_eq!(err.kind(), SyncErrorKind::Network);
    assert_eq!(h.api.calls("roles"), 3);
    assert!(h.data.tenants().is_empty());
}

#[tokio::test]
async fn test_failed_tenant_can_sync_again() {
    let h = harness(tenant_t1());
    h.data.fail_on(SyncCollection::Users);
    assert!(h.orchestrator.sync_tenant("t1", "tok").await.is_err());

    h.data.clear_failures();
    let outcome = h.orchestrator.sync_tenant("t1", "tok").await.unwrap();
    assert!(outcome.success);
    h.orchestrator.wait_for_background("t1").await;

    let status = h.status.get("t1").await.unwrap().unwrap();
    assert_eq!(status.status, SyncState::Completed);
    assert_eq!(status.attempts, 2);
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn test_root_and_sales_hierarchy_is_resolved() {
    let h = harness(tenant_t1());

    let outcome = h.orchestrator.sync_tenant("t1", "tok").await.unwrap();
    let stats = outcome.stats.unwrap();
    assert_eq!(stats.tenant, 1);
    assert_eq!(stats.organizations, 2);
    assert_eq!(stats.roles, 1);
    assert_eq!(stats.users, 2);
    assert_eq!(stats.total_records, 6);

    // Essential data is visible before the background phase finishes.
    let orgs = h.data.organizations("t1");
    assert_eq!(orgs.len(), 2);
    let root = orgs.iter().find(|o| o.org_code == "ROOT").unwrap();
    let sales = orgs.iter().find(|o| o.org_code == "SALES").unwrap();
    assert!(root.parent.is_none());
    assert_eq!(sales.parent.as_ref().and_then(|p| p.id()), Some(root.id));

    h.orchestrator.wait_for_background("t1").await;
}

#[tokio::test]
async fn test_phase_moves_to_dependent_after_essential() {
    let h = harness(tenant_t1().with_delay(Duration::from_millis(20)));

    h.orchestrator.sync_tenant("t1", "tok").await.unwrap();
    let status = h.status.get("t1").await.unwrap().unwrap();
    assert_eq!(status.status, SyncState::Syncing);
    assert_eq!(status.phase, Some(SyncPhase::Dependent));
    assert!(status.lock.locked);
    assert_eq!(status.collections[&SyncCollection::Organizations].count, 2);
    assert_eq!(
        status.collections[&SyncCollection::Users].status,
        CollectionState::Success
    );

    h.orchestrator.wait_for_background("t1").await;
}

#[tokio::test]
async fn test_credit_config_failure_does_not_block_other_collections() {
    let h = harness(tenant_t1());
    h.data.fail_on(SyncCollection::CreditConfigs);

    let outcome = h.orchestrator.sync_tenant("t1", "tok").await.unwrap();
    assert!(outcome.success);
    assert_eq!(
        h.orchestrator.wait_for_background("t1").await,
        Some(BackgroundState::Completed)
    );

    let status = h.status.get("t1").await.unwrap().unwrap();
    assert_eq!(status.status, SyncState::Completed);
    assert!(!status.lock.locked);
    let entry = |c| status.collections[&c].clone();
    assert_eq!(entry(SyncCollection::CreditConfigs).status, CollectionState::Failed);
    assert_eq!(entry(SyncCollection::RoleAssignments).status, CollectionState::Success);
    assert_eq!(entry(SyncCollection::RoleAssignments).count, 1);
    assert_eq!(entry(SyncCollection::EmployeeAssignments).status, CollectionState::Success);
    assert_eq!(entry(SyncCollection::EmployeeAssignments).count, 1);
    assert_eq!(entry(SyncCollection::EntityCredits).status, CollectionState::Success);

    assert_eq!(h.data.role_assignments("t1").len(), 1);
    assert_eq!(h.data.employee_assignments("t1").len(), 1);
    assert!(h.data.credit_configs("t1").is_empty());

    let notice = status.notice().unwrap();
    assert_eq!(notice.failed_collections, vec![SyncCollection::CreditConfigs]);
    assert_eq!(notice.message, "Some records failed to sync: creditConfigs");
}

#[tokio::test]
async fn test_partially_stored_assignments_are_reported_as_failed() {
    let h = harness(tenant_t1().with(
        "employee-assignments",
        vec![
            json!({"assignmentId": "a-1", "userId": "u-1", "entityId": "SALES"}),
            json!({"assignmentId": "a-2", "userId": "u-1", "entityId": "SALES"}),
            json!({"assignmentId": "a-3", "userId": "u-2", "entityId": "ROOT"}),
        ],
    ));

    h.orchestrator.sync_tenant("t1", "tok").await.unwrap();
    assert_eq!(
        h.orchestrator.wait_for_background("t1").await,
        Some(BackgroundState::Completed)
    );

    assert_eq!(h.data.employee_assignments("t1").len(), 2);
    let status = h.status.get("t1").await.unwrap().unwrap();
    assert_eq!(status.status, SyncState::Completed);
    let entry = &status.collections[&SyncCollection::EmployeeAssignments];
    assert_eq!(entry.status, CollectionState::Failed);
    assert_eq!(entry.count, 2);
    assert!(entry.error.as_deref().unwrap().starts_with("1 of 3 records failed"));
    assert_eq!(
        status.notice().unwrap().message,
        "Some records failed to sync: employeeAssignments"
    );
}

#[tokio::test]
async fn test_role_assignment_without_user_is_skipped() {
    let h = harness(tenant_t1().with(
        "role-assignments",
        vec![
            json!({"userId": "u-1", "roleId": "r-admin", "entityId": "SALES"}),
            json!({"userId": "  ", "roleId": "r-admin"}),
            json!({"userId": "u-2", "roleId": ""}),
        ],
    ));

    h.orchestrator.sync_tenant("t1", "tok").await.unwrap();
    h.orchestrator.wait_for_background("t1").await;

    assert_eq!(h.data.role_assignments("t1").len(), 1);
    let status = h.status.get("t1").await.unwrap().unwrap();
    let entry = &status.collections[&SyncCollection::RoleAssignments];
    assert_eq!(entry.status, CollectionState::Success);
    assert_eq!(entry.count, 1);
}

#[tokio::test]
async fn test_taken_over_lease_stops_collection_records() {
    let h = harness(tenant_t1().with_delay(Duration::from_millis(20)));

    h.orchestrator.sync_tenant("t1", "tok").await.unwrap();
    let mut status = h.status.get("t1").await.unwrap().unwrap();
    status.lock.locked_by = Some("other-process".to_string());
    h.status.put(status);
    h.orchestrator.wait_for_background("t1").await;

    let status = h.status.get("t1").await.unwrap().unwrap();
    assert_eq!(status.lock.locked_by.as_deref(), Some("other-process"));
    assert_ne!(status.status, SyncState::Completed);
    for collection in SyncCollection::DEPENDENT {
        assert_ne!(status.collections[&collection].status, CollectionState::Success);
    }
}

#[tokio::test]
async fn test_dependent_fetch_failure_is_isolated() {
    let h = harness(tenant_t1().failing("role-assignments", 500));

    h.orchestrator.sync_tenant("t1", "tok").await.unwrap();
    h.orchestrator.wait_for_background("t1").await;

    assert_eq!(h.api.calls("role-assignments"), 3);
    let status = h.status.get("t1").await.unwrap().unwrap();
    assert_eq!(status.status, SyncState::Completed);
    assert_eq!(
        status.collections[&SyncCollection::RoleAssignments].status,
        CollectionState::Failed
    );
    assert_eq!(
        status.collections[&SyncCollection::CreditConfigs].status,
        CollectionState::Success
    );
}

#[tokio::test]
async fn test_entity_credits_are_recomputed_and_invalid_rows_skipped() {
    let h = harness(tenant_t1());

    h.orchestrator.sync_tenant("t1", "tok").await.unwrap();
    h.orchestrator.wait_for_background("t1").await;

    let credits = h.data.entity_credits("t1");
    assert_eq!(credits.len(), 1);
    let sales_credit = &credits[0];
    assert_eq!(sales_credit.entity.key(), "SALES");
    assert_eq!(sales_credit.allocated_credits, 100.0);
    assert_eq!(sales_credit.used_credits, 30.0);
    assert_eq!(sales_credit.available_credits, 70.0);

    let status = h.status.get("t1").await.unwrap().unwrap();
    assert_eq!(status.collections[&SyncCollection::EntityCredits].count, 1);
}

#[tokio::test]
async fn test_dependent_references_resolve_and_users_are_linked() {
    let h = harness(tenant_t1());

    h.orchestrator.sync_tenant("t1", "tok").await.unwrap();
    h.orchestrator.wait_for_background("t1").await;

    let orgs = h.data.organizations("t1");
    let sales = orgs.iter().find(|o| o.org_code == "SALES").unwrap();
    let users = h.data.users("t1");
    let ada = users.iter().find(|u| u.user_id == "u-1").unwrap();
    let lin = users.iter().find(|u| u.user_id == "u-2").unwrap();

    let assignments = h.data.employee_assignments("t1");
    assert_eq!(assignments.len(), 1);
    let assignment = &assignments[0];
    assert_eq!(assignment.priority, 7);
    assert_eq!(assignment.organization.id(), Some(sales.id));
    assert_eq!(assignment.user.id(), Some(ada.id));

    let role_assignments = h.data.role_assignments("t1");
    assert_eq!(role_assignments[0].assignment_id, "u-1:r-admin:SALES");
    assert!(role_assignments[0].role.is_resolved());

    assert_eq!(ada.assignment_ids, vec![assignment.id]);
    assert!(lin.assignment_ids.is_empty());
    assert_eq!(h.data.calls("link_user_assignments"), 1);
}

#[tokio::test]
async fn test_reset_is_refused_while_running_and_forces_resync_after() {
    let h = harness(tenant_t1().with_delay(Duration::from_millis(20)));

    h.orchestrator.sync_tenant("t1", "tok").await.unwrap();
    let err = h.orchestrator.reset_sync_status("t1").await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    h.orchestrator.wait_for_background("t1").await;
    let reset = h.orchestrator.reset_sync_status("t1").await.unwrap().unwrap();
    assert_eq!(reset.status, SyncState::Pending);

    let calls = h.api.calls("tenant");
    let outcome = h.orchestrator.sync_tenant("t1", "tok").await.unwrap();
    assert_eq!(outcome.background_sync_started, Some(true));
    assert_eq!(h.api.calls("tenant"), calls + 1);
    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_reset_of_unknown_tenant_is_none() {
    let h = harness(tenant_t1());
    assert!(h.orchestrator.reset_sync_status("nobody").await.unwrap().is_none());
    assert!(h.orchestrator.sync_status("nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn test_blank_tenant_is_rejected() {
    let h = harness(tenant_t1());
    let err = h.orchestrator.sync_tenant("  ", "tok").await.unwrap_err();
    assert_eq!(err.kind(), SyncErrorKind::Validation);
    assert_eq!(h.api.total_calls(), 0);
}

#[tokio::test]
async fn test_reference_maps_reflect_essential_data() {
    let h = harness(tenant_t1());
    h.orchestrator.sync_tenant("t1", "tok").await.unwrap();
    h.orchestrator.wait_for_background("t1").await;

    let maps = h.data.load_reference_maps("t1").await.unwrap();
    assert_eq!(maps.organizations.len(), 2);
    assert!(maps.roles.contains_key("r-admin"));
    assert!(maps.users.contains_key("u-2"));
}
