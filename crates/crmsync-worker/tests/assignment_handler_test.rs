mod common;

use common::{event, handler, seeded_store, TENANT};
use crmsync_worker::{HandleOutcome, SkipReason};
use serde_json::json;

fn created(assignment_id: &str, org: &str) -> crmsync_core::models::AssignmentEvent {
    event(
        "created",
        json!({
            "assignmentId": assignment_id,
            "userId": "u-1",
            "organizationId": org,
            "priority": 3,
            "assignedBy": "admin"
        }),
    )
}

#[tokio::test]
async fn test_replayed_created_event_stores_one_assignment() {
    let store = seeded_store();
    let handler = handler(&store);
    let event = created("a-1", "SALES");

    assert_eq!(handler.handle(&event).await.unwrap(), HandleOutcome::Applied);
    assert_eq!(
        handler.handle(&event).await.unwrap(),
        HandleOutcome::Skipped(SkipReason::Duplicate)
    );

    let stored = store.employee_assignments(TENANT);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].assignment_id, "a-1");
    assert_eq!(stored[0].priority, 3);
    assert_eq!(store.calls("insert_assignment"), 1);
}

#[tokio::test]
async fn test_created_with_new_id_matches_active_user_org_pair() {
    let store = seeded_store();
    let handler = handler(&store);

    handler.handle(&created("a-1", "SALES")).await.unwrap();
    let outcome = handler.handle(&created("a-1-reissued", "SALES")).await.unwrap();

    assert_eq!(outcome, HandleOutcome::Skipped(SkipReason::Duplicate));
    assert_eq!(store.employee_assignments(TENANT).len(), 1);
}

#[tokio::test]
async fn test_created_resolves_user_and_organization() {
    let store = seeded_store();
    let org_id = store.organizations(TENANT)[0].id;
    let user_id = store.users(TENANT)[0].id;

    handler(&store).handle(&created("a-1", "SALES")).await.unwrap();

    let stored = &store.employee_assignments(TENANT)[0];
    assert_eq!(stored.organization.id(), Some(org_id));
    assert_eq!(stored.user.id(), Some(user_id));
    assert!(stored.is_active);
    assert_eq!(stored.assigned_by.as_deref(), Some("admin"));
}

#[tokio::test]
async fn test_unknown_user_is_stored_as_pending_reference() {
    let store = seeded_store();
    let event = event(
        "created",
        json!({"assignmentId": "a-2", "userId": "u-new", "organizationId": "SALES"}),
    );

    assert_eq!(handler(&store).handle(&event).await.unwrap(), HandleOutcome::Applied);

    let stored = &store.employee_assignments(TENANT)[0];
    assert!(!stored.user.is_resolved());
    assert_eq!(stored.user.key(), "u-new");
}

#[tokio::test]
async fn test_organization_matched_case_insensitively_after_retry() {
    let store = seeded_store();

    let outcome = handler(&store).handle(&created("a-1", "sales")).await.unwrap();

    assert_eq!(outcome, HandleOutcome::Applied);
    assert_eq!(store.calls("find_organization"), 2);
    assert_eq!(store.calls("find_organization_ci"), 1);
    let stored = &store.employee_assignments(TENANT)[0];
    assert_eq!(stored.organization.key(), "SALES");
}

#[tokio::test]
async fn test_event_for_missing_organization_is_dropped() {
    let store = seeded_store();

    let outcome = handler(&store).handle(&created("a-1", "MARKETING")).await.unwrap();

    assert_eq!(outcome, HandleOutcome::Skipped(SkipReason::OrganizationNotFound));
    assert_eq!(store.calls("find_organization"), 2);
    assert_eq!(store.calls("insert_assignment"), 0);
    assert!(store.employee_assignments(TENANT).is_empty());
}

#[tokio::test]
async fn test_update_falls_back_to_user_org_lookup() {
    let store = seeded_store();
    let handler = handler(&store);
    handler.handle(&created("a-1", "SALES")).await.unwrap();

    let update = event(
        "updated",
        json!({
            "assignmentId": "a-unknown",
            "userId": "u-1",
            "organizationId": "SALES",
            "changes": {"priority": 9, "assignmentType": "secondary"}
        }),
    );
    assert_eq!(handler.handle(&update).await.unwrap(), HandleOutcome::Applied);

    let stored = &store.employee_assignments(TENANT)[0];
    assert_eq!(stored.assignment_id, "a-1");
    assert_eq!(stored.priority, 9);
    assert_eq!(stored.assignment_type, "secondary");
}

#[tokio::test]
async fn test_update_without_changes_is_skipped() {
    let store = seeded_store();
    let handler = handler(&store);
    handler.handle(&created("a-1", "SALES")).await.unwrap();

    let update = event(
        "updated",
        json!({"assignmentId": "a-1", "userId": "u-1", "organizationId": "SALES"}),
    );

    assert_eq!(
        handler.handle(&update).await.unwrap(),
        HandleOutcome::Skipped(SkipReason::NoChanges)
    );
    assert_eq!(store.calls("update_assignment"), 0);
}

#[tokio::test]
async fn test_update_of_unknown_assignment_is_skipped() {
    let store = seeded_store();
    let update = event(
        "updated",
        json!({"assignmentId": "a-9", "userId": "u-1", "organizationId": "SALES", "priority": 2}),
    );

    assert_eq!(
        handler(&store).handle(&update).await.unwrap(),
        HandleOutcome::Skipped(SkipReason::AssignmentNotFound)
    );
}

#[tokio::test]
async fn test_deactivate_then_activate() {
    let store = seeded_store();
    let handler = handler(&store);
    handler.handle(&created("a-1", "SALES")).await.unwrap();
    let key = json!({"assignmentId": "a-1", "userId": "u-1", "organizationId": "SALES"});

    let mut deactivate = key.clone();
    deactivate["deactivatedBy"] = json!("hr-bot");
    deactivate["timestamp"] = json!("2024-03-01T10:00:00Z");
    assert_eq!(
        handler.handle(&event("deactivated", deactivate)).await.unwrap(),
        HandleOutcome::Applied
    );
    let stored = &store.employee_assignments(TENANT)[0];
    assert!(!stored.is_active);
    assert_eq!(stored.deactivated_by.as_deref(), Some("hr-bot"));
    assert_eq!(
        stored.deactivated_at.map(|at| at.to_rfc3339()),
        Some("2024-03-01T10:00:00+00:00".to_string())
    );

    assert_eq!(
        handler.handle(&event("activated", key)).await.unwrap(),
        HandleOutcome::Applied
    );
    let stored = &store.employee_assignments(TENANT)[0];
    assert!(stored.is_active);
    assert!(stored.deactivated_at.is_none());
    assert!(stored.deactivated_by.is_none());
}

#[tokio::test]
async fn test_deactivated_pair_allows_new_assignment() {
    let store = seeded_store();
    let handler = handler(&store);
    handler.handle(&created("a-1", "SALES")).await.unwrap();
    handler
        .handle(&event(
            "deactivated",
            json!({"assignmentId": "a-1", "userId": "u-1", "organizationId": "SALES"}),
        ))
        .await
        .unwrap();

    let outcome = handler.handle(&created("a-2", "SALES")).await.unwrap();

    assert_eq!(outcome, HandleOutcome::Applied);
    assert_eq!(store.employee_assignments(TENANT).len(), 2);
}

#[tokio::test]
async fn test_delete_removes_assignment_once() {
    let store = seeded_store();
    let handler = handler(&store);
    handler.handle(&created("a-1", "SALES")).await.unwrap();
    let delete = event(
        "deleted",
        json!({"assignmentId": "a-1", "userId": "u-1", "organizationId": "SALES"}),
    );

    assert_eq!(handler.handle(&delete).await.unwrap(), HandleOutcome::Applied);
    assert!(store.employee_assignments(TENANT).is_empty());
    assert_eq!(
        handler.handle(&delete).await.unwrap(),
        HandleOutcome::Skipped(SkipReason::AssignmentNotFound)
    );
}
