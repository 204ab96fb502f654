mod common;

use std::time::Duration;

use common::{handler, message, seeded_store, Read, ScriptedStream, TENANT};
use crmsync_worker::{AssignmentConsumer, BatchStats, StreamMessage};
use serde_json::json;

fn created(id: &str, assignment_id: &str, org: &str) -> StreamMessage {
    message(
        id,
        "created",
        json!({"assignmentId": assignment_id, "userId": "u-1", "organizationId": org}),
    )
}

#[tokio::test]
async fn test_every_message_is_acknowledged() {
    let store = seeded_store();
    let (stream, shutdown) = ScriptedStream::new(vec![Read::Batch(vec![
        created("1-0", "a-1", "SALES"),
        created("2-0", "a-1", "SALES"),
        StreamMessage::new("3-0", &[("type", "organization.assignment.created"), ("data", "{not json")]),
        message("4-0", "created", json!({"assignmentId": "a-2", "organizationId": "SALES"})),
        created("5-0", "a-3", "MISSING"),
    ])]);
    let mut consumer = AssignmentConsumer::new(stream.clone(), handler(&store), Duration::ZERO);

    let totals = consumer.run(shutdown).await;

    assert_eq!(
        totals,
        BatchStats {
            applied: 1,
            skipped: 2,
            invalid: 2,
            failed: 0,
        }
    );
    assert_eq!(stream.acked(), vec!["1-0", "2-0", "3-0", "4-0", "5-0"]);
    assert_eq!(store.employee_assignments(TENANT).len(), 1);
}

#[tokio::test]
async fn test_read_failure_backs_off_and_reconnects() {
    let store = seeded_store();
    let (stream, shutdown) = ScriptedStream::new(vec![
        Read::Fail,
        Read::Batch(vec![created("1-0", "a-1", "SALES")]),
    ]);
    let mut consumer =
        AssignmentConsumer::new(stream.clone(), handler(&store), Duration::from_millis(5));

    let totals = consumer.run(shutdown).await;

    assert_eq!(stream.reconnects(), 1);
    assert_eq!(totals.applied, 1);
    assert_eq!(stream.acked(), vec!["1-0"]);
}

#[tokio::test]
async fn test_group_creation_is_retried_until_it_succeeds() {
    let store = seeded_store();
    let (stream, shutdown) = ScriptedStream::new(vec![Read::Batch(vec![created(
        "1-0", "a-1", "SALES",
    )])]);
    let stream = stream.failing_ensure_group(2);
    let mut consumer =
        AssignmentConsumer::new(stream.clone(), handler(&store), Duration::from_millis(1));

    let totals = consumer.run(shutdown).await;

    assert_eq!(stream.ensure_group_calls(), 3);
    assert_eq!(totals.applied, 1);
}

#[tokio::test]
async fn test_shutdown_before_start_reads_nothing() {
    let store = seeded_store();
    let (stream, _) = ScriptedStream::new(vec![Read::Batch(vec![created("1-0", "a-1", "SALES")])]);
    let (tx, rx) = tokio::sync::watch::channel(true);
    let mut consumer = AssignmentConsumer::new(stream.clone(), handler(&store), Duration::ZERO);

    let totals = consumer.run(rx).await;
    drop(tx);

    assert_eq!(totals.total(), 0);
    assert_eq!(stream.ensure_group_calls(), 0);
    assert!(stream.acked().is_empty());
}

#[tokio::test]
async fn test_empty_batches_are_not_counted() {
    let store = seeded_store();
    let (stream, shutdown) = ScriptedStream::new(vec![
        Read::Batch(Vec::new()),
        Read::Batch(Vec::new()),
        Read::Batch(vec![created("7-0", "a-7", "SALES")]),
    ]);
    let mut consumer = AssignmentConsumer::new(stream.clone(), handler(&store), Duration::ZERO);

    let totals = consumer.run(shutdown).await;

    assert_eq!(totals.total(), 1);
    assert_eq!(stream.acked(), vec!["7-0"]);
}
