//! End-to-end tests for the audit pipeline.
//!
//! A command goes through the interceptor (signing), into the queue, through
//! the consumer into the global audit log, and finally through the verifier.

mod common;

use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use common::*;
use notary_service::audit::{AuditConsumer, AuditConsumerConfig, AuditStore};
use notary_service::bus::AuditEventQueue;
use notary_service::domain::AggregateType;
use notary_service::infra::{DeadLetterReason, RetryConfig};
use notary_service::pipeline::{CommandDescriptor, CommandRequest};

fn consumer_for(stack: &TestStack, max_attempts: i32) -> AuditConsumer {
    AuditConsumer::new(
        stack.queue.clone(),
        stack.audit_store.clone(),
        stack.authority.clone(),
        stack.dead_letters.clone(),
        AuditConsumerConfig {
            max_attempts,
            backoff: RetryConfig::database().with_initial_delay(Duration::ZERO),
            ..Default::default()
        },
    )
}

/// The interceptor publishes audit events from a spawned task; give it a
/// chance to run before asserting on queue contents.
async fn settle() {
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn signed_command_lands_in_audit_log() {
    let stack = test_stack().await;
    let consumer = consumer_for(&stack, 5);

    let descriptor = CommandDescriptor::signed("order.cancel", AggregateType::order(), "cancel");
    let request = CommandRequest::new(TEST_USER, cancel_order_payload("order-77"))
        .with_secret(TEST_SECRET)
        .with_entity_id("order-77");
    let correlation_id = request.correlation_id;

    let outcome = stack
        .interceptor
        .execute(&descriptor, request, |ctx| async move {
            let ctx = ctx.expect("signed command must carry a signature context");
            assert!(ctx.signature.starts_with("notary:v1:"));
            Ok::<_, notary_service::pipeline::CommandError>("cancelled")
        })
        .await
        .unwrap();
    assert_eq!(outcome, "cancelled");

    settle().await;
    assert_eq!(stack.queue.depth().await.unwrap(), 1);

    let processed = consumer.drain_batch().await.unwrap();
    assert_eq!(processed, 1);
    assert_eq!(stack.queue.depth().await.unwrap(), 0);

    let entries = stack
        .audit_store
        .get_by_correlation(correlation_id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.user_id, TEST_USER);
    assert_eq!(entry.aggregate_type.as_str(), "order");
    assert_eq!(entry.action.as_str(), "cancel");
    assert!(!entry.is_verified);

    // The stored signature verifies against the stored canonical payload
    let outcome = stack.verifier.verify_entry(entry.id).await.unwrap();
    assert!(outcome.is_valid);
}

#[tokio::test]
async fn failed_command_is_still_audited() {
    let stack = test_stack().await;
    let consumer = consumer_for(&stack, 5);

    let descriptor = CommandDescriptor::signed("order.cancel", AggregateType::order(), "cancel");
    let request = CommandRequest::new(TEST_USER, cancel_order_payload("order-9"))
        .with_secret(TEST_SECRET);
    let correlation_id = request.correlation_id;

    let result: Result<(), _> = stack
        .interceptor
        .execute(&descriptor, request, |_ctx| async move {
            Err(notary_service::pipeline::CommandError::new(
                409,
                "order already shipped",
            ))
        })
        .await;
    assert!(result.is_err());

    settle().await;
    consumer.drain_batch().await.unwrap();

    let entries = stack
        .audit_store
        .get_by_correlation(correlation_id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].payload.contains("order-9"));
}

#[tokio::test]
async fn unsigned_command_gets_system_signature_at_persist_time() {
    let stack = test_stack().await;
    let consumer = consumer_for(&stack, 5);

    let descriptor = CommandDescriptor::unsigned("profile.update", AggregateType::customer(), "update");
    let request = CommandRequest::new(TEST_USER, json!({"email": "a@example.com"}));
    let correlation_id = request.correlation_id;

    stack
        .interceptor
        .execute(&descriptor, request, |ctx| async move {
            assert!(ctx.is_none());
            Ok::<_, notary_service::pipeline::CommandError>(())
        })
        .await
        .unwrap();

    settle().await;
    consumer.drain_batch().await.unwrap();

    let entries = stack
        .audit_store
        .get_by_correlation(correlation_id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    // Signed by the consumer on the system path
    assert!(entries[0].digital_signature.starts_with("notary:v1:"));
    let outcome = stack.verifier.verify_entry(entries[0].id).await.unwrap();
    assert!(outcome.is_valid);
}

#[tokio::test]
async fn redelivered_event_produces_one_audit_entry() {
    let stack = test_stack().await;
    let consumer = consumer_for(&stack, 5);

    let descriptor = CommandDescriptor::signed("order.cancel", AggregateType::order(), "cancel");
    let request = CommandRequest::new(TEST_USER, cancel_order_payload("order-dup"))
        .with_secret(TEST_SECRET);
    let correlation_id = request.correlation_id;

    stack
        .interceptor
        .execute(&descriptor, request, |_| async move {
            Ok::<_, notary_service::pipeline::CommandError>(())
        })
        .await
        .unwrap();

    settle().await;

    // Lease the event but let the lease lapse without an ack, as a crashed
    // consumer would, then process it twice.
    let leased = stack
        .queue
        .poll(10, Duration::from_millis(1))
        .await
        .unwrap();
    assert_eq!(leased.len(), 1);
    tokio::time::sleep(Duration::from_millis(10)).await;

    consumer.drain_batch().await.unwrap();
    consumer.drain_batch().await.unwrap();

    let entries = stack
        .audit_store
        .get_by_correlation(correlation_id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1, "redelivery must not duplicate the entry");
}

#[tokio::test]
async fn redelivery_succeeds_once_the_authority_recovers() {
    let stack = test_stack().await;
    let consumer = consumer_for(&stack, 5);

    let descriptor = CommandDescriptor::unsigned("profile.update", AggregateType::customer(), "update");
    let request = CommandRequest::new(TEST_USER, json!({"email": "r@example.com"}));
    let correlation_id = request.correlation_id;

    stack
        .interceptor
        .execute(&descriptor, request, |_| async move {
            Ok::<_, notary_service::pipeline::CommandError>(())
        })
        .await
        .unwrap();
    settle().await;

    // First delivery fails while the backend is down; the event is nacked,
    // not lost
    stack.backend.set_down(true);
    consumer.drain_batch().await.unwrap();
    assert_eq!(stack.audit_store.len().await, 0);
    assert_eq!(stack.queue.depth().await.unwrap(), 1);

    stack.backend.set_down(false);
    consumer.drain_batch().await.unwrap();

    let entries = stack
        .audit_store
        .get_by_correlation(correlation_id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(stack.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn event_is_dead_lettered_after_exhausting_attempts() {
    let stack = test_stack().await;
    let consumer = consumer_for(&stack, 2);

    // Unsigned event forces the consumer into sign_system, which fails
    // while the backend is down.
    let descriptor = CommandDescriptor::unsigned("profile.update", AggregateType::customer(), "update");
    let request = CommandRequest::new(TEST_USER, json!({"email": "x@example.com"}));

    stack
        .interceptor
        .execute(&descriptor, request, |_| async move {
            Ok::<_, notary_service::pipeline::CommandError>(())
        })
        .await
        .unwrap();

    settle().await;
    stack.backend.set_down(true);

    consumer.drain_batch().await.unwrap();
    consumer.drain_batch().await.unwrap();

    assert_eq!(stack.queue.depth().await.unwrap(), 0);
    assert_eq!(stack.audit_store.len().await, 0);

    let parked = stack.dead_letters.entries().await;
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].reason, DeadLetterReason::SigningFailed);
    assert_eq!(parked[0].attempts, 2);
}

#[tokio::test]
async fn verified_flag_is_one_way() {
    let stack = test_stack().await;
    let consumer = consumer_for(&stack, 5);

    let descriptor = CommandDescriptor::signed("order.cancel", AggregateType::order(), "cancel");
    let request = CommandRequest::new(TEST_USER, cancel_order_payload("order-ow"))
        .with_secret(TEST_SECRET);
    let correlation_id = request.correlation_id;

    stack
        .interceptor
        .execute(&descriptor, request, |_| async move {
            Ok::<_, notary_service::pipeline::CommandError>(())
        })
        .await
        .unwrap();
    settle().await;
    consumer.drain_batch().await.unwrap();

    let entry = stack
        .audit_store
        .get_by_correlation(correlation_id)
        .await
        .unwrap()
        .remove(0);

    let ok = stack.verifier.verify_entry(entry.id).await.unwrap();
    assert!(ok.is_valid);
    let verified_at = ok.verified_at.expect("verified_at set on success");

    // A later failed verification against the same entry changes nothing
    let bad = stack
        .verifier
        .verify_signature(&json!({"tampered": true}), &entry.digital_signature, Some(entry.id))
        .await
        .unwrap();
    assert!(!bad.is_valid);

    let after = stack.audit_store.get(entry.id).await.unwrap().unwrap();
    assert!(after.is_verified);
    assert_eq!(after.verified_at, Some(verified_at));
}

#[tokio::test]
async fn missing_secret_never_reaches_the_handler() {
    let stack = test_stack().await;

    let descriptor = CommandDescriptor::signed("order.cancel", AggregateType::order(), "cancel");
    let request = CommandRequest::new(TEST_USER, cancel_order_payload("order-ns"));

    let result: Result<(), _> = stack
        .interceptor
        .execute(&descriptor, request, |_| async move {
            panic!("handler must not run without a signature");
        })
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.status_code(), 401);

    settle().await;
    // The command never executed, so nothing is audited
    assert_eq!(stack.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn verify_entry_for_unknown_id_is_an_error() {
    let stack = test_stack().await;
    let result = stack.verifier.verify_entry(Uuid::new_v4()).await;
    assert!(result.is_err());
}
