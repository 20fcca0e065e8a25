//! Integration tests for the signing authority.
//!
//! Covers the sign path end to end: secret gating, payload validation,
//! signature production, and fail-closed behavior when the key backend
//! is unavailable.

mod common;

use serde_json::json;

use common::*;
use notary_service::authority::SigningError;
use notary_service::credential::SecretStore;
use notary_service::domain::OperationType;

#[tokio::test]
async fn sign_produces_verifiable_signature() {
    let stack = test_stack().await;
    let payload = cancel_order_payload(&random_entity_id("order"));

    let signed = stack
        .authority
        .sign(TEST_USER, TEST_SECRET, &payload, &OperationType::new("order.cancel"))
        .await
        .expect("sign should succeed with a valid secret");

    assert!(signed.signature.starts_with("notary:v1:"));
    assert_eq!(signed.key_id, stack.authority.key_id());
    assert!(stack.authority.verify(&payload, &signed.signature).await);
}

#[tokio::test]
async fn sign_rejects_wrong_secret() {
    let stack = test_stack().await;
    let payload = cancel_order_payload("order-1");

    let err = stack
        .authority
        .sign(TEST_USER, "wrong-secret", &payload, &OperationType::new("order.cancel"))
        .await
        .unwrap_err();

    assert!(matches!(err, SigningError::InvalidSecret));
}

#[tokio::test]
async fn sign_rejects_unknown_user() {
    let stack = test_stack().await;

    let err = stack
        .authority
        .sign("nobody", TEST_SECRET, &json!({"k": 1}), &OperationType::new("order.cancel"))
        .await
        .unwrap_err();

    // An unknown user is indistinguishable from a wrong secret
    assert!(matches!(err, SigningError::InvalidSecret));
}

#[tokio::test]
async fn sign_rejects_disabled_profile() {
    let stack = test_stack().await;
    stack.secrets.disable(TEST_USER).await.unwrap();

    let err = stack
        .authority
        .sign(TEST_USER, TEST_SECRET, &json!({"k": 1}), &OperationType::new("order.cancel"))
        .await
        .unwrap_err();

    assert!(matches!(err, SigningError::InvalidSecret));
}

#[tokio::test]
async fn resetting_secret_reenables_profile() {
    let stack = test_stack().await;
    stack.secrets.disable(TEST_USER).await.unwrap();
    stack.secrets.set_secret(TEST_USER, "new-secret").await.unwrap();

    assert!(stack.authority.check_secret(TEST_USER, "new-secret").await.unwrap());
    assert!(!stack.authority.check_secret(TEST_USER, TEST_SECRET).await.unwrap());
}

#[tokio::test]
async fn sign_fails_closed_when_backend_is_down() {
    let stack = test_stack().await;
    stack.backend.set_down(true);

    let err = stack
        .authority
        .sign(TEST_USER, TEST_SECRET, &json!({"k": 1}), &OperationType::new("order.cancel"))
        .await
        .unwrap_err();

    assert!(matches!(err, SigningError::Unavailable(_)));
}

#[tokio::test]
async fn sign_rejects_null_payload() {
    let stack = test_stack().await;

    let err = stack
        .authority
        .sign(TEST_USER, TEST_SECRET, &serde_json::Value::Null, &OperationType::new("order.cancel"))
        .await
        .unwrap_err();

    assert!(matches!(err, SigningError::InvalidArgument(_)));
}

#[tokio::test]
async fn sign_rejects_oversized_payload() {
    let stack = test_stack().await;
    let big = json!({ "blob": "x".repeat(300 * 1024) });

    let err = stack
        .authority
        .sign(TEST_USER, TEST_SECRET, &big, &OperationType::new("order.cancel"))
        .await
        .unwrap_err();

    assert!(matches!(err, SigningError::InvalidArgument(_)));
}

#[tokio::test]
async fn verify_rejects_tampered_payload() {
    let stack = test_stack().await;
    let payload = json!({"amount": 100});

    let signed = stack
        .authority
        .sign(TEST_USER, TEST_SECRET, &payload, &OperationType::new("payment.capture"))
        .await
        .unwrap();

    let tampered = json!({"amount": 10000});
    assert!(!stack.authority.verify(&tampered, &signed.signature).await);
}

#[tokio::test]
async fn verify_is_key_order_independent() {
    let stack = test_stack().await;
    let payload = json!({"a": 1, "b": {"c": 2, "d": 3}});

    let signed = stack
        .authority
        .sign(TEST_USER, TEST_SECRET, &payload, &OperationType::new("order.cancel"))
        .await
        .unwrap();

    // Same object, different key insertion order
    let reordered = json!({"b": {"d": 3, "c": 2}, "a": 1});
    assert!(stack.authority.verify(&reordered, &signed.signature).await);
}
