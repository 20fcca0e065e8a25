//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use notary_service::audit::{AuditVerifier, InMemoryAuditStore};
use notary_service::authority::{
    BackendError, LocalKeyBackend, SigningAuthority, SigningBackend,
};
use notary_service::bus::InMemoryAuditQueue;
use notary_service::credential::{InMemorySecretStore, SecretStore};
use notary_service::domain::Hash256;
use notary_service::infra::InMemoryDeadLetterSink;
use notary_service::pipeline::SigningInterceptor;

pub const TEST_USER: &str = "alice";
pub const TEST_SECRET: &str = "1234-5678";

/// A signing backend that can be taken offline mid-test.
pub struct UnreliableBackend {
    inner: LocalKeyBackend,
    down: AtomicBool,
}

impl UnreliableBackend {
    pub fn new() -> Self {
        Self {
            inner: LocalKeyBackend::generate(),
            down: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl SigningBackend for UnreliableBackend {
    fn key_id(&self) -> &str {
        self.inner.key_id()
    }

    async fn sign(&self, payload_hash: &Hash256) -> Result<String, BackendError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("backend offline".to_string()));
        }
        self.inner.sign(payload_hash).await
    }

    async fn verify(
        &self,
        payload_hash: &Hash256,
        envelope: &str,
    ) -> Result<bool, BackendError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("backend offline".to_string()));
        }
        self.inner.verify(payload_hash, envelope).await
    }
}

/// Everything a pipeline test needs, wired against in-memory stores.
pub struct TestStack {
    pub secrets: Arc<InMemorySecretStore>,
    pub backend: Arc<UnreliableBackend>,
    pub authority: Arc<SigningAuthority>,
    pub queue: Arc<InMemoryAuditQueue>,
    pub audit_store: Arc<InMemoryAuditStore>,
    pub dead_letters: Arc<InMemoryDeadLetterSink>,
    pub verifier: Arc<AuditVerifier>,
    pub interceptor: Arc<SigningInterceptor>,
}

pub async fn test_stack() -> TestStack {
    let secrets = Arc::new(InMemorySecretStore::new());
    secrets.set_secret(TEST_USER, TEST_SECRET).await.unwrap();

    let backend = Arc::new(UnreliableBackend::new());
    let records = Arc::new(
        notary_service::authority::InMemorySignatureRecordStore::new(),
    );
    let authority = Arc::new(
        SigningAuthority::new(secrets.clone(), backend.clone(), records)
            .with_backend_timeout(Duration::from_secs(5)),
    );

    let queue = Arc::new(InMemoryAuditQueue::new());
    let audit_store = Arc::new(InMemoryAuditStore::new());
    let dead_letters = Arc::new(InMemoryDeadLetterSink::new());
    let verifier = Arc::new(AuditVerifier::new(audit_store.clone(), authority.clone()));
    let interceptor = Arc::new(SigningInterceptor::new(authority.clone(), queue.clone()));

    TestStack {
        secrets,
        backend,
        authority,
        queue,
        audit_store,
        dead_letters,
        verifier,
        interceptor,
    }
}

/// Generate a random entity ID
pub fn random_entity_id(prefix: &str) -> String {
    format!("{}-{}", prefix, &Uuid::new_v4().to_string()[..8])
}

/// Create a test order-cancellation payload
pub fn cancel_order_payload(order_id: &str) -> serde_json::Value {
    json!({
        "order_id": order_id,
        "reason": "customer_request",
        "refund": true,
    })
}
