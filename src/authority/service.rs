//! The signing authority
//!
//! Owns both sides of the trust boundary: PIN verification against the
//! credential store and signature production through the key-management
//! backend. Every sign request walks a small state machine:
//!
//! ```text
//! Received -> SecretChecked -> Signed -> Returned
//!     \______________________________-> Rejected
//! ```
//!
//! The authority fails fast and never retries the backend itself. Retry is
//! a caller policy; a signing authority that silently re-submits could
//! double-sign a mutated payload.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::authority::backend::{BackendError, SigningBackend};
use crate::authority::record_store::SignatureRecordStore;
use crate::credential::SecretStore;
use crate::crypto::{canonicalize_json, decode_envelope, payload_signing_hash};
use crate::domain::{OperationType, SignatureRecord};
use crate::infra::CircuitBreaker;

/// Largest canonical payload the authority will sign (256 KiB)
pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// Default bound on a single backend sign call
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a successful sign request
#[derive(Debug, Clone, Serialize)]
pub struct SignedPayload {
    /// Versioned signature envelope
    pub signature: String,
    /// Key the backend signed with
    pub key_id: String,
    pub signed_at: DateTime<Utc>,
}

/// Errors at the authority boundary, each with a distinct caller remedy
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// The transaction secret did not verify. Not retryable with the same
    /// input; the caller must re-prompt the user.
    #[error("transaction secret verification failed")]
    InvalidSecret,

    /// The request itself is malformed (empty or oversized payload,
    /// missing user id)
    #[error("invalid sign request: {0}")]
    InvalidArgument(String),

    /// The signing backend is down or the circuit is open. Retryable later.
    #[error("signing backend unavailable: {0}")]
    Unavailable(String),

    /// Anything else. Not safe to blindly retry.
    #[error("internal signing error: {0}")]
    Internal(String),
}

/// Internal request state, traced per transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignState {
    Received,
    SecretChecked,
    Signed,
    Returned,
    Rejected,
}

impl std::fmt::Display for SignState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignState::Received => "received",
            SignState::SecretChecked => "secret_checked",
            SignState::Signed => "signed",
            SignState::Returned => "returned",
            SignState::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

/// Central signing authority
pub struct SigningAuthority {
    secrets: Arc<dyn SecretStore>,
    backend: Arc<dyn SigningBackend>,
    records: Arc<dyn SignatureRecordStore>,
    breaker: Arc<CircuitBreaker>,
    backend_timeout: Duration,
}

impl SigningAuthority {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        backend: Arc<dyn SigningBackend>,
        records: Arc<dyn SignatureRecordStore>,
    ) -> Self {
        Self {
            secrets,
            backend,
            records,
            breaker: Arc::new(CircuitBreaker::new("signing-backend")),
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    /// Bound the backend sign call. The timeout lives here rather than at
    /// the caller so that a timed-out request can never race the signature
    /// record append: the append only starts once the backend has answered.
    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn key_id(&self) -> &str {
        self.backend.key_id()
    }

    /// Check a user's transaction secret without signing anything.
    pub async fn check_secret(&self, user_id: &str, secret: &str) -> Result<bool, SigningError> {
        if user_id.trim().is_empty() || secret.is_empty() {
            return Ok(false);
        }
        self.secrets
            .verify_secret(user_id, secret)
            .await
            .map_err(|e| SigningError::Internal(e.to_string()))
    }

    /// Sign a payload on behalf of a user after verifying their secret.
    #[tracing::instrument(skip_all, fields(user_id = %user_id, operation = %operation))]
    pub async fn sign(
        &self,
        user_id: &str,
        secret: &str,
        payload: &serde_json::Value,
        operation: &OperationType,
    ) -> Result<SignedPayload, SigningError> {
        let mut state = SignState::Received;

        if user_id.trim().is_empty() {
            return Err(self.reject(&mut state, SigningError::InvalidArgument(
                "user_id is empty".into(),
            )));
        }
        if secret.is_empty() {
            return Err(self.reject(&mut state, SigningError::InvalidSecret));
        }

        // Secret check comes before any payload work so a bad PIN costs
        // nothing beyond the hash comparison
        let valid = self
            .secrets
            .verify_secret(user_id, secret)
            .await
            .map_err(|e| SigningError::Internal(e.to_string()))?;
        if !valid {
            return Err(self.reject(&mut state, SigningError::InvalidSecret));
        }
        state = SignState::SecretChecked;

        let signed = self.sign_checked(user_id, payload, operation, &mut state).await?;
        state = SignState::Returned;
        tracing::debug!(state = %state, key_id = %signed.key_id, "Sign request completed");
        Ok(signed)
    }

    /// Server-to-server signing path for trusted internal callers.
    ///
    /// Used by the audit consumer to sign events whose signing moment was
    /// deferred past the original request. No secret is involved; callers
    /// must already sit inside the trust boundary.
    pub async fn sign_system(
        &self,
        user_id: &str,
        payload: &serde_json::Value,
        operation: &OperationType,
    ) -> Result<SignedPayload, SigningError> {
        let mut state = SignState::SecretChecked;
        let signed = self.sign_checked(user_id, payload, operation, &mut state).await?;
        Ok(signed)
    }

    /// Verify a signature envelope over a payload.
    ///
    /// Advisory only: any ambiguity (backend error, malformed envelope,
    /// non-canonicalizable payload) is reported as `false`, never an error.
    pub async fn verify(&self, payload: &serde_json::Value, envelope: &str) -> bool {
        if decode_envelope(envelope).is_err() {
            return false;
        }
        let Ok(canonical) = canonicalize_json(payload) else {
            return false;
        };
        let hash = payload_signing_hash(&canonical);
        match self.backend.verify(&hash, envelope).await {
            Ok(valid) => valid,
            Err(e) => {
                tracing::warn!(error = %e, "Verification backend error, reporting invalid");
                false
            }
        }
    }

    /// Verify against an already-canonical payload string.
    pub async fn verify_canonical(&self, canonical_payload: &str, envelope: &str) -> bool {
        if decode_envelope(envelope).is_err() {
            return false;
        }
        let hash = payload_signing_hash(canonical_payload);
        match self.backend.verify(&hash, envelope).await {
            Ok(valid) => valid,
            Err(e) => {
                tracing::warn!(error = %e, "Verification backend error, reporting invalid");
                false
            }
        }
    }

    async fn sign_checked(
        &self,
        user_id: &str,
        payload: &serde_json::Value,
        operation: &OperationType,
        state: &mut SignState,
    ) -> Result<SignedPayload, SigningError> {
        if payload.is_null() {
            return Err(self.reject(state, SigningError::InvalidArgument(
                "payload is empty".into(),
            )));
        }

        let canonical = canonicalize_json(payload)
            .map_err(|e| SigningError::InvalidArgument(e.to_string()))?;
        if canonical.len() > MAX_PAYLOAD_BYTES {
            return Err(self.reject(state, SigningError::InvalidArgument(format!(
                "payload is {} bytes, max is {MAX_PAYLOAD_BYTES}",
                canonical.len()
            ))));
        }

        if !self.breaker.is_allowed().await {
            return Err(self.reject(state, SigningError::Unavailable(
                "signing backend circuit open".into(),
            )));
        }

        let hash = payload_signing_hash(&canonical);
        // One attempt only, bounded by the backend timeout; callers own
        // retry policy
        let envelope =
            match tokio::time::timeout(self.backend_timeout, self.backend.sign(&hash)).await {
                Ok(Ok(envelope)) => envelope,
                Ok(Err(BackendError::Unavailable(msg))) => {
                    self.breaker.record_failure().await;
                    return Err(self.reject(state, SigningError::Unavailable(msg)));
                }
                Ok(Err(BackendError::MalformedResponse(msg))) => {
                    self.breaker.record_failure().await;
                    return Err(self.reject(state, SigningError::Internal(msg)));
                }
                Err(_) => {
                    self.breaker.record_failure().await;
                    return Err(self.reject(
                        state,
                        SigningError::Unavailable(format!(
                            "signing backend timed out after {:?}",
                            self.backend_timeout
                        )),
                    ));
                }
            };

        // The envelope format is validated on every backend response
        if decode_envelope(&envelope).is_err() {
            self.breaker.record_failure().await;
            return Err(self.reject(state, SigningError::Internal(
                "backend returned a malformed signature envelope".into(),
            )));
        }

        self.breaker.record_success().await;
        *state = SignState::Signed;

        let record =
            SignatureRecord::new(canonical, envelope.clone(), operation.clone(), user_id);
        let signed_at = record.created_at;
        self.records
            .append(&record)
            .await
            .map_err(|e| SigningError::Internal(e.to_string()))?;

        Ok(SignedPayload {
            signature: envelope,
            key_id: self.backend.key_id().to_string(),
            signed_at,
        })
    }

    fn reject(&self, state: &mut SignState, err: SigningError) -> SigningError {
        *state = SignState::Rejected;
        tracing::debug!(state = %state, error = %err, "Sign request rejected");
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::backend::testing::FlakyBackend;
    use crate::authority::backend::LocalKeyBackend;
    use crate::authority::record_store::InMemorySignatureRecordStore;
    use crate::credential::InMemorySecretStore;
    use serde_json::json;

    use crate::domain::Hash256;
    use async_trait::async_trait;

    /// Backend whose sign call hangs long enough to trip any timeout
    struct SlowBackend {
        inner: LocalKeyBackend,
        delay: Duration,
    }

    #[async_trait]
    impl SigningBackend for SlowBackend {
        fn key_id(&self) -> &str {
            self.inner.key_id()
        }

        async fn sign(&self, payload_hash: &Hash256) -> Result<String, BackendError> {
            tokio::time::sleep(self.delay).await;
            self.inner.sign(payload_hash).await
        }

        async fn verify(
            &self,
            payload_hash: &Hash256,
            envelope: &str,
        ) -> Result<bool, BackendError> {
            self.inner.verify(payload_hash, envelope).await
        }
    }

    async fn authority_with(
        backend: Arc<dyn SigningBackend>,
    ) -> (SigningAuthority, Arc<InMemorySignatureRecordStore>) {
        let secrets = Arc::new(InMemorySecretStore::new());
        secrets.set_secret("u1", "1234").await.unwrap();
        let records = Arc::new(InMemorySignatureRecordStore::new());
        let authority = SigningAuthority::new(secrets, backend, records.clone());
        (authority, records)
    }

    #[tokio::test]
    async fn test_sign_happy_path_records_signature() {
        let (authority, records) =
            authority_with(Arc::new(LocalKeyBackend::generate())).await;
        let payload = json!({"orderId": "ord-1", "total": 99.5});

        let signed = authority
            .sign("u1", "1234", &payload, &OperationType::new("order.create"))
            .await
            .unwrap();

        assert!(signed.signature.starts_with("notary:v1:"));
        assert!(signed.key_id.starts_with("local-"));
        assert_eq!(records.len().await, 1);
        assert!(authority.verify(&payload, &signed.signature).await);
    }

    #[tokio::test]
    async fn test_backend_timeout_leaves_no_signature_record() {
        let backend = Arc::new(SlowBackend {
            inner: LocalKeyBackend::generate(),
            delay: Duration::from_millis(500),
        });
        let (authority, records) = authority_with(backend).await;
        let authority = authority.with_backend_timeout(Duration::from_millis(10));

        let err = authority
            .sign(
                "u1",
                "1234",
                &json!({"orderId": "ord-1"}),
                &OperationType::new("order.create"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SigningError::Unavailable(_)));
        // a timed-out attempt must not leave a record behind
        assert_eq!(records.len().await, 0);
    }

    #[tokio::test]
    async fn test_wrong_secret_fails_fast_without_signing() {
        let (authority, records) =
            authority_with(Arc::new(LocalKeyBackend::generate())).await;

        let err = authority
            .sign("u1", "9999", &json!({"a": 1}), &OperationType::new("op"))
            .await
            .unwrap_err();

        assert!(matches!(err, SigningError::InvalidSecret));
        assert!(records.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_user_is_invalid_secret() {
        let (authority, _) = authority_with(Arc::new(LocalKeyBackend::generate())).await;
        let err = authority
            .sign("ghost", "1234", &json!({"a": 1}), &OperationType::new("op"))
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::InvalidSecret));
    }

    #[tokio::test]
    async fn test_null_payload_rejected() {
        let (authority, _) = authority_with(Arc::new(LocalKeyBackend::generate())).await;
        let err = authority
            .sign("u1", "1234", &serde_json::Value::Null, &OperationType::new("op"))
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let (authority, _) = authority_with(Arc::new(LocalKeyBackend::generate())).await;
        let big = json!({"blob": "x".repeat(MAX_PAYLOAD_BYTES + 1)});
        let err = authority
            .sign("u1", "1234", &big, &OperationType::new("op"))
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_backend_outage_is_unavailable_not_retried() {
        let backend = Arc::new(FlakyBackend::new());
        backend.set_down(true);
        let (authority, records) = authority_with(backend).await;

        let err = authority
            .sign("u1", "1234", &json!({"a": 1}), &OperationType::new("op"))
            .await
            .unwrap_err();

        assert!(matches!(err, SigningError::Unavailable(_)));
        assert!(records.is_empty().await);
    }

    #[tokio::test]
    async fn test_repeated_outages_open_the_circuit() {
        let backend = Arc::new(FlakyBackend::new());
        backend.set_down(true);
        let (authority, _) = authority_with(backend.clone()).await;

        for _ in 0..5 {
            let _ = authority
                .sign("u1", "1234", &json!({"a": 1}), &OperationType::new("op"))
                .await;
        }

        // Backend recovers but the circuit is open, so calls still fail fast
        backend.set_down(false);
        let err = authority
            .sign("u1", "1234", &json!({"a": 1}), &OperationType::new("op"))
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_sign_system_skips_secret_check() {
        let (authority, records) =
            authority_with(Arc::new(LocalKeyBackend::generate())).await;
        let payload = json!({"deferred": true});

        let signed = authority
            .sign_system("u2", &payload, &OperationType::new("audit.deferred"))
            .await
            .unwrap();

        assert!(authority.verify(&payload, &signed.signature).await);
        assert_eq!(records.len().await, 1);
    }

    #[tokio::test]
    async fn test_verify_is_advisory_false_on_garbage() {
        let (authority, _) = authority_with(Arc::new(LocalKeyBackend::generate())).await;
        assert!(!authority.verify(&json!({"a": 1}), "not-an-envelope").await);
        assert!(!authority.verify(&json!({"a": 1}), "notary:v1:AAAA").await);
    }

    #[tokio::test]
    async fn test_check_secret() {
        let (authority, _) = authority_with(Arc::new(LocalKeyBackend::generate())).await;
        assert!(authority.check_secret("u1", "1234").await.unwrap());
        assert!(!authority.check_secret("u1", "0000").await.unwrap());
        assert!(!authority.check_secret("", "1234").await.unwrap());
    }
}
