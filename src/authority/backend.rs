//! Key-management backend abstraction
//!
//! Production deployments delegate to an HSM or a transit-style signing
//! API; `LocalKeyBackend` holds the keypair in process and is the reference
//! implementation used in tests and single-node deployments.

use async_trait::async_trait;

use crate::crypto::{
    decode_envelope, encode_envelope, NotarySigningKey, NotaryVerifyingKey,
};
use crate::domain::Hash256;

/// Errors surfaced by a signing backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("signing backend unavailable: {0}")]
    Unavailable(String),

    #[error("signing backend returned a malformed response: {0}")]
    MalformedResponse(String),
}

/// Abstraction over the key-management backend that holds the signing key.
///
/// `sign` returns a versioned signature envelope; the authority validates
/// the envelope format on every response and treats any malformed output
/// as a backend fault.
#[async_trait]
pub trait SigningBackend: Send + Sync {
    /// Identifier of the key this backend signs with
    fn key_id(&self) -> &str;

    /// Sign a payload hash, returning the signature envelope
    async fn sign(&self, payload_hash: &Hash256) -> Result<String, BackendError>;

    /// Verify a signature envelope over a payload hash
    async fn verify(&self, payload_hash: &Hash256, envelope: &str)
        -> Result<bool, BackendError>;
}

/// In-process Ed25519 backend
pub struct LocalKeyBackend {
    key: NotarySigningKey,
    key_id: String,
}

impl LocalKeyBackend {
    pub fn new(key: NotarySigningKey) -> Self {
        // Key id is derived from the public key so rotations are visible
        // in signature metadata
        let key_id = format!("local-{}", &hex::encode(key.public_key_bytes())[..16]);
        Self { key, key_id }
    }

    /// Generate a fresh random keypair
    pub fn generate() -> Self {
        Self::new(NotarySigningKey::generate())
    }

    pub fn verifying_key(&self) -> NotaryVerifyingKey {
        self.key.verifying_key()
    }
}

#[async_trait]
impl SigningBackend for LocalKeyBackend {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    async fn sign(&self, payload_hash: &Hash256) -> Result<String, BackendError> {
        Ok(encode_envelope(&self.key.sign(payload_hash)))
    }

    async fn verify(
        &self,
        payload_hash: &Hash256,
        envelope: &str,
    ) -> Result<bool, BackendError> {
        let Ok(signature) = decode_envelope(envelope) else {
            return Ok(false);
        };
        Ok(self
            .key
            .verifying_key()
            .verify(payload_hash, &signature)
            .is_ok())
    }
}
