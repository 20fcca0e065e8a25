//! Ed25519 signing keys and the versioned signature envelope
//!
//! Signature envelopes carry a version prefix so key material and formats
//! can rotate without breaking old audit entries:
//!
//! ```text
//! notary:v1:<base64 signature bytes>
//! ```
//!
//! The signing authority rejects any backend response that does not parse
//! as a well-formed envelope.

use base64::Engine;
use ed25519_dalek::{
    Signature, Signer, SigningKey, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH,
    SIGNATURE_LENGTH,
};
use rand::rngs::OsRng;

use crate::domain::Hash256;

/// Ed25519 signature (64 bytes)
pub type Signature64 = [u8; SIGNATURE_LENGTH];

/// Ed25519 public key (32 bytes)
pub type PublicKey32 = [u8; PUBLIC_KEY_LENGTH];

/// Ed25519 secret key (32 bytes)
pub type SecretKey32 = [u8; SECRET_KEY_LENGTH];

/// Envelope version emitted by the current backend
pub const ENVELOPE_PREFIX_V1: &str = "notary:v1:";

/// Error type for signing primitives
#[derive(Debug, thiserror::Error)]
pub enum SigningKeyError {
    #[error("invalid signature envelope format")]
    InvalidEnvelopeFormat,

    #[error("invalid public key format")]
    InvalidPublicKeyFormat,

    #[error("signature verification failed")]
    VerificationFailed,
}

/// Signing keypair held by the key-management backend.
#[derive(Clone)]
pub struct NotarySigningKey {
    signing_key: SigningKey,
}

impl NotarySigningKey {
    /// Generate a new random signing key
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create from secret key bytes
    pub fn from_bytes(bytes: &SecretKey32) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Get the secret key bytes
    pub fn to_bytes(&self) -> SecretKey32 {
        self.signing_key.to_bytes()
    }

    /// Get the verifying key for this signing key
    pub fn verifying_key(&self) -> NotaryVerifyingKey {
        NotaryVerifyingKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Get the public key bytes
    pub fn public_key_bytes(&self) -> PublicKey32 {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign a payload hash
    pub fn sign(&self, payload_hash: &Hash256) -> Signature64 {
        self.signing_key.sign(payload_hash).to_bytes()
    }
}

impl std::fmt::Debug for NotarySigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotarySigningKey")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}

/// Public key for signature verification.
#[derive(Clone)]
pub struct NotaryVerifyingKey {
    verifying_key: VerifyingKey,
}

impl NotaryVerifyingKey {
    /// Create from public key bytes
    pub fn from_bytes(bytes: &PublicKey32) -> Result<Self, SigningKeyError> {
        let verifying_key = VerifyingKey::from_bytes(bytes)
            .map_err(|_| SigningKeyError::InvalidPublicKeyFormat)?;
        Ok(Self { verifying_key })
    }

    /// Get the public key bytes
    pub fn to_bytes(&self) -> PublicKey32 {
        self.verifying_key.to_bytes()
    }

    /// Verify a signature over a payload hash
    pub fn verify(
        &self,
        payload_hash: &Hash256,
        signature: &Signature64,
    ) -> Result<(), SigningKeyError> {
        let sig = Signature::from_bytes(signature);
        self.verifying_key
            .verify(payload_hash, &sig)
            .map_err(|_| SigningKeyError::VerificationFailed)
    }
}

impl std::fmt::Debug for NotaryVerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotaryVerifyingKey")
            .field("public_key", &hex::encode(self.to_bytes()))
            .finish()
    }
}

/// Wrap raw signature bytes in the v1 envelope
pub fn encode_envelope(signature: &Signature64) -> String {
    format!(
        "{}{}",
        ENVELOPE_PREFIX_V1,
        base64::engine::general_purpose::STANDARD.encode(signature)
    )
}

/// Parse a v1 signature envelope back to raw bytes.
///
/// Rejects unknown versions and malformed base64.
pub fn decode_envelope(envelope: &str) -> Result<Signature64, SigningKeyError> {
    let encoded = envelope
        .strip_prefix(ENVELOPE_PREFIX_V1)
        .ok_or(SigningKeyError::InvalidEnvelopeFormat)?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| SigningKeyError::InvalidEnvelopeFormat)?;
    bytes
        .try_into()
        .map_err(|_| SigningKeyError::InvalidEnvelopeFormat)
}

/// Convert public key bytes to hex string
pub fn public_key_to_hex(public_key: &PublicKey32) -> String {
    hex::encode(public_key)
}

/// Parse public key from hex string
pub fn public_key_from_hex(hex_str: &str) -> Result<PublicKey32, SigningKeyError> {
    let bytes = hex::decode(hex_str).map_err(|_| SigningKeyError::InvalidPublicKeyFormat)?;
    bytes
        .try_into()
        .map_err(|_| SigningKeyError::InvalidPublicKeyFormat)
}
