//! Durable records: signature proofs, audit log entries, secret profiles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AggregateType, AuditAction, CorrelationId, OperationType};

/// Proof that a specific operation was authorized at a point in time.
///
/// Immutable once created: append-only, soft-deleted for retention only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub id: Uuid,
    /// Canonical serialized command exactly as signed
    pub payload: String,
    /// Versioned signature envelope (`notary:v1:<base64>`)
    pub signature_value: String,
    pub operation_type: OperationType,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub deleted: bool,
}

impl SignatureRecord {
    pub fn new(
        payload: impl Into<String>,
        signature_value: impl Into<String>,
        operation_type: OperationType,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: payload.into(),
            signature_value: signature_value.into(),
            operation_type,
            user_id: user_id.into(),
            created_at: Utc::now(),
            deleted: false,
        }
    }
}

/// The audit-of-record entry owned exclusively by the audit service.
///
/// `digital_signature` must remain independently verifiable against
/// `payload` with the signing authority's public key at any later time.
/// `is_verified` transitions once, false to true, and never reverts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalAuditLogEntry {
    pub id: Uuid,
    /// Event id of the message that produced this entry (idempotency key)
    pub event_id: Uuid,
    pub correlation_id: CorrelationId,
    pub aggregate_type: AggregateType,
    pub action: AuditAction,
    /// Canonical serialized payload the signature covers
    pub payload: String,
    pub user_id: String,
    /// Versioned signature envelope
    pub digital_signature: String,
    /// When the audited action occurred
    pub action_timestamp: DateTime<Utc>,
    /// When the entry was persisted
    pub created_at: DateTime<Utc>,
    /// True only after independent re-verification through the authority
    pub is_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
}

/// Per-user transaction-secret profile, owned by the credential store.
///
/// Created on first PIN setup, mutated only by rotation, never deleted.
#[derive(Debug, Clone)]
pub struct UserSecretProfile {
    pub user_id: String,
    /// PHC-format Argon2id hash, salt included
    pub secret_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-disable: blocks verification without losing the profile
    pub disabled: bool,
}
