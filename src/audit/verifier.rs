//! Audit signature verification
//!
//! Re-derives the canonical payload and checks the stored envelope through
//! the authority. A successful check may flip the entry's verified flag;
//! a failed check reports invalid and leaves the entry exactly as it was.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::audit::store::AuditStore;
use crate::authority::SigningAuthority;
use crate::infra::Result;

#[derive(Debug, Clone, Serialize)]
pub struct VerificationOutcome {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

pub struct AuditVerifier {
    store: Arc<dyn AuditStore>,
    authority: Arc<SigningAuthority>,
}

impl AuditVerifier {
    pub fn new(store: Arc<dyn AuditStore>, authority: Arc<SigningAuthority>) -> Self {
        Self { store, authority }
    }

    /// Verify a signature over a payload, optionally binding the outcome to
    /// an audit entry.
    ///
    /// When `audit_log_id` is given and the signature checks out, the
    /// entry's `is_verified` flips to true; the transition is one-way, so a
    /// later failed verification against the same entry changes nothing.
    pub async fn verify_signature(
        &self,
        payload: &serde_json::Value,
        signature: &str,
        audit_log_id: Option<Uuid>,
    ) -> Result<VerificationOutcome> {
        let is_valid = self.authority.verify(payload, signature).await;

        if !is_valid {
            return Ok(VerificationOutcome {
                is_valid: false,
                verified_at: None,
                error_message: Some("signature verification failed".to_string()),
            });
        }

        let verified_at = match audit_log_id {
            Some(id) => {
                let entry = self.store.mark_verified(id).await?;
                tracing::info!(audit_log_id = %id, "Audit entry verified");
                entry.verified_at
            }
            None => Some(Utc::now()),
        };

        Ok(VerificationOutcome {
            is_valid: true,
            verified_at,
            error_message: None,
        })
    }

    /// Re-verify a stored audit entry against its own payload and signature.
    pub async fn verify_entry(&self, audit_log_id: Uuid) -> Result<VerificationOutcome> {
        let entry = self
            .store
            .get(audit_log_id)
            .await?
            .ok_or(crate::infra::NotaryError::AuditEntryNotFound(audit_log_id))?;

        let is_valid = self
            .authority
            .verify_canonical(&entry.payload, &entry.digital_signature)
            .await;

        if !is_valid {
            return Ok(VerificationOutcome {
                is_valid: false,
                verified_at: entry.verified_at,
                error_message: Some("signature verification failed".to_string()),
            });
        }

        let updated = self.store.mark_verified(audit_log_id).await?;
        Ok(VerificationOutcome {
            is_valid: true,
            verified_at: updated.verified_at,
            error_message: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::store::InMemoryAuditStore;
    use crate::authority::{InMemorySignatureRecordStore, LocalKeyBackend};
    use crate::credential::InMemorySecretStore;
    use crate::crypto::canonicalize_json;
    use crate::domain::{
        AggregateType, AuditAction, CorrelationId, GlobalAuditLogEntry, OperationType,
    };
    use serde_json::json;

    async fn verifier_with_entry(
        payload: &serde_json::Value,
    ) -> (AuditVerifier, Arc<InMemoryAuditStore>, Uuid, String) {
        let store = Arc::new(InMemoryAuditStore::new());
        let authority = Arc::new(SigningAuthority::new(
            Arc::new(InMemorySecretStore::new()),
            Arc::new(LocalKeyBackend::generate()),
            Arc::new(InMemorySignatureRecordStore::new()),
        ));

        let signed = authority
            .sign_system("u1", payload, &OperationType::new("order.create"))
            .await
            .unwrap();

        let entry = GlobalAuditLogEntry {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            correlation_id: CorrelationId::new(),
            aggregate_type: AggregateType::order(),
            action: AuditAction::new("created"),
            payload: canonicalize_json(payload).unwrap(),
            user_id: "u1".to_string(),
            digital_signature: signed.signature.clone(),
            action_timestamp: Utc::now(),
            created_at: Utc::now(),
            is_verified: false,
            verified_at: None,
        };
        let id = store.upsert(&entry).await.unwrap();

        let verifier = AuditVerifier::new(store.clone(), authority);
        (verifier, store, id, signed.signature)
    }

    #[tokio::test]
    async fn test_valid_signature_flips_verified_flag() {
        let payload = json!({"orderId": "ord-1"});
        let (verifier, store, id, signature) = verifier_with_entry(&payload).await;

        let outcome = verifier
            .verify_signature(&payload, &signature, Some(id))
            .await
            .unwrap();

        assert!(outcome.is_valid);
        assert!(outcome.verified_at.is_some());
        assert!(store.get(id).await.unwrap().unwrap().is_verified);
    }

    #[tokio::test]
    async fn test_failed_verification_never_reverts_the_flag() {
        let payload = json!({"orderId": "ord-1"});
        let (verifier, store, id, signature) = verifier_with_entry(&payload).await;

        verifier
            .verify_signature(&payload, &signature, Some(id))
            .await
            .unwrap();

        // wrong payload against the same entry
        let outcome = verifier
            .verify_signature(&json!({"orderId": "tampered"}), &signature, Some(id))
            .await
            .unwrap();

        assert!(!outcome.is_valid);
        assert!(store.get(id).await.unwrap().unwrap().is_verified);
    }

    #[tokio::test]
    async fn test_invalid_signature_reports_error_message() {
        let payload = json!({"orderId": "ord-1"});
        let (verifier, _, _, _) = verifier_with_entry(&payload).await;

        let outcome = verifier
            .verify_signature(&payload, "notary:v1:????", None)
            .await
            .unwrap();

        assert!(!outcome.is_valid);
        assert!(outcome.error_message.is_some());
    }

    #[tokio::test]
    async fn test_verify_entry_roundtrip() {
        let payload = json!({"orderId": "ord-9", "total": 12.5});
        let (verifier, _, id, _) = verifier_with_entry(&payload).await;

        let outcome = verifier.verify_entry(id).await.unwrap();
        assert!(outcome.is_valid);
    }

    #[tokio::test]
    async fn test_verify_unknown_entry_is_not_found() {
        let payload = json!({"a": 1});
        let (verifier, _, _, _) = verifier_with_entry(&payload).await;

        assert!(verifier.verify_entry(Uuid::new_v4()).await.is_err());
    }
}
