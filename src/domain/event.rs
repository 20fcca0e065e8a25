//! Audited-action event: the in-flight message between the signing
//! interceptor and the audit consumer.
//!
//! Delivery is at-least-once; consumers deduplicate by `event_id`. The
//! event may carry a signature (signed synchronously at intercept time) or
//! none, in which case the consumer signs the payload at persistence time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AggregateType, AuditAction, CorrelationId};

/// One audited operation, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditedActionEvent {
    /// Globally unique event identifier (idempotency key for the consumer)
    pub event_id: Uuid,

    /// Correlates the event with the originating request
    pub correlation_id: CorrelationId,

    /// Aggregate the action touched (customer, order, payroll...)
    pub aggregate_type: AggregateType,

    /// Action performed (created, updated, signed...)
    pub action: AuditAction,

    /// Identifier of the affected entity, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Command payload as submitted (canonicalized before signing)
    pub payload: serde_json::Value,

    /// Acting user
    pub user_id: String,

    /// Signature envelope produced at intercept time, absent for flows
    /// that defer signing to the consumer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Client IP the request arrived from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    /// When the action occurred
    pub timestamp: DateTime<Utc>,

    /// Outcome of the business handler (HTTP-style status)
    pub status_code: u16,

    /// Error detail when the handler failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AuditedActionEvent {
    /// Create an event for a successful operation.
    pub fn new(
        correlation_id: CorrelationId,
        aggregate_type: AggregateType,
        action: AuditAction,
        payload: serde_json::Value,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            correlation_id,
            aggregate_type,
            action,
            entity_id: None,
            payload,
            user_id: user_id.into(),
            signature: None,
            ip_address: None,
            timestamp: Utc::now(),
            status_code: 200,
            error_message: None,
        }
    }

    /// Attach the entity identifier
    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Attach the signature envelope produced at intercept time
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Attach the client IP
    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// Mark the event as describing a failed operation
    pub fn failed(mut self, status_code: u16, error: impl Into<String>) -> Self {
        self.status_code = status_code;
        self.error_message = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_builder() {
        let event = AuditedActionEvent::new(
            CorrelationId::new(),
            AggregateType::customer(),
            AuditAction::new("created"),
            json!({"name": "Acme"}),
            "u1",
        )
        .with_entity_id("cust-42")
        .with_ip_address("10.0.0.1");

        assert_eq!(event.user_id, "u1");
        assert_eq!(event.status_code, 200);
        assert_eq!(event.entity_id.as_deref(), Some("cust-42"));
        assert!(event.signature.is_none());
        assert!(event.error_message.is_none());
    }

    #[test]
    fn test_failed_event() {
        let event = AuditedActionEvent::new(
            CorrelationId::new(),
            AggregateType::order(),
            AuditAction::new("signed"),
            json!({}),
            "u2",
        )
        .failed(409, "duplicate order");

        assert_eq!(event.status_code, 409);
        assert_eq!(event.error_message.as_deref(), Some("duplicate order"));
    }

    #[test]
    fn test_event_serde_roundtrip_preserves_event_id() {
        let event = AuditedActionEvent::new(
            CorrelationId::new(),
            AggregateType::order(),
            AuditAction::new("created"),
            json!({"total": 99.5}),
            "u3",
        );

        let json = serde_json::to_string(&event).unwrap();
        let back: AuditedActionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_id, event.event_id);
        assert_eq!(back.correlation_id, event.correlation_id);
    }
}
