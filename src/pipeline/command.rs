//! Command metadata and the explicit signature context

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{AggregateType, AuditAction, CorrelationId, OperationType};

/// Static description of a command: what it operates on and whether it
/// must be signed. The signing requirement is a declared capability, not
/// something inferred from the command's shape.
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    pub operation: OperationType,
    pub aggregate_type: AggregateType,
    pub action: AuditAction,
    pub requires_signature: bool,
}

impl CommandDescriptor {
    pub fn signed(
        operation: impl Into<String>,
        aggregate_type: AggregateType,
        action: impl Into<String>,
    ) -> Self {
        Self {
            operation: OperationType::new(operation),
            aggregate_type,
            action: AuditAction::new(action),
            requires_signature: true,
        }
    }

    pub fn unsigned(
        operation: impl Into<String>,
        aggregate_type: AggregateType,
        action: impl Into<String>,
    ) -> Self {
        Self {
            operation: OperationType::new(operation),
            aggregate_type,
            action: AuditAction::new(action),
            requires_signature: false,
        }
    }
}

/// One command invocation as seen by the interceptor
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub correlation_id: CorrelationId,
    pub user_id: String,
    /// Transaction secret from the request header, if present. Never
    /// logged, never part of the signed payload.
    pub secret: Option<String>,
    pub payload: serde_json::Value,
    pub entity_id: Option<String>,
    pub ip_address: Option<String>,
}

impl CommandRequest {
    pub fn new(user_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            user_id: user_id.into(),
            secret: None,
            payload,
            entity_id: None,
            ip_address: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }
}

/// Proof handed to the handler that its command was signed.
///
/// Passed explicitly as an argument so the data flow is visible at the
/// call site; there is no request-scoped side channel to fetch it from.
#[derive(Debug, Clone, Serialize)]
pub struct SignatureContext {
    pub signature: String,
    pub key_id: String,
    pub signed_at: DateTime<Utc>,
}

/// Business failure reported by a command handler
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CommandError {
    pub status_code: u16,
    pub message: String,
}

impl CommandError {
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }
}
