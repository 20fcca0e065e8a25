//! Request/response DTOs for the REST API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::GlobalAuditLogEntry;

/// POST /api/v1/sign
#[derive(Debug, Deserialize)]
pub struct SignRequest {
    /// Defaults to the authenticated user. Signing on behalf of another
    /// user requires admin.
    #[serde(default)]
    pub user_id: Option<String>,
    pub payload: serde_json::Value,
    /// Operation label recorded with the signature
    #[serde(default)]
    pub operation: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignResponse {
    pub signature: String,
    pub key_id: String,
    pub signed_at: DateTime<Utc>,
}

/// POST /api/v1/secrets
#[derive(Debug, Deserialize)]
pub struct SetSecretRequest {
    pub user_id: String,
    pub secret: String,
}

/// POST /api/v1/secrets/check
#[derive(Debug, Deserialize)]
pub struct CheckSecretRequest {
    pub user_id: String,
    pub secret: String,
}

#[derive(Debug, Serialize)]
pub struct CheckSecretResponse {
    pub valid: bool,
}

/// POST /api/v1/commands/:operation response
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub correlation_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
}

/// GET /api/v1/audits query parameters
#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub aggregate_type: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AuditEntryResponse {
    pub id: Uuid,
    pub event_id: Uuid,
    pub correlation_id: Uuid,
    pub aggregate_type: String,
    pub action: String,
    pub payload: String,
    pub user_id: String,
    pub digital_signature: String,
    pub action_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
}

impl From<GlobalAuditLogEntry> for AuditEntryResponse {
    fn from(entry: GlobalAuditLogEntry) -> Self {
        Self {
            id: entry.id,
            event_id: entry.event_id,
            correlation_id: entry.correlation_id.0,
            aggregate_type: entry.aggregate_type.0,
            action: entry.action.0,
            payload: entry.payload,
            user_id: entry.user_id,
            digital_signature: entry.digital_signature,
            action_timestamp: entry.action_timestamp,
            created_at: entry.created_at,
            is_verified: entry.is_verified,
            verified_at: entry.verified_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuditListResponse {
    pub entries: Vec<AuditEntryResponse>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

/// POST /api/v1/audits/verify
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub payload: serde_json::Value,
    pub signature: String,
    #[serde(default)]
    pub audit_log_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
