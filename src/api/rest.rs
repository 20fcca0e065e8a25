//! REST API handlers
//!
//! All /api routes sit behind the auth middleware; handlers read the
//! authenticated identity from request extensions. The transaction secret
//! travels in its own header and is consumed here, never logged.

use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use crate::api::error::{ApiError, ErrorCode};
use crate::api::types::*;
use crate::audit::{AuditStore, AuditVerifier};
use crate::auth::AuthContextExt;
use crate::authority::SigningAuthority;
use crate::credential::SecretStore;
use crate::domain::{AggregateType, CorrelationId, OperationType};
use crate::pipeline::{
    CommandDescriptor, CommandError, CommandRequest, SigningInterceptor,
    TRANSACTION_SECRET_HEADER,
};

/// Default page size for audit queries
const DEFAULT_LIMIT: i64 = 100;
/// Hard cap on page size
const MAX_LIMIT: i64 = 1000;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub authority: Arc<SigningAuthority>,
    pub secrets: Arc<dyn SecretStore>,
    pub audit_store: Arc<dyn AuditStore>,
    pub verifier: Arc<AuditVerifier>,
    pub interceptor: Arc<SigningInterceptor>,
}

/// API routes, nested under /api by the server
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/sign", post(sign_payload))
        .route("/v1/secrets", post(set_secret))
        .route("/v1/secrets/check", post(check_secret))
        .route("/v1/commands/:operation", post(execute_command))
        .route("/v1/audits", get(list_audits))
        .route("/v1/audits/verify", post(verify_signature))
        .route("/v1/audits/:id", get(get_audit))
}

fn secret_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(TRANSACTION_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the user a request acts for. Acting for someone else is an
/// admin-only capability.
fn resolve_user(
    auth: &crate::auth::AuthContext,
    requested: Option<&str>,
) -> Result<String, ApiError> {
    match requested {
        Some(user_id) if user_id != auth.user_id => {
            if auth.is_admin() {
                Ok(user_id.to_string())
            } else {
                Err(ApiError::new(
                    ErrorCode::InsufficientPermissions,
                    "signing for another user requires admin",
                ))
            }
        }
        _ => Ok(auth.user_id.clone()),
    }
}

async fn sign_payload(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    headers: HeaderMap,
    Json(request): Json<SignRequest>,
) -> Result<Json<SignResponse>, ApiError> {
    let secret = secret_from_headers(&headers).ok_or_else(|| {
        ApiError::new(
            ErrorCode::MissingTransactionSecret,
            "transaction secret header missing",
        )
    })?;
    let user_id = resolve_user(&auth, request.user_id.as_deref())?;
    let operation = OperationType::new(request.operation.as_deref().unwrap_or("api.sign"));

    let signed = state
        .authority
        .sign(&user_id, &secret, &request.payload, &operation)
        .await?;

    Ok(Json(SignResponse {
        signature: signed.signature,
        key_id: signed.key_id,
        signed_at: signed.signed_at,
    }))
}

async fn set_secret(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Json(request): Json<SetSecretRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Users rotate their own PIN; setting someone else's requires admin
    if request.user_id != auth.user_id && !auth.is_admin() {
        return Err(ApiError::new(
            ErrorCode::InsufficientPermissions,
            "setting another user's secret requires admin",
        ));
    }

    state
        .secrets
        .set_secret(&request.user_id, &request.secret)
        .await?;

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

async fn check_secret(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Json(request): Json<CheckSecretRequest>,
) -> Result<Json<CheckSecretResponse>, ApiError> {
    if request.user_id != auth.user_id && !auth.is_admin() {
        return Err(ApiError::new(
            ErrorCode::InsufficientPermissions,
            "checking another user's secret requires admin",
        ));
    }

    let valid = state
        .authority
        .check_secret(&request.user_id, &request.secret)
        .await?;

    Ok(Json(CheckSecretResponse { valid }))
}

/// Demo command route exercising the full interceptor pipeline.
///
/// The operation path segment doubles as the descriptor: "order.create"
/// audits as aggregate "order", action "create".
async fn execute_command(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Path(operation): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<CommandResponse>, ApiError> {
    let (aggregate, action) = match operation.split_once('.') {
        Some((aggregate, action)) => (aggregate.to_string(), action.to_string()),
        None => (operation.clone(), "executed".to_string()),
    };
    let descriptor =
        CommandDescriptor::signed(operation, AggregateType::new(aggregate), action);

    let mut request = CommandRequest::new(auth.user_id.clone(), payload);
    if let Some(secret) = secret_from_headers(&headers) {
        request = request.with_secret(secret);
    }
    if let Some(ip) = client_ip(&headers) {
        request = request.with_ip_address(ip);
    }
    let correlation_id: CorrelationId = request.correlation_id;

    let signature_ctx = state
        .interceptor
        .execute(&descriptor, request, |ctx| async move {
            // The demo handler has no business logic of its own; it simply
            // reports the signature it was given
            Ok::<_, CommandError>(ctx)
        })
        .await?;

    Ok(Json(CommandResponse {
        correlation_id: correlation_id.0,
        status: "executed".to_string(),
        signature: signature_ctx.as_ref().map(|c| c.signature.clone()),
        key_id: signature_ctx.as_ref().map(|c| c.key_id.clone()),
        signed_at: signature_ctx.as_ref().map(|c| c.signed_at),
    }))
}

async fn get_audit(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Path(id): Path<Uuid>,
) -> Result<Json<AuditEntryResponse>, ApiError> {
    let entry = state
        .audit_store
        .get(id)
        .await?
        .ok_or_else(|| {
            ApiError::new(ErrorCode::AuditEntryNotFound, "audit entry not found")
                .with_resource_id(id.to_string())
        })?;

    if entry.user_id != auth.user_id && !auth.is_admin() {
        return Err(ApiError::new(
            ErrorCode::InsufficientPermissions,
            "reading another user's audit entries requires admin",
        ));
    }

    Ok(Json(entry.into()))
}

async fn list_audits(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditListResponse>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    if let Some(user_id) = &query.user_id {
        if user_id != &auth.user_id && !auth.is_admin() {
            return Err(ApiError::new(
                ErrorCode::InsufficientPermissions,
                "listing another user's audit entries requires admin",
            ));
        }
        let result = state.audit_store.list_by_user(user_id, page, limit).await?;
        return Ok(Json(AuditListResponse {
            entries: result.entries.into_iter().map(Into::into).collect(),
            total: result.total,
            page: result.page,
            limit: result.limit,
        }));
    }

    if let (Some(aggregate_type), Some(action)) = (&query.aggregate_type, &query.action) {
        if !auth.is_admin() {
            return Err(ApiError::new(
                ErrorCode::InsufficientPermissions,
                "aggregate-wide audit queries require admin",
            ));
        }
        let entries = state
            .audit_store
            .list_by_aggregate(
                &AggregateType::new(aggregate_type.clone()),
                &crate::domain::AuditAction::new(action.clone()),
            )
            .await?;
        let total = entries.len() as i64;
        return Ok(Json(AuditListResponse {
            entries: entries.into_iter().map(Into::into).collect(),
            total,
            page: 1,
            limit: total.max(1),
        }));
    }

    Err(ApiError::new(
        ErrorCode::MissingRequiredField,
        "specify user_id, or aggregate_type and action",
    ))
}

async fn verify_signature(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let outcome = state
        .verifier
        .verify_signature(&request.payload, &request.signature, request.audit_log_id)
        .await?;

    Ok(Json(VerifyResponse {
        is_valid: outcome.is_valid,
        verified_at: outcome.verified_at,
        error_message: outcome.error_message,
    }))
}
