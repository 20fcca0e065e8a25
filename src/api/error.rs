//! Structured API error responses with error codes
//!
//! Machine-readable error codes with stable numeric identifiers. Internal
//! detail (backend addresses, SQL text) never reaches the response body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::authority::SigningError;
use crate::infra::NotaryError;
use crate::pipeline::InterceptError;

/// Error codes for API responses
///
/// These codes are stable and can be used by clients for programmatic
/// error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication errors (1xxx)
    /// No authentication credentials provided
    AuthRequired,
    /// Invalid or expired JWT token
    InvalidToken,
    /// Insufficient permissions for this operation
    InsufficientPermissions,
    /// Transaction secret header missing
    MissingTransactionSecret,
    /// Transaction secret verification failed
    InvalidTransactionSecret,

    // Validation errors (2xxx)
    /// Request body is malformed
    InvalidRequestBody,
    /// Required field is missing
    MissingRequiredField,
    /// Field value is invalid
    InvalidFieldValue,
    /// Payload exceeds size limit
    PayloadTooLarge,

    // Resource errors (3xxx)
    /// Requested resource not found
    ResourceNotFound,
    /// Audit entry not found
    AuditEntryNotFound,
    /// Secret profile not found
    SecretProfileNotFound,

    // Signature errors (4xxx)
    /// Invalid signature envelope format
    InvalidSignature,
    /// Signature verification failed
    SignatureVerificationFailed,

    // Infrastructure errors (5xxx)
    /// Database operation failed
    DatabaseError,
    /// Signing backend unavailable
    SigningUnavailable,
    /// Operation timed out
    Timeout,
    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn numeric_code(&self) -> u32 {
        match self {
            ErrorCode::AuthRequired => 1001,
            ErrorCode::InvalidToken => 1002,
            ErrorCode::InsufficientPermissions => 1003,
            ErrorCode::MissingTransactionSecret => 1004,
            ErrorCode::InvalidTransactionSecret => 1005,

            ErrorCode::InvalidRequestBody => 2001,
            ErrorCode::MissingRequiredField => 2002,
            ErrorCode::InvalidFieldValue => 2003,
            ErrorCode::PayloadTooLarge => 2004,

            ErrorCode::ResourceNotFound => 3001,
            ErrorCode::AuditEntryNotFound => 3002,
            ErrorCode::SecretProfileNotFound => 3003,

            ErrorCode::InvalidSignature => 4001,
            ErrorCode::SignatureVerificationFailed => 4002,

            ErrorCode::DatabaseError => 5001,
            ErrorCode::SigningUnavailable => 5002,
            ErrorCode::Timeout => 5003,
            ErrorCode::InternalError => 5999,
        }
    }

    /// Get the HTTP status code for this error
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::AuthRequired => StatusCode::UNAUTHORIZED,
            ErrorCode::InvalidToken => StatusCode::UNAUTHORIZED,
            ErrorCode::InsufficientPermissions => StatusCode::FORBIDDEN,
            ErrorCode::MissingTransactionSecret => StatusCode::UNAUTHORIZED,
            ErrorCode::InvalidTransactionSecret => StatusCode::UNAUTHORIZED,

            ErrorCode::InvalidRequestBody => StatusCode::BAD_REQUEST,
            ErrorCode::MissingRequiredField => StatusCode::BAD_REQUEST,
            ErrorCode::InvalidFieldValue => StatusCode::BAD_REQUEST,
            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,

            ErrorCode::ResourceNotFound => StatusCode::NOT_FOUND,
            ErrorCode::AuditEntryNotFound => StatusCode::NOT_FOUND,
            ErrorCode::SecretProfileNotFound => StatusCode::NOT_FOUND,

            ErrorCode::InvalidSignature => StatusCode::BAD_REQUEST,
            ErrorCode::SignatureVerificationFailed => StatusCode::BAD_REQUEST,

            ErrorCode::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::SigningUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code_str = match self {
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            ErrorCode::MissingTransactionSecret => "MISSING_TRANSACTION_SECRET",
            ErrorCode::InvalidTransactionSecret => "INVALID_TRANSACTION_SECRET",
            ErrorCode::InvalidRequestBody => "INVALID_REQUEST_BODY",
            ErrorCode::MissingRequiredField => "MISSING_REQUIRED_FIELD",
            ErrorCode::InvalidFieldValue => "INVALID_FIELD_VALUE",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::AuditEntryNotFound => "AUDIT_ENTRY_NOT_FOUND",
            ErrorCode::SecretProfileNotFound => "SECRET_PROFILE_NOT_FOUND",
            ErrorCode::InvalidSignature => "INVALID_SIGNATURE",
            ErrorCode::SignatureVerificationFailed => "SIGNATURE_VERIFICATION_FAILED",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::SigningUnavailable => "SIGNING_UNAVAILABLE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{code_str}")
    }
}

/// Structured error response for API endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ErrorDetails,
}

/// Detailed error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code for easy categorization
    pub numeric_code: u32,

    /// Human-readable error message
    pub message: String,

    /// Unique request ID for tracing (if available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Related resource ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                code,
                numeric_code: code.numeric_code(),
                message: message.into(),
                request_id: None,
                resource_id: None,
            },
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.error.request_id = Some(request_id.into());
        self
    }

    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.error.resource_id = Some(id.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.error.code.http_status()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code_str = self.error.code.to_string();
        let mut response = (status, Json(self)).into_response();

        if let Ok(code_value) = axum::http::HeaderValue::from_str(&code_str) {
            response.headers_mut().insert(
                axum::http::header::HeaderName::from_static("x-error-code"),
                code_value,
            );
        }

        response
    }
}

impl From<NotaryError> for ApiError {
    fn from(err: NotaryError) -> Self {
        match err {
            NotaryError::AuditEntryNotFound(id) => {
                ApiError::new(ErrorCode::AuditEntryNotFound, "audit entry not found")
                    .with_resource_id(id.to_string())
            }
            NotaryError::SecretProfileNotFound(user_id) => {
                ApiError::new(ErrorCode::SecretProfileNotFound, "secret profile not found")
                    .with_resource_id(user_id)
            }
            NotaryError::InvalidArgument(msg) => {
                ApiError::new(ErrorCode::InvalidFieldValue, msg)
            }
            NotaryError::Database(_) => {
                ApiError::new(ErrorCode::DatabaseError, "database operation failed")
            }
            _ => ApiError::new(ErrorCode::InternalError, "internal error"),
        }
    }
}

impl From<SigningError> for ApiError {
    fn from(err: SigningError) -> Self {
        match err {
            SigningError::InvalidSecret => ApiError::new(
                ErrorCode::InvalidTransactionSecret,
                "transaction secret verification failed",
            ),
            SigningError::InvalidArgument(msg) => {
                ApiError::new(ErrorCode::InvalidFieldValue, msg)
            }
            SigningError::Unavailable(_) => ApiError::new(
                ErrorCode::SigningUnavailable,
                "signing backend unavailable",
            ),
            SigningError::Internal(_) => {
                ApiError::new(ErrorCode::InternalError, "internal signing error")
            }
        }
    }
}

impl From<InterceptError> for ApiError {
    fn from(err: InterceptError) -> Self {
        match err {
            InterceptError::MissingSecret => ApiError::new(
                ErrorCode::MissingTransactionSecret,
                "transaction secret header missing",
            ),
            InterceptError::Signing(e) => e.into(),
            InterceptError::Command(e) => {
                let code = match e.status_code {
                    404 => ErrorCode::ResourceNotFound,
                    400 => ErrorCode::InvalidFieldValue,
                    _ => ErrorCode::InternalError,
                };
                ApiError::new(code, e.message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ErrorCode::InvalidTransactionSecret.http_status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ErrorCode::SigningUnavailable.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorCode::PayloadTooLarge.http_status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ErrorCode::AuditEntryNotFound.http_status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_signing_error_conversion() {
        let api: ApiError = SigningError::InvalidSecret.into();
        assert_eq!(api.status(), StatusCode::UNAUTHORIZED);

        let api: ApiError = SigningError::Unavailable("down".into()).into();
        assert_eq!(api.status(), StatusCode::SERVICE_UNAVAILABLE);

        let api: ApiError = SigningError::InvalidArgument("too big".into()).into();
        assert_eq!(api.status(), StatusCode::BAD_REQUEST);

        let api: ApiError = SigningError::Internal("boom".into()).into();
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // internal detail is not leaked
        assert!(!api.error.message.contains("boom"));
    }

    #[test]
    fn test_serialized_shape() {
        let api = ApiError::new(ErrorCode::AuditEntryNotFound, "audit entry not found");
        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json["error"]["code"], "AUDIT_ENTRY_NOT_FOUND");
        assert_eq!(json["error"]["numeric_code"], 3002);
    }
}
