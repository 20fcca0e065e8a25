//! Authentication middleware for Axum

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::{AuthContext, AuthError, JwtValidator, Permissions};

/// Auth context extension inserted into authenticated requests
#[derive(Clone)]
pub struct AuthContextExt(pub AuthContext);

/// Authentication middleware state
#[derive(Clone)]
pub struct AuthMiddlewareState {
    pub jwt_validator: Arc<JwtValidator>,
    /// If false, unauthenticated requests get a development identity.
    pub require_auth: bool,
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let context = match authenticate(&state.jwt_validator, auth_header) {
        Ok(context) => context,
        Err(e) if state.require_auth => return auth_error_response(e),
        Err(_) => AuthContext {
            user_id: "dev".to_string(),
            permissions: Permissions::admin(),
        },
    };

    request.extensions_mut().insert(AuthContextExt(context));
    next.run(request).await
}

fn authenticate(
    validator: &JwtValidator,
    auth_header: Option<&str>,
) -> Result<AuthContext, AuthError> {
    let header = auth_header.ok_or(AuthError::MissingAuth)?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::MissingAuth)?;
    validator.validate(token)
}

fn auth_error_response(error: AuthError) -> Response {
    let (status, message) = match error {
        AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Missing authentication"),
        AuthError::InvalidJwt(_) => (StatusCode::UNAUTHORIZED, "Invalid JWT"),
        AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "Token expired"),
        AuthError::InsufficientPermissions => {
            (StatusCode::FORBIDDEN, "Insufficient permissions")
        }
    };

    (
        status,
        axum::Json(serde_json::json!({
            "error": message,
            "code": format!("{:?}", error).to_lowercase()
        })),
    )
        .into_response()
}
