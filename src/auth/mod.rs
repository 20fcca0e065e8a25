//! Request authentication
//!
//! Bearer JWT only. The token's subject is the acting user id; the signing
//! interceptor trusts this identity and pairs it with the transaction
//! secret header, which is a separate proof and never part of the token.

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtValidator};
pub use middleware::{auth_middleware, AuthContextExt, AuthMiddlewareState};

use thiserror::Error;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authentication")]
    MissingAuth,

    #[error("invalid JWT: {0}")]
    InvalidJwt(String),

    #[error("token expired")]
    TokenExpired,

    #[error("insufficient permissions")]
    InsufficientPermissions,
}

/// Permission set carried by a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub admin: bool,
}

impl Permissions {
    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            admin: false,
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            admin: false,
        }
    }

    pub fn admin() -> Self {
        Self {
            read: true,
            write: true,
            admin: true,
        }
    }
}

/// Authenticated request identity
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Acting user, from the token subject
    pub user_id: String,
    pub permissions: Permissions,
}

impl AuthContext {
    pub fn can_read(&self) -> bool {
        self.permissions.read || self.permissions.admin
    }

    pub fn can_write(&self) -> bool {
        self.permissions.write || self.permissions.admin
    }

    pub fn is_admin(&self) -> bool {
        self.permissions.admin
    }
}
