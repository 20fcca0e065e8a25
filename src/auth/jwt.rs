//! JWT issuance and validation

use super::{AuthContext, AuthError, Permissions};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims for the notary service
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,

    /// Issuer
    pub iss: String,

    /// Audience
    pub aud: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Not before (Unix timestamp)
    pub nbf: i64,

    /// JWT ID
    pub jti: String,

    /// Permissions (comma-separated: read,write,admin)
    #[serde(default)]
    pub perms: String,
}

/// JWT validator and issuer
pub struct JwtValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
}

impl JwtValidator {
    /// Create a new JWT validator with a secret key
    pub fn new(secret: &[u8], issuer: &str, audience: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
        }
    }

    /// Issue a new JWT token for a user
    pub fn issue(
        &self,
        user_id: &str,
        permissions: &Permissions,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let exp = now + ttl;

        let mut perms = Vec::new();
        if permissions.read {
            perms.push("read");
        }
        if permissions.write {
            perms.push("write");
        }
        if permissions.admin {
            perms.push("admin");
        }

        let claims = Claims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            perms: perms.join(","),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidJwt(e.to_string()))
    }

    /// Validate a JWT token and return auth context
    pub fn validate(&self, token: &str) -> Result<AuthContext, AuthError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidJwt(e.to_string()),
            }
        })?;

        let claims = token_data.claims;
        if claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidJwt("empty subject".to_string()));
        }

        let perms_list: Vec<&str> = claims.perms.split(',').collect();
        let permissions = Permissions {
            read: perms_list.contains(&"read"),
            write: perms_list.contains(&"write"),
            admin: perms_list.contains(&"admin"),
        };

        Ok(AuthContext {
            user_id: claims.sub,
            permissions,
        })
    }
}
