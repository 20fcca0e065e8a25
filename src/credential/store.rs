//! Secret profile storage
//!
//! The hash itself never leaves this module boundary in plaintext-comparable
//! form; callers get a boolean and nothing else.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use tokio::sync::RwLock;

use crate::credential::hash::{dummy_verify, hash_secret, verify_secret_hash};
use crate::domain::UserSecretProfile;
use crate::infra::{NotaryError, Result};

/// Per-user transaction secret store
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Set or rotate a user's secret. Empty user id or secret is rejected.
    async fn set_secret(&self, user_id: &str, plain: &str) -> Result<()>;

    /// Check a plaintext secret against the stored hash.
    ///
    /// Unknown users and disabled profiles return `false`, never an error,
    /// and burn a dummy verification so the miss is not observable by timing.
    async fn verify_secret(&self, user_id: &str, plain: &str) -> Result<bool>;

    /// Soft-disable a profile. Verification fails until re-enabled by a
    /// fresh `set_secret`; the profile row is never deleted.
    async fn disable(&self, user_id: &str) -> Result<()>;
}

fn validate_inputs(user_id: &str, plain: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(NotaryError::InvalidArgument("user_id is empty".into()));
    }
    if plain.is_empty() {
        return Err(NotaryError::InvalidArgument("secret is empty".into()));
    }
    Ok(())
}

/// PostgreSQL-backed secret store
pub struct PgSecretStore {
    pool: PgPool,
}

impl PgSecretStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, user_id: &str) -> Result<Option<UserSecretProfile>> {
        let row = sqlx::query_as::<_, SecretProfileRow>(
            r#"
            SELECT user_id, secret_hash, created_at, updated_at, disabled
            FROM user_secret_profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserSecretProfile::from))
    }
}

#[async_trait]
impl SecretStore for PgSecretStore {
    async fn set_secret(&self, user_id: &str, plain: &str) -> Result<()> {
        validate_inputs(user_id, plain)?;
        let secret_hash = hash_secret(plain)?;

        sqlx::query(
            r#"
            INSERT INTO user_secret_profiles (user_id, secret_hash, disabled)
            VALUES ($1, $2, FALSE)
            ON CONFLICT (user_id) DO UPDATE SET
                secret_hash = EXCLUDED.secret_hash,
                disabled = FALSE,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(&secret_hash)
        .execute(&self.pool)
        .await?;

        tracing::info!(user_id = %user_id, "Secret profile set");
        Ok(())
    }

    async fn verify_secret(&self, user_id: &str, plain: &str) -> Result<bool> {
        match self.fetch(user_id).await? {
            Some(profile) if !profile.disabled => {
                Ok(verify_secret_hash(plain, &profile.secret_hash))
            }
            _ => {
                dummy_verify(plain);
                Ok(false)
            }
        }
    }

    async fn disable(&self, user_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE user_secret_profiles SET disabled = TRUE, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(NotaryError::SecretProfileNotFound(user_id.to_string()));
        }

        tracing::warn!(user_id = %user_id, "Secret profile disabled");
        Ok(())
    }
}

/// In-memory secret store for tests and local development
#[derive(Default)]
pub struct InMemorySecretStore {
    profiles: RwLock<HashMap<String, UserSecretProfile>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn set_secret(&self, user_id: &str, plain: &str) -> Result<()> {
        validate_inputs(user_id, plain)?;
        let secret_hash = hash_secret(plain)?;
        let now = Utc::now();

        let mut profiles = self.profiles.write().await;
        profiles
            .entry(user_id.to_string())
            .and_modify(|p| {
                p.secret_hash = secret_hash.clone();
                p.disabled = false;
                p.updated_at = now;
            })
            .or_insert_with(|| UserSecretProfile {
                user_id: user_id.to_string(),
                secret_hash,
                created_at: now,
                updated_at: now,
                disabled: false,
            });
        Ok(())
    }

    async fn verify_secret(&self, user_id: &str, plain: &str) -> Result<bool> {
        let profiles = self.profiles.read().await;
        match profiles.get(user_id) {
            Some(profile) if !profile.disabled => {
                Ok(verify_secret_hash(plain, &profile.secret_hash))
            }
            _ => {
                dummy_verify(plain);
                Ok(false)
            }
        }
    }

    async fn disable(&self, user_id: &str) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .get_mut(user_id)
            .ok_or_else(|| NotaryError::SecretProfileNotFound(user_id.to_string()))?;
        profile.disabled = true;
        profile.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SecretProfileRow {
    user_id: String,
    secret_hash: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    disabled: bool,
}

impl From<SecretProfileRow> for UserSecretProfile {
    fn from(row: SecretProfileRow) -> Self {
        Self {
            user_id: row.user_id,
            secret_hash: row.secret_hash,
            created_at: row.created_at,
            updated_at: row.updated_at,
            disabled: row.disabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_verify() {
        let store = InMemorySecretStore::new();
        store.set_secret("u1", "1234").await.unwrap();

        assert!(store.verify_secret("u1", "1234").await.unwrap());
        assert!(!store.verify_secret("u1", "9999").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_user_is_false_not_error() {
        let store = InMemorySecretStore::new();
        assert!(!store.verify_secret("ghost", "1234").await.unwrap());
    }

    #[tokio::test]
    async fn test_rotation_invalidates_old_secret() {
        let store = InMemorySecretStore::new();
        store.set_secret("u1", "1234").await.unwrap();
        store.set_secret("u1", "5678").await.unwrap();

        assert!(!store.verify_secret("u1", "1234").await.unwrap());
        assert!(store.verify_secret("u1", "5678").await.unwrap());
    }

    #[tokio::test]
    async fn test_disable_blocks_verification() {
        let store = InMemorySecretStore::new();
        store.set_secret("u1", "1234").await.unwrap();
        store.disable("u1").await.unwrap();

        assert!(!store.verify_secret("u1", "1234").await.unwrap());

        // re-setting the secret re-enables the profile
        store.set_secret("u1", "1234").await.unwrap();
        assert!(store.verify_secret("u1", "1234").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_inputs_rejected() {
        let store = InMemorySecretStore::new();
        assert!(store.set_secret("", "1234").await.is_err());
        assert!(store.set_secret("u1", "").await.is_err());
        assert!(store.set_secret("   ", "1234").await.is_err());
    }

    #[tokio::test]
    async fn test_disable_unknown_user_errors() {
        let store = InMemorySecretStore::new();
        assert!(store.disable("ghost").await.is_err());
    }
}
