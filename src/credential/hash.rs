//! Argon2id hashing for transaction secrets
//!
//! Secrets are stored as PHC strings so parameters can be rotated without a
//! schema change. Verification reads the parameters embedded in the hash.

use std::sync::OnceLock;

use crate::infra::{NotaryError, Result};

/// Hash a plaintext secret into a PHC string (Argon2id, fresh random salt)
pub fn hash_secret(plain: &str) -> Result<String> {
    use argon2::password_hash::rand_core::OsRng;
    use argon2::password_hash::SaltString;
    use argon2::{Argon2, PasswordHasher};

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| NotaryError::CredentialHash(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a plaintext secret against a stored PHC string
pub fn verify_secret_hash(plain: &str, hash: &str) -> bool {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};

    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

/// Burn a full verification against a fixed hash.
///
/// Called on the unknown-user path so that "no such user" and "wrong secret"
/// take comparable time and cannot be told apart by timing.
pub fn dummy_verify(plain: &str) {
    static DUMMY_HASH: OnceLock<String> = OnceLock::new();
    let hash = DUMMY_HASH
        .get_or_init(|| hash_secret("notary-dummy-secret").unwrap_or_default());
    let _ = verify_secret_hash(plain, hash);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_then_verify() {
        let hash = hash_secret("1234").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_secret_hash("1234", &hash));
        assert!(!verify_secret_hash("4321", &hash));
    }

    #[test]
    fn test_same_secret_different_salts() {
        let a = hash_secret("1234").unwrap();
        let b = hash_secret("1234").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_rejects_garbage_hash() {
        assert!(!verify_secret_hash("1234", "not-a-phc-string"));
        assert!(!verify_secret_hash("1234", ""));
    }

    #[test]
    fn test_dummy_verify_does_not_panic() {
        dummy_verify("anything");
        dummy_verify("");
    }
}
