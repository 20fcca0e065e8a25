//! Transaction-secret (PIN) storage and verification

pub mod hash;
pub mod store;

pub use hash::{hash_secret, verify_secret_hash};
pub use store::{InMemorySecretStore, PgSecretStore, SecretStore};
