//! Signing authority: secret check, signature production, verification

pub mod backend;
pub mod record_store;
pub mod service;

pub use backend::{BackendError, LocalKeyBackend, SigningBackend};
pub use record_store::{
    InMemorySignatureRecordStore, PgSignatureRecordStore, SignatureRecordStore,
};
pub use service::{SignedPayload, SigningAuthority, SigningError, MAX_PAYLOAD_BYTES};
