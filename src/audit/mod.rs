//! Audit consumer, global audit log, and verification surface

pub mod consumer;
pub mod store;
pub mod verifier;

pub use consumer::{AuditConsumer, AuditConsumerConfig};
pub use store::{AuditPage, AuditStore, InMemoryAuditStore, PgAuditStore};
pub use verifier::{AuditVerifier, VerificationOutcome};
