//! Notary Service Library
//!
//! Transaction-signing authority with a tamper-evident audit pipeline:
//! sensitive commands are gated behind a per-user transaction secret,
//! signed by a central authority, and recorded in a verifiable global
//! audit log.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (audit events, signature records)
//! - [`crypto`] - Canonical JSON and Ed25519 signing primitives
//! - [`credential`] - Per-user transaction secret storage (Argon2id)
//! - [`authority`] - The signing authority and its key backends
//! - [`pipeline`] - Command interception and signature enforcement
//! - [`bus`] - Durable audit event queue (Postgres outbox)
//! - [`audit`] - Audit log persistence, consumption, and verification
//! - [`auth`] - Caller authentication (JWT)
//! - [`api`] - REST API routes
//! - [`infra`] - Shared infrastructure (errors, retry, circuit breaker)

pub mod api;
pub mod audit;
pub mod auth;
pub mod authority;
pub mod bus;
pub mod credential;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod migrations;
pub mod pipeline;
pub mod server;

// Re-export commonly used types
pub use domain::{
    AggregateType, AuditAction, AuditedActionEvent, CorrelationId, GlobalAuditLogEntry,
    OperationType, SignatureRecord, UserSecretProfile,
};

pub use authority::{SignedPayload, SigningAuthority, SigningError};
pub use infra::{NotaryError, Result};
