//! Domain types for the Notary Service
//!
//! The audited-action event is the contract between the operational
//! services (signing interceptor) and the audit consumer. The audit log
//! entry is the durable system of record for compliance queries.

mod event;
mod record;
mod types;

pub use event::AuditedActionEvent;
pub use record::{GlobalAuditLogEntry, SignatureRecord, UserSecretProfile};
pub use types::{hash256_hex, AggregateType, AuditAction, CorrelationId, Hash256, OperationType};
