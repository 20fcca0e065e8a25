//! Durable messaging between the signing interceptor and the audit consumer

pub mod outbox;
pub mod queue;

pub use outbox::PgAuditQueue;
pub use queue::{AuditEventQueue, InMemoryAuditQueue, QueuedBody, QueuedEvent};
