//! Audit event queue contract
//!
//! At-least-once delivery: a polled event stays leased for a visibility
//! window; if the consumer neither acks nor nacks before the lease expires
//! the event becomes pollable again. Consumers must tolerate duplicates.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::AuditedActionEvent;
use crate::infra::{NotaryError, Result};

/// A leased delivery handed to the consumer
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub event_id: Uuid,
    pub body: QueuedBody,
    /// Delivery attempts including this one
    pub attempts: i32,
}

/// Payload of a leased delivery.
///
/// A durable queue stores raw JSON; a row written by an older build (or
/// corrupted in place) may no longer deserialize. Such rows are still
/// delivered so the consumer can dead-letter them instead of leaving them
/// to be re-leased forever.
#[derive(Debug, Clone)]
pub enum QueuedBody {
    Decoded(AuditedActionEvent),
    Undecodable {
        raw: serde_json::Value,
        error: String,
    },
}

impl QueuedEvent {
    /// The decoded event, if the stored payload deserialized
    pub fn event(&self) -> Option<&AuditedActionEvent> {
        match &self.body {
            QueuedBody::Decoded(event) => Some(event),
            QueuedBody::Undecodable { .. } => None,
        }
    }
}

/// Durable work queue between the interceptor and the audit consumer
#[async_trait]
pub trait AuditEventQueue: Send + Sync {
    /// Enqueue an event. Idempotent on `event_id`.
    async fn enqueue(&self, event: &AuditedActionEvent) -> Result<()>;

    /// Lease up to `max` deliverable events for `visibility`.
    async fn poll(&self, max: i64, visibility: Duration) -> Result<Vec<QueuedEvent>>;

    /// Acknowledge successful processing; the event leaves the queue.
    async fn ack(&self, event_id: Uuid) -> Result<()>;

    /// Negative-acknowledge: release the lease and delay redelivery.
    /// Returns the attempt count so far.
    async fn nack(&self, event_id: Uuid, redeliver_after: Duration) -> Result<i32>;

    /// Events currently in the queue, leased or not
    async fn depth(&self) -> Result<i64>;
}

struct MemoryEntry {
    event: AuditedActionEvent,
    attempts: i32,
    available_at: DateTime<Utc>,
    leased_until: Option<DateTime<Utc>>,
}

/// In-memory queue for tests and local development.
///
/// Same lease semantics as the Postgres outbox, minus durability.
#[derive(Default)]
pub struct InMemoryAuditQueue {
    entries: Mutex<VecDeque<MemoryEntry>>,
}

impl InMemoryAuditQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditEventQueue for InMemoryAuditQueue {
    async fn enqueue(&self, event: &AuditedActionEvent) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.iter().any(|e| e.event.event_id == event.event_id) {
            return Ok(());
        }
        entries.push_back(MemoryEntry {
            event: event.clone(),
            attempts: 0,
            available_at: Utc::now(),
            leased_until: None,
        });
        Ok(())
    }

    async fn poll(&self, max: i64, visibility: Duration) -> Result<Vec<QueuedEvent>> {
        let now = Utc::now();
        let lease_until = now
            + chrono::Duration::from_std(visibility)
                .map_err(|e| NotaryError::Internal(e.to_string()))?;

        let mut entries = self.entries.lock().await;
        let mut leased = Vec::new();
        for entry in entries.iter_mut() {
            if leased.len() as i64 >= max {
                break;
            }
            let lease_expired = entry.leased_until.map_or(true, |until| until <= now);
            if lease_expired && entry.available_at <= now {
                entry.attempts += 1;
                entry.leased_until = Some(lease_until);
                leased.push(QueuedEvent {
                    event_id: entry.event.event_id,
                    body: QueuedBody::Decoded(entry.event.clone()),
                    attempts: entry.attempts,
                });
            }
        }
        Ok(leased)
    }

    async fn ack(&self, event_id: Uuid) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.event.event_id != event_id);
        if entries.len() == before {
            return Err(NotaryError::QueuedEventNotFound(event_id));
        }
        Ok(())
    }

    async fn nack(&self, event_id: Uuid, redeliver_after: Duration) -> Result<i32> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.event.event_id == event_id)
            .ok_or(NotaryError::QueuedEventNotFound(event_id))?;
        entry.leased_until = None;
        entry.available_at = Utc::now()
            + chrono::Duration::from_std(redeliver_after)
                .map_err(|e| NotaryError::Internal(e.to_string()))?;
        Ok(entry.attempts)
    }

    async fn depth(&self) -> Result<i64> {
        Ok(self.entries.lock().await.len() as i64)
    }
}
