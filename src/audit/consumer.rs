//! Audit consumer: drains the event queue into the global audit log
//!
//! At-least-once delivery with idempotent persistence. A failed event is
//! nacked with exponential backoff; once it exhausts `max_attempts` it goes
//! to the dead letter table rather than being dropped or poisoning the
//! queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::authority::SigningAuthority;
use crate::bus::{AuditEventQueue, QueuedBody, QueuedEvent};
use crate::crypto::canonicalize_json;
use crate::domain::{AuditedActionEvent, GlobalAuditLogEntry, OperationType};
use crate::infra::{DeadLetterReason, DeadLetterSink, RetryConfig};
use crate::audit::store::AuditStore;

#[derive(Debug, Clone)]
pub struct AuditConsumerConfig {
    /// Sleep between polls when the queue is empty
    pub poll_interval: Duration,
    /// Events leased per poll
    pub batch_size: i64,
    /// Lease duration; must exceed worst-case processing time
    pub visibility: Duration,
    /// Delivery attempts before dead-lettering
    pub max_attempts: i32,
    /// Backoff schedule for nack redelivery
    pub backoff: RetryConfig,
}

impl Default for AuditConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 32,
            visibility: Duration::from_secs(30),
            max_attempts: 5,
            backoff: RetryConfig::database(),
        }
    }
}

pub struct AuditConsumer {
    queue: Arc<dyn AuditEventQueue>,
    store: Arc<dyn AuditStore>,
    authority: Arc<SigningAuthority>,
    dead_letters: Arc<dyn DeadLetterSink>,
    config: AuditConsumerConfig,
    shutdown: AtomicBool,
}

impl AuditConsumer {
    pub fn new(
        queue: Arc<dyn AuditEventQueue>,
        store: Arc<dyn AuditStore>,
        authority: Arc<SigningAuthority>,
        dead_letters: Arc<dyn DeadLetterSink>,
        config: AuditConsumerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            authority,
            dead_letters,
            config,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Signal the run loop to exit after the current batch
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Poll loop. Runs until `shutdown` is called.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self) {
        tracing::info!(
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            "Audit consumer started"
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            let drained = match self.drain_batch().await {
                Ok(count) => count,
                Err(e) => {
                    tracing::error!(error = %e, "Audit consumer poll failed");
                    0
                }
            };

            if drained == 0 {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        tracing::info!("Audit consumer stopped");
    }

    /// Poll and process one batch. Returns the number of events polled.
    pub async fn drain_batch(&self) -> crate::infra::Result<usize> {
        let deliveries = self
            .queue
            .poll(self.config.batch_size, self.config.visibility)
            .await?;
        let polled = deliveries.len();

        for delivery in deliveries {
            self.process(delivery).await;
        }
        Ok(polled)
    }

    /// Process one delivery end to end: sign if needed, persist, ack.
    #[tracing::instrument(skip_all, fields(event_id = %delivery.event_id, attempts = delivery.attempts))]
    async fn process(&self, delivery: QueuedEvent) {
        let event = match &delivery.body {
            QueuedBody::Decoded(event) => event,
            QueuedBody::Undecodable { error, .. } => {
                // Deserialization is deterministic; redelivery cannot fix
                // this row, so it is parked without burning attempts
                let message = format!("stored event does not deserialize: {error}");
                self.park(&delivery, DeadLetterReason::MalformedEvent, &message)
                    .await;
                return;
            }
        };

        match self.persist(event).await {
            Ok(entry_id) => {
                tracing::debug!(entry_id = %entry_id, "Audit entry persisted");
                if let Err(e) = self.queue.ack(delivery.event_id).await {
                    // The entry is durable; a lost ack only means one more
                    // redelivery, which the upsert absorbs
                    tracing::warn!(error = %e, "Ack failed after persist");
                }
            }
            Err((reason, message)) => {
                self.handle_failure(&delivery, reason, &message).await;
            }
        }
    }

    async fn persist(
        &self,
        event: &AuditedActionEvent,
    ) -> std::result::Result<Uuid, (DeadLetterReason, String)> {
        let canonical = canonicalize_json(&event.payload)
            .map_err(|e| (DeadLetterReason::MalformedEvent, e.to_string()))?;

        // The signing moment is decoupled from the audit moment: events
        // that arrive unsigned are signed here via the server-to-server
        // path
        let signature = match &event.signature {
            Some(signature) => signature.clone(),
            None => {
                let operation =
                    OperationType::new(format!("{}.{}", event.aggregate_type, event.action));
                self.authority
                    .sign_system(&event.user_id, &event.payload, &operation)
                    .await
                    .map_err(|e| (DeadLetterReason::SigningFailed, e.to_string()))?
                    .signature
            }
        };

        let entry = GlobalAuditLogEntry {
            id: Uuid::new_v4(),
            event_id: event.event_id,
            correlation_id: event.correlation_id,
            aggregate_type: event.aggregate_type.clone(),
            action: event.action.clone(),
            payload: canonical,
            user_id: event.user_id.clone(),
            digital_signature: signature,
            action_timestamp: event.timestamp,
            created_at: Utc::now(),
            is_verified: false,
            verified_at: None,
        };

        self.store
            .upsert(&entry)
            .await
            .map_err(|e| (DeadLetterReason::PersistenceFailed, e.to_string()))
    }

    async fn handle_failure(
        &self,
        delivery: &QueuedEvent,
        reason: DeadLetterReason,
        message: &str,
    ) {
        if delivery.attempts >= self.config.max_attempts {
            self.park(delivery, reason, message).await;
            return;
        }

        let delay = self
            .config
            .backoff
            .delay_for_attempt(delivery.attempts.max(0) as u32);
        tracing::warn!(
            reason = %reason,
            error = %message,
            redeliver_in_ms = delay.as_millis() as u64,
            "Audit event processing failed, scheduling redelivery"
        );
        if let Err(e) = self.queue.nack(delivery.event_id, delay).await {
            tracing::error!(error = %e, "Nack failed");
        }
    }

    /// Move a delivery to the dead letter queue and ack it out of the
    /// outbox. If parking fails the delivery is nacked so nothing is lost.
    async fn park(&self, delivery: &QueuedEvent, reason: DeadLetterReason, message: &str) {
        let parked = match &delivery.body {
            QueuedBody::Decoded(event) => {
                self.dead_letters
                    .park(event, reason, message, delivery.attempts)
                    .await
            }
            QueuedBody::Undecodable { raw, .. } => {
                self.dead_letters
                    .park_raw(delivery.event_id, raw, reason, message, delivery.attempts)
                    .await
            }
        };

        if let Err(e) = parked {
            tracing::error!(error = %e, "Dead-lettering failed, event stays queued");
            if let Err(e) = self
                .queue
                .nack(delivery.event_id, self.config.backoff.delay_for_attempt(0))
                .await
            {
                tracing::error!(error = %e, "Nack failed after dead-lettering failure");
            }
            return;
        }
        if let Err(e) = self.queue.ack(delivery.event_id).await {
            tracing::warn!(error = %e, "Ack failed after dead-lettering");
        }
    }
}
