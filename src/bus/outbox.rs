//! Postgres outbox implementation of the audit event queue
//!
//! Events are rows in `audit_outbox`. Polling leases rows with
//! `FOR UPDATE SKIP LOCKED` so concurrent consumers never double-lease,
//! and a lease that is never acked or nacked simply expires.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::bus::queue::{AuditEventQueue, QueuedBody, QueuedEvent};
use crate::domain::AuditedActionEvent;
use crate::infra::{NotaryError, Result};

pub struct PgAuditQueue {
    pool: PgPool,
}

impl PgAuditQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditEventQueue for PgAuditQueue {
    async fn enqueue(&self, event: &AuditedActionEvent) -> Result<()> {
        let event_json = serde_json::to_value(event)?;

        sqlx::query(
            r#"
            INSERT INTO audit_outbox (event_id, event)
            VALUES ($1, $2)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event.event_id)
        .bind(&event_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn poll(&self, max: i64, visibility: Duration) -> Result<Vec<QueuedEvent>> {
        let visibility_secs = visibility.as_secs_f64();

        let rows: Vec<(Uuid, serde_json::Value, i32)> = sqlx::query_as(
            r#"
            UPDATE audit_outbox SET
                attempts = attempts + 1,
                leased_until = NOW() + make_interval(secs => $2)
            WHERE event_id IN (
                SELECT event_id FROM audit_outbox
                WHERE (leased_until IS NULL OR leased_until <= NOW())
                  AND available_at <= NOW()
                ORDER BY created_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING event_id, event, attempts
            "#,
        )
        .bind(max)
        .bind(visibility_secs)
        .fetch_all(&self.pool)
        .await?;

        let mut polled = Vec::with_capacity(rows.len());
        for (event_id, event_json, attempts) in rows {
            // Undecodable rows are delivered too; the consumer dead-letters
            // them so they stop occupying the outbox
            let body = match serde_json::from_value::<AuditedActionEvent>(event_json.clone()) {
                Ok(event) => QueuedBody::Decoded(event),
                Err(e) => {
                    tracing::error!(
                        event_id = %event_id,
                        error = %e,
                        "Undecodable event in audit outbox"
                    );
                    QueuedBody::Undecodable {
                        raw: event_json,
                        error: e.to_string(),
                    }
                }
            };
            polled.push(QueuedEvent {
                event_id,
                body,
                attempts,
            });
        }
        Ok(polled)
    }

    async fn ack(&self, event_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM audit_outbox WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(NotaryError::QueuedEventNotFound(event_id));
        }
        Ok(())
    }

    async fn nack(&self, event_id: Uuid, redeliver_after: Duration) -> Result<i32> {
        let delay_secs = redeliver_after.as_secs_f64();

        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE audit_outbox SET
                leased_until = NULL,
                available_at = NOW() + make_interval(secs => $2)
            WHERE event_id = $1
            RETURNING attempts
            "#,
        )
        .bind(event_id)
        .bind(delay_secs)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((attempts,)) => Ok(attempts),
            None => Err(NotaryError::QueuedEventNotFound(event_id)),
        }
    }

    async fn depth(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_outbox")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}
