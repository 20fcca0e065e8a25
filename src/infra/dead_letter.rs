//! Dead letter queue for audit events that exhausted redelivery
//!
//! When the audit consumer cannot persist an event after the configured
//! number of attempts, the event is parked here for reconciliation instead
//! of being dropped. An audit-trail gap is a compliance incident; a full
//! dead letter queue is an operational one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::AuditedActionEvent;
use crate::infra::Result;

/// Reason an audit event was dead-lettered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// The signing authority rejected or could not sign the payload
    SigningFailed,
    /// Persisting the audit entry failed
    PersistenceFailed,
    /// The event could not be decoded from the queue
    MalformedEvent,
    /// Unknown/other error
    Unknown,
}

impl std::fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeadLetterReason::SigningFailed => write!(f, "signing_failed"),
            DeadLetterReason::PersistenceFailed => write!(f, "persistence_failed"),
            DeadLetterReason::MalformedEvent => write!(f, "malformed_event"),
            DeadLetterReason::Unknown => write!(f, "unknown"),
        }
    }
}

impl DeadLetterReason {
    fn parse(s: &str) -> Self {
        match s {
            "signing_failed" => DeadLetterReason::SigningFailed,
            "persistence_failed" => DeadLetterReason::PersistenceFailed,
            "malformed_event" => DeadLetterReason::MalformedEvent,
            _ => DeadLetterReason::Unknown,
        }
    }
}

/// A dead-lettered audit event record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    /// Original audit event id
    pub event_id: Uuid,
    pub user_id: String,
    pub aggregate_type: String,
    pub action: String,
    pub reason: DeadLetterReason,
    pub error_message: String,
    /// Delivery attempts made before dead-lettering
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    /// Full original event for replay
    pub event: serde_json::Value,
}

/// Sink for events that exhausted redelivery
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn park(
        &self,
        event: &AuditedActionEvent,
        reason: DeadLetterReason,
        error_message: &str,
        attempts: i32,
    ) -> Result<Uuid>;

    /// Park a queued row whose stored event no longer deserializes.
    ///
    /// Identity fields are recovered from the raw JSON on a best-effort
    /// basis; anything missing is recorded as `"unknown"`.
    async fn park_raw(
        &self,
        event_id: Uuid,
        raw_event: &serde_json::Value,
        reason: DeadLetterReason,
        error_message: &str,
        attempts: i32,
    ) -> Result<Uuid>;
}

fn raw_field(raw: &serde_json::Value, key: &str) -> String {
    raw.get(key)
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

/// Statistics about the dead letter queue
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterStats {
    pub total_count: i64,
    pub by_reason: std::collections::HashMap<String, i64>,
    pub oldest_entry: Option<DateTime<Utc>>,
}

/// PostgreSQL-backed dead letter queue
pub struct PgDeadLetterQueue {
    pool: PgPool,
}

impl PgDeadLetterQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a dead letter entry by original event id
    pub async fn get_by_event_id(&self, event_id: Uuid) -> Result<Option<DeadLetterEntry>> {
        let row = sqlx::query_as::<_, DeadLetterRow>(
            r#"
            SELECT id, event_id, user_id, aggregate_type, action,
                   reason, error_message, attempts, created_at, event
            FROM audit_dead_letters
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(DeadLetterEntry::from))
    }

    /// List dead letter entries newest-first
    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<DeadLetterEntry>> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(
            r#"
            SELECT id, event_id, user_id, aggregate_type, action,
                   reason, error_message, attempts, created_at, event
            FROM audit_dead_letters
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DeadLetterEntry::from).collect())
    }

    /// Remove an entry after successful replay
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM audit_dead_letters WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete entries older than a number of days
    pub async fn purge_older_than(&self, days: i32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM audit_dead_letters
            WHERE created_at < NOW() - make_interval(days => $1)
            "#,
        )
        .bind(days)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::info!(deleted = deleted, "Purged old dead letter entries");
        }

        Ok(deleted)
    }

    /// Queue statistics for the admin surface
    pub async fn stats(&self) -> Result<DeadLetterStats> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_dead_letters")
            .fetch_one(&self.pool)
            .await?;

        let by_reason: Vec<(String, i64)> = sqlx::query_as(
            "SELECT reason, COUNT(*) FROM audit_dead_letters GROUP BY reason",
        )
        .fetch_all(&self.pool)
        .await?;

        let oldest: (Option<DateTime<Utc>>,) =
            sqlx::query_as("SELECT MIN(created_at) FROM audit_dead_letters")
                .fetch_one(&self.pool)
                .await?;

        Ok(DeadLetterStats {
            total_count: total.0,
            by_reason: by_reason.into_iter().collect(),
            oldest_entry: oldest.0,
        })
    }
}

impl PgDeadLetterQueue {
    #[allow(clippy::too_many_arguments)]
    async fn insert_entry(
        &self,
        event_id: Uuid,
        user_id: &str,
        aggregate_type: &str,
        action: &str,
        reason: DeadLetterReason,
        error_message: &str,
        attempts: i32,
        event_json: &serde_json::Value,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO audit_dead_letters (
                id, event_id, user_id, aggregate_type, action,
                reason, error_message, attempts, event
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (event_id) DO UPDATE SET
                reason = EXCLUDED.reason,
                error_message = EXCLUDED.error_message,
                attempts = EXCLUDED.attempts
            "#,
        )
        .bind(id)
        .bind(event_id)
        .bind(user_id)
        .bind(aggregate_type)
        .bind(action)
        .bind(reason.to_string())
        .bind(error_message)
        .bind(attempts)
        .bind(event_json)
        .execute(&self.pool)
        .await?;

        tracing::warn!(
            event_id = %event_id,
            reason = %reason,
            error = %error_message,
            attempts = attempts,
            "Audit event dead-lettered"
        );

        Ok(id)
    }
}

#[async_trait]
impl DeadLetterSink for PgDeadLetterQueue {
    async fn park(
        &self,
        event: &AuditedActionEvent,
        reason: DeadLetterReason,
        error_message: &str,
        attempts: i32,
    ) -> Result<Uuid> {
        let event_json = serde_json::to_value(event)?;
        self.insert_entry(
            event.event_id,
            &event.user_id,
            event.aggregate_type.as_str(),
            event.action.as_str(),
            reason,
            error_message,
            attempts,
            &event_json,
        )
        .await
    }

    async fn park_raw(
        &self,
        event_id: Uuid,
        raw_event: &serde_json::Value,
        reason: DeadLetterReason,
        error_message: &str,
        attempts: i32,
    ) -> Result<Uuid> {
        self.insert_entry(
            event_id,
            &raw_field(raw_event, "user_id"),
            &raw_field(raw_event, "aggregate_type"),
            &raw_field(raw_event, "action"),
            reason,
            error_message,
            attempts,
            raw_event,
        )
        .await
    }
}

/// In-memory dead letter sink for tests and local development
#[derive(Default)]
pub struct InMemoryDeadLetterSink {
    entries: RwLock<Vec<DeadLetterEntry>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn park(
        &self,
        event: &AuditedActionEvent,
        reason: DeadLetterReason,
        error_message: &str,
        attempts: i32,
    ) -> Result<Uuid> {
        let entry = DeadLetterEntry {
            id: Uuid::new_v4(),
            event_id: event.event_id,
            user_id: event.user_id.clone(),
            aggregate_type: event.aggregate_type.as_str().to_string(),
            action: event.action.as_str().to_string(),
            reason,
            error_message: error_message.to_string(),
            attempts,
            created_at: Utc::now(),
            event: serde_json::to_value(event)?,
        };
        let id = entry.id;
        self.entries.write().await.push(entry);
        Ok(id)
    }

    async fn park_raw(
        &self,
        event_id: Uuid,
        raw_event: &serde_json::Value,
        reason: DeadLetterReason,
        error_message: &str,
        attempts: i32,
    ) -> Result<Uuid> {
        let entry = DeadLetterEntry {
            id: Uuid::new_v4(),
            event_id,
            user_id: raw_field(raw_event, "user_id"),
            aggregate_type: raw_field(raw_event, "aggregate_type"),
            action: raw_field(raw_event, "action"),
            reason,
            error_message: error_message.to_string(),
            attempts,
            created_at: Utc::now(),
            event: raw_event.clone(),
        };
        let id = entry.id;
        self.entries.write().await.push(entry);
        Ok(id)
    }
}

/// Database row for dead letter entries
#[derive(Debug, sqlx::FromRow)]
struct DeadLetterRow {
    id: Uuid,
    event_id: Uuid,
    user_id: String,
    aggregate_type: String,
    action: String,
    reason: String,
    error_message: String,
    attempts: i32,
    created_at: DateTime<Utc>,
    event: serde_json::Value,
}

impl From<DeadLetterRow> for DeadLetterEntry {
    fn from(row: DeadLetterRow) -> Self {
        Self {
            id: row.id,
            event_id: row.event_id,
            user_id: row.user_id,
            aggregate_type: row.aggregate_type,
            action: row.action,
            reason: DeadLetterReason::parse(&row.reason),
            error_message: row.error_message,
            attempts: row.attempts,
            created_at: row.created_at,
            event: row.event,
        }
    }
}
