//! Global audit log persistence
//!
//! The audit service owns this store exclusively. Writes are idempotent
//! upserts keyed by `event_id` so at-least-once delivery collapses to
//! exactly one row; the verified flag only ever moves false to true.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    AggregateType, AuditAction, CorrelationId, GlobalAuditLogEntry,
};
use crate::infra::{NotaryError, Result};

/// One page of audit entries plus the total match count
#[derive(Debug, Clone)]
pub struct AuditPage {
    pub entries: Vec<GlobalAuditLogEntry>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Insert an entry if its `event_id` is new; otherwise keep the
    /// existing row untouched. Returns the id of the surviving row.
    async fn upsert(&self, entry: &GlobalAuditLogEntry) -> Result<Uuid>;

    async fn get(&self, id: Uuid) -> Result<Option<GlobalAuditLogEntry>>;

    async fn get_by_event_id(&self, event_id: Uuid) -> Result<Option<GlobalAuditLogEntry>>;

    /// All entries sharing a correlation id, oldest action first
    async fn get_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<GlobalAuditLogEntry>>;

    /// A user's entries ordered by action timestamp descending. `page` is
    /// 1-based.
    async fn list_by_user(&self, user_id: &str, page: i64, limit: i64) -> Result<AuditPage>;

    /// Entries for an aggregate type and action, newest first
    async fn list_by_aggregate(
        &self,
        aggregate_type: &AggregateType,
        action: &AuditAction,
    ) -> Result<Vec<GlobalAuditLogEntry>>;

    /// Flip the verified flag true. One-way: calling this never unsets a
    /// previous verification, and `verified_at` keeps its first value.
    async fn mark_verified(&self, id: Uuid) -> Result<GlobalAuditLogEntry>;
}

pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "id, event_id, correlation_id, aggregate_type, action, payload, \
     user_id, digital_signature, action_timestamp, created_at, is_verified, verified_at";

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn upsert(&self, entry: &GlobalAuditLogEntry) -> Result<Uuid> {
        // DO NOTHING on conflict: a redelivered event must never overwrite
        // an entry that may already be verified
        sqlx::query(
            r#"
            INSERT INTO global_audit_log (
                id, event_id, correlation_id, aggregate_type, action, payload,
                user_id, digital_signature, action_timestamp, created_at,
                is_verified, verified_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(entry.id)
        .bind(entry.event_id)
        .bind(entry.correlation_id.0)
        .bind(entry.aggregate_type.as_str())
        .bind(entry.action.as_str())
        .bind(&entry.payload)
        .bind(&entry.user_id)
        .bind(&entry.digital_signature)
        .bind(entry.action_timestamp)
        .bind(entry.created_at)
        .bind(entry.is_verified)
        .bind(entry.verified_at)
        .execute(&self.pool)
        .await?;

        let (id,): (Uuid,) =
            sqlx::query_as("SELECT id FROM global_audit_log WHERE event_id = $1")
                .bind(entry.event_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<GlobalAuditLogEntry>> {
        let row = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM global_audit_log WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(GlobalAuditLogEntry::from))
    }

    async fn get_by_event_id(&self, event_id: Uuid) -> Result<Option<GlobalAuditLogEntry>> {
        let row = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM global_audit_log WHERE event_id = $1"
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(GlobalAuditLogEntry::from))
    }

    async fn get_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<GlobalAuditLogEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM global_audit_log \
             WHERE correlation_id = $1 ORDER BY action_timestamp ASC"
        ))
        .bind(correlation_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(GlobalAuditLogEntry::from).collect())
    }

    async fn list_by_user(&self, user_id: &str, page: i64, limit: i64) -> Result<AuditPage> {
        let page = page.max(1);
        let offset = (page - 1) * limit;

        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM global_audit_log WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM global_audit_log \
             WHERE user_id = $1 ORDER BY action_timestamp DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(AuditPage {
            entries: rows.into_iter().map(GlobalAuditLogEntry::from).collect(),
            total,
            page,
            limit,
        })
    }

    async fn list_by_aggregate(
        &self,
        aggregate_type: &AggregateType,
        action: &AuditAction,
    ) -> Result<Vec<GlobalAuditLogEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM global_audit_log \
             WHERE aggregate_type = $1 AND action = $2 \
             ORDER BY action_timestamp DESC"
        ))
        .bind(aggregate_type.as_str())
        .bind(action.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(GlobalAuditLogEntry::from).collect())
    }

    async fn mark_verified(&self, id: Uuid) -> Result<GlobalAuditLogEntry> {
        let row = sqlx::query_as::<_, AuditRow>(&format!(
            "UPDATE global_audit_log SET \
                 is_verified = TRUE, \
                 verified_at = COALESCE(verified_at, NOW()) \
             WHERE id = $1 \
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(GlobalAuditLogEntry::from)
            .ok_or(NotaryError::AuditEntryNotFound(id))
    }
}

/// In-memory audit store for tests and local development
#[derive(Default)]
pub struct InMemoryAuditStore {
    entries: RwLock<Vec<GlobalAuditLogEntry>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn upsert(&self, entry: &GlobalAuditLogEntry) -> Result<Uuid> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.iter().find(|e| e.event_id == entry.event_id) {
            return Ok(existing.id);
        }
        entries.push(entry.clone());
        Ok(entry.id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<GlobalAuditLogEntry>> {
        Ok(self.entries.read().await.iter().find(|e| e.id == id).cloned())
    }

    async fn get_by_event_id(&self, event_id: Uuid) -> Result<Option<GlobalAuditLogEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .find(|e| e.event_id == event_id)
            .cloned())
    }

    async fn get_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<GlobalAuditLogEntry>> {
        let entries = self.entries.read().await;
        let mut matching: Vec<GlobalAuditLogEntry> = entries
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.action_timestamp.cmp(&b.action_timestamp));
        Ok(matching)
    }

    async fn list_by_user(&self, user_id: &str, page: i64, limit: i64) -> Result<AuditPage> {
        let page = page.max(1);
        let entries = self.entries.read().await;
        let mut matching: Vec<GlobalAuditLogEntry> = entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.action_timestamp.cmp(&a.action_timestamp));

        let total = matching.len() as i64;
        let paged: Vec<GlobalAuditLogEntry> = matching
            .into_iter()
            .skip(((page - 1) * limit) as usize)
            .take(limit as usize)
            .collect();

        Ok(AuditPage {
            entries: paged,
            total,
            page,
            limit,
        })
    }

    async fn list_by_aggregate(
        &self,
        aggregate_type: &AggregateType,
        action: &AuditAction,
    ) -> Result<Vec<GlobalAuditLogEntry>> {
        let entries = self.entries.read().await;
        let mut matching: Vec<GlobalAuditLogEntry> = entries
            .iter()
            .filter(|e| &e.aggregate_type == aggregate_type && &e.action == action)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.action_timestamp.cmp(&a.action_timestamp));
        Ok(matching)
    }

    async fn mark_verified(&self, id: Uuid) -> Result<GlobalAuditLogEntry> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(NotaryError::AuditEntryNotFound(id))?;
        entry.is_verified = true;
        if entry.verified_at.is_none() {
            entry.verified_at = Some(Utc::now());
        }
        Ok(entry.clone())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    event_id: Uuid,
    correlation_id: Uuid,
    aggregate_type: String,
    action: String,
    payload: String,
    user_id: String,
    digital_signature: String,
    action_timestamp: DateTime<Utc>,
    created_at: DateTime<Utc>,
    is_verified: bool,
    verified_at: Option<DateTime<Utc>>,
}

impl From<AuditRow> for GlobalAuditLogEntry {
    fn from(row: AuditRow) -> Self {
        Self {
            id: row.id,
            event_id: row.event_id,
            correlation_id: CorrelationId::from_uuid(row.correlation_id),
            aggregate_type: AggregateType::new(row.aggregate_type),
            action: AuditAction::new(row.action),
            payload: row.payload,
            user_id: row.user_id,
            digital_signature: row.digital_signature,
            action_timestamp: row.action_timestamp,
            created_at: row.created_at,
            is_verified: row.is_verified,
            verified_at: row.verified_at,
        }
    }
}
