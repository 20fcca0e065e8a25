//! Signature record persistence
//!
//! Records are append-only proof material. Deletion is a soft flag for
//! retention policy; the row and its signature are never overwritten.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{OperationType, SignatureRecord};
use crate::infra::{NotaryError, Result};

#[async_trait]
pub trait SignatureRecordStore: Send + Sync {
    /// Append a signature record
    async fn append(&self, record: &SignatureRecord) -> Result<()>;

    /// Fetch a record by id, soft-deleted records included
    async fn get(&self, id: Uuid) -> Result<Option<SignatureRecord>>;

    /// List a user's records newest-first, soft-deleted excluded
    async fn list_by_user(&self, user_id: &str, limit: i64) -> Result<Vec<SignatureRecord>>;

    /// Mark a record deleted for retention. The row survives.
    async fn soft_delete(&self, id: Uuid) -> Result<()>;
}

pub struct PgSignatureRecordStore {
    pool: PgPool,
}

impl PgSignatureRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SignatureRecordStore for PgSignatureRecordStore {
    async fn append(&self, record: &SignatureRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signature_records (
                id, payload, signature_value, operation_type, user_id, created_at, deleted
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(&record.payload)
        .bind(&record.signature_value)
        .bind(record.operation_type.as_str())
        .bind(&record.user_id)
        .bind(record.created_at)
        .bind(record.deleted)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SignatureRecord>> {
        let row = sqlx::query_as::<_, SignatureRecordRow>(
            r#"
            SELECT id, payload, signature_value, operation_type, user_id, created_at, deleted
            FROM signature_records
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SignatureRecord::from))
    }

    async fn list_by_user(&self, user_id: &str, limit: i64) -> Result<Vec<SignatureRecord>> {
        let rows = sqlx::query_as::<_, SignatureRecordRow>(
            r#"
            SELECT id, payload, signature_value, operation_type, user_id, created_at, deleted
            FROM signature_records
            WHERE user_id = $1 AND deleted = FALSE
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SignatureRecord::from).collect())
    }

    async fn soft_delete(&self, id: Uuid) -> Result<()> {
        let result =
            sqlx::query("UPDATE signature_records SET deleted = TRUE WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(NotaryError::Internal(format!(
                "signature record not found: {id}"
            )));
        }
        Ok(())
    }
}

/// In-memory record store for tests
#[derive(Default)]
pub struct InMemorySignatureRecordStore {
    records: RwLock<Vec<SignatureRecord>>,
}

impl InMemorySignatureRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SignatureRecordStore for InMemorySignatureRecordStore {
    async fn append(&self, record: &SignatureRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SignatureRecord>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list_by_user(&self, user_id: &str, limit: i64) -> Result<Vec<SignatureRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<SignatureRecord> = records
            .iter()
            .filter(|r| r.user_id == user_id && !r.deleted)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn soft_delete(&self, id: Uuid) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| NotaryError::Internal(format!("signature record not found: {id}")))?;
        record.deleted = true;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SignatureRecordRow {
    id: Uuid,
    payload: String,
    signature_value: String,
    operation_type: String,
    user_id: String,
    created_at: DateTime<Utc>,
    deleted: bool,
}

impl From<SignatureRecordRow> for SignatureRecord {
    fn from(row: SignatureRecordRow) -> Self {
        Self {
            id: row.id,
            payload: row.payload,
            signature_value: row.signature_value,
            operation_type: OperationType::new(row.operation_type),
            user_id: row.user_id,
            created_at: row.created_at,
            deleted: row.deleted,
        }
    }
}
