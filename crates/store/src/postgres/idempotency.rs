use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use domain::{IdempotencyRecord, IdempotencyStatus};

use crate::error::Result;
use crate::idempotency::{IdempotencyStore, InsertOutcome};

/// PostgreSQL idempotency store.
///
/// The primary key on `key` serializes concurrent first inserts; the
/// loser of the race reads back the winner's row.
#[derive(Clone)]
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    /// Creates a new store over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: PgRow) -> Result<IdempotencyRecord> {
        let status: String = row.try_get("status")?;
        let status = match status.as_str() {
            "Succeeded" => IdempotencyStatus::Succeeded,
            _ => IdempotencyStatus::Processing,
        };
        Ok(IdempotencyRecord {
            key: row.try_get("key")?,
            scope_hash: row.try_get("scope_hash")?,
            status,
            stored_response: row.try_get("stored_response")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    #[tracing::instrument(skip(self, record), fields(key = %record.key))]
    async fn insert_processing(&self, record: IdempotencyRecord) -> Result<InsertOutcome> {
        let mut tx = self.pool.begin().await?;

        // Expired rows are dead; clear one out of the way first so the
        // insert below can claim the key.
        sqlx::query("DELETE FROM idempotency_records WHERE key = $1 AND expires_at < $2")
            .bind(&record.key)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_records (key, scope_hash, status, stored_response, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(&record.key)
        .bind(&record.scope_hash)
        .bind(record.status.as_str())
        .bind(&record.stored_response)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 1 {
            tx.commit().await?;
            return Ok(InsertOutcome::Inserted);
        }

        let row = sqlx::query("SELECT * FROM idempotency_records WHERE key = $1")
            .bind(&record.key)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(InsertOutcome::Existing(Self::row_to_record(row)?))
    }

    async fn mark_succeeded(&self, key: &str, response: serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE idempotency_records
            SET status = 'Succeeded', stored_response = $2
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(&response)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_records WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query("SELECT * FROM idempotency_records WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_record).transpose()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let purged = sqlx::query("DELETE FROM idempotency_records WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(purged)
    }
}
