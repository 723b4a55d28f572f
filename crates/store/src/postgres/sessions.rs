use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use common::SessionId;
use domain::CheckoutSession;

use crate::error::{Result, StoreError};
use crate::sessions::SessionStore;

/// PostgreSQL session store.
///
/// Sessions are single-writer and short-lived, so they are stored as a
/// JSONB payload keyed by id with an expiry column for the sweep.
#[derive(Clone)]
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    /// Creates a new store over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn insert(&self, session: CheckoutSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO checkout_sessions (id, payload, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(session.id.as_uuid())
        .bind(serde_json::to_value(&session)?)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: SessionId) -> Result<Option<CheckoutSession>> {
        let payload: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT payload FROM checkout_sessions WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        payload
            .map(|p| serde_json::from_value(p).map_err(StoreError::from))
            .transpose()
    }

    async fn update(&self, session: CheckoutSession) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE checkout_sessions SET payload = $2, expires_at = $3 WHERE id = $1",
        )
        .bind(session.id.as_uuid())
        .bind(serde_json::to_value(&session)?)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "session",
                id: session.id.to_string(),
            });
        }
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let purged = sqlx::query("DELETE FROM checkout_sessions WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(purged)
    }
}
