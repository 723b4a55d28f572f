//! Idempotency record store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use domain::{IdempotencyRecord, IdempotencyStatus};

use crate::error::Result;

/// Outcome of attempting to claim an idempotency key.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// The key was free; the caller owns the operation.
    Inserted,
    /// The key already exists; the existing record decides what happens.
    Existing(IdempotencyRecord),
}

/// Store for idempotency records.
///
/// `insert_processing` is the serialization point: exactly one of any
/// set of concurrent callers with the same key receives `Inserted`.
/// Backed by the primary-key constraint in PostgreSQL and by a single
/// write-lock critical section in memory.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Claims a key by inserting a `Processing` record.
    ///
    /// An expired existing record is treated as absent and replaced.
    async fn insert_processing(&self, record: IdempotencyRecord) -> Result<InsertOutcome>;

    /// Replaces the `Processing` record with an immutable `Succeeded`
    /// record carrying the serialized response.
    async fn mark_succeeded(&self, key: &str, response: serde_json::Value) -> Result<()>;

    /// Deletes the record so the same key can be retried.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Looks up a record by key.
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// Deletes expired records, returning how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// In-memory idempotency store.
#[derive(Clone, Default)]
pub struct InMemoryIdempotencyStore {
    records: Arc<RwLock<HashMap<String, IdempotencyRecord>>>,
}

impl InMemoryIdempotencyStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn insert_processing(&self, record: IdempotencyRecord) -> Result<InsertOutcome> {
        let mut records = self.records.write().await;
        let now = record.created_at;

        if let Some(existing) = records.get(&record.key)
            && !existing.is_expired(now)
        {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }

        records.insert(record.key.clone(), record);
        Ok(InsertOutcome::Inserted)
    }

    async fn mark_succeeded(&self, key: &str, response: serde_json::Value) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(key) {
            record.status = IdempotencyStatus::Succeeded;
            record.stored_response = Some(response);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !r.is_expired(now));
        Ok((before - records.len()) as u64)
    }
}

#[async_trait]
impl<T: IdempotencyStore + ?Sized> IdempotencyStore for Arc<T> {
    async fn insert_processing(&self, record: IdempotencyRecord) -> Result<InsertOutcome> {
        (**self).insert_processing(record).await
    }

    async fn mark_succeeded(&self, key: &str, response: serde_json::Value) -> Result<()> {
        (**self).mark_succeeded(key, response).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key).await
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        (**self).get(key).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        (**self).purge_expired(now).await
    }
}
