//! Idempotency guard: at-most-once execution of a protected operation.

use std::future::Future;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use domain::{IdempotencyRecord, IdempotencyStatus};
use store::{IdempotencyStore, InsertOutcome};

use crate::error::CheckoutError;

/// How the guard produced a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome<T> {
    /// The operation ran in this call.
    Executed(T),
    /// A previous success was replayed verbatim; the operation did not run.
    Replayed(T),
}

impl<T> GuardOutcome<T> {
    /// Unwraps the value regardless of how it was produced.
    pub fn into_inner(self) -> T {
        match self {
            GuardOutcome::Executed(v) | GuardOutcome::Replayed(v) => v,
        }
    }

    /// True if this was a replay of a stored response.
    pub fn is_replay(&self) -> bool {
        matches!(self, GuardOutcome::Replayed(_))
    }
}

/// Deduplicates a client-identified mutating operation.
///
/// The operation is a first-class async closure rather than metadata
/// on a handler: the guard claims the key, runs the closure at most
/// once, and stores or replays its serialized result.
pub struct IdempotencyGuard<I> {
    store: I,
    ttl: Duration,
}

impl<I: IdempotencyStore> IdempotencyGuard<I> {
    /// Creates a guard with the default 3600 s record TTL.
    pub fn new(store: I) -> Self {
        Self::with_ttl(store, Duration::seconds(3600))
    }

    /// Creates a guard with an explicit record TTL.
    pub fn with_ttl(store: I, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Executes `operation` at most once for (`key`, `scope_id`).
    ///
    /// - first caller claims the key and runs the operation
    /// - a stored success is replayed without re-execution
    /// - a concurrent in-flight attempt is a conflict
    /// - a key reused against a different scope is a validation error
    /// - failures delete the record so the same key can be retried
    #[tracing::instrument(skip(self, operation), fields(key))]
    pub async fn execute<F, Fut, T>(
        &self,
        key: &str,
        scope_id: &str,
        operation: F,
    ) -> Result<GuardOutcome<T>, CheckoutError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CheckoutError>>,
        T: Serialize + DeserializeOwned,
    {
        if key.trim().is_empty() {
            return Err(CheckoutError::Validation(
                "idempotency key must not be empty".to_string(),
            ));
        }
        if scope_id.trim().is_empty() {
            return Err(CheckoutError::Validation(
                "idempotency scope must not be empty".to_string(),
            ));
        }

        let record = IdempotencyRecord::processing(key, scope_id, self.ttl, Utc::now());

        match self.store.insert_processing(record).await? {
            InsertOutcome::Existing(existing) => {
                // Scope is checked first: a token reused across
                // unrelated resources is a client bug, never served.
                if !existing.matches_scope(scope_id) {
                    metrics::counter!("idempotency_scope_mismatch_total").increment(1);
                    return Err(CheckoutError::Validation(
                        "idempotency key was already used for a different resource".to_string(),
                    ));
                }
                match existing.status {
                    IdempotencyStatus::Succeeded => {
                        let stored = existing.stored_response.ok_or_else(|| {
                            CheckoutError::Internal(
                                "succeeded idempotency record has no stored response".to_string(),
                            )
                        })?;
                        let value = serde_json::from_value(stored)?;
                        metrics::counter!("idempotency_replays_total").increment(1);
                        tracing::info!(key, "replaying stored idempotent response");
                        Ok(GuardOutcome::Replayed(value))
                    }
                    IdempotencyStatus::Processing => Err(CheckoutError::Conflict(
                        "a request with this idempotency key is still in flight".to_string(),
                    )),
                }
            }
            InsertOutcome::Inserted => match operation().await {
                Ok(value) => {
                    let serialized = serde_json::to_value(&value)?;
                    self.store.mark_succeeded(key, serialized).await?;
                    Ok(GuardOutcome::Executed(value))
                }
                Err(err) => {
                    // Delete-on-failure keeps legitimate retries possible;
                    // failures are never remembered.
                    if let Err(cleanup) = self.store.remove(key).await {
                        tracing::error!(key, error = %cleanup, "failed to clean up idempotency record");
                    }
                    Err(err)
                }
            },
        }
    }
}
