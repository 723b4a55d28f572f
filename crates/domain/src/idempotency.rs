//! Idempotency records for at-most-once request execution.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lifecycle of an idempotency record.
///
/// `Processing` blocks concurrent calls with the same key; `Succeeded`
/// is immutable and replayable. Failed attempts delete the record
/// instead of recording a state, so legitimate retries stay possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdempotencyStatus {
    Processing,
    Succeeded,
}

impl IdempotencyStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyStatus::Processing => "Processing",
            IdempotencyStatus::Succeeded => "Succeeded",
        }
    }
}

impl std::fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One protected logical request, unique per client-supplied key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// The opaque client token.
    pub key: String,
    /// Hash of the protected resource's identifier; a mismatch means
    /// the client reused a token across unrelated resources.
    pub scope_hash: String,
    pub status: IdempotencyStatus,
    /// The serialized successful response, replayed verbatim.
    pub stored_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    /// Stuck `Processing` rows (crashed workers) clear only via this TTL.
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Creates a fresh `Processing` record for a request starting now.
    pub fn processing(
        key: impl Into<String>,
        scope_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            scope_hash: scope_hash(scope_id),
            status: IdempotencyStatus::Processing,
            stored_response: None,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Returns true if the record's TTL has elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Returns true if the record protects the given scope.
    pub fn matches_scope(&self, scope_id: &str) -> bool {
        self.scope_hash == scope_hash(scope_id)
    }
}

/// SHA-256 hex digest of a scope identifier.
pub fn scope_hash(scope_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope_id.as_bytes());
    hex::encode(hasher.finalize())
}
