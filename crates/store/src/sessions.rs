//! Checkout session store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use common::SessionId;
use domain::CheckoutSession;

use crate::error::{Result, StoreError};

/// Store for ephemeral, TTL-backed checkout sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts a new session.
    async fn insert(&self, session: CheckoutSession) -> Result<()>;

    /// Looks up a session.
    async fn get(&self, id: SessionId) -> Result<Option<CheckoutSession>>;

    /// Replaces a session row. Sessions have a single writer (the
    /// client that owns them), so this is a whole-row update.
    async fn update(&self, session: CheckoutSession) -> Result<()>;

    /// Deletes sessions whose TTL elapsed, returning how many.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// In-memory session store.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, CheckoutSession>>>,
}

impl InMemorySessionStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: CheckoutSession) -> Result<()> {
        self.sessions.write().await.insert(session.id, session);
        Ok(())
    }

    async fn get(&self, id: SessionId) -> Result<Option<CheckoutSession>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn update(&self, session: CheckoutSession) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(&session.id) {
            return Err(StoreError::NotFound {
                entity: "session",
                id: session.id.to_string(),
            });
        }
        sessions.insert(session.id, session);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - sessions.len()) as u64)
    }
}

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn insert(&self, session: CheckoutSession) -> Result<()> {
        (**self).insert(session).await
    }

    async fn get(&self, id: SessionId) -> Result<Option<CheckoutSession>> {
        (**self).get(id).await
    }

    async fn update(&self, session: CheckoutSession) -> Result<()> {
        (**self).update(session).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        (**self).purge_expired(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::{CustomerId, Money};
    use domain::CartLine;

    fn session(ttl_minutes: i64) -> CheckoutSession {
        CheckoutSession::new(
            CustomerId::new(),
            vec![CartLine::new("SKU-001", "Widget", Money::from_cents(1000), 1)],
            Duration::minutes(ttl_minutes),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn insert_get_update() {
        let store = InMemorySessionStore::new();
        let mut s = session(30);
        let id = s.id;
        store.insert(s.clone()).await.unwrap();

        s.apply_discount("SAVE10", Money::from_cents(100), Utc::now())
            .unwrap();
        store.update(s).await.unwrap();

        let found = store.get(id).await.unwrap().unwrap();
        assert_eq!(found.discount_code.as_deref(), Some("SAVE10"));
    }

    #[tokio::test]
    async fn update_unknown_session_fails() {
        let store = InMemorySessionStore::new();
        let err = store.update(session(30)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn purge_drops_expired_sessions() {
        let store = InMemorySessionStore::new();
        let fresh = session(30);
        let mut stale = session(30);
        stale.expires_at = Utc::now() - Duration::minutes(1);
        let fresh_id = fresh.id;
        store.insert(fresh).await.unwrap();
        store.insert(stale).await.unwrap();

        let purged = store.purge_expired(Utc::now()).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.get(fresh_id).await.unwrap().is_some());
    }
}
