//! Inventory stock and reservation ledger store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use common::{ReservationId, VariantId};
use domain::{InventoryReservation, ReservationStatus};

use crate::error::{Result, StoreError};

/// Store for on-hand stock and the reservation ledger.
///
/// `reserve` bundles the availability check and the insert into one
/// atomic call so concurrent reservations can never jointly oversell
/// a variant.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Sets the on-hand quantity for a variant (seed/admin path).
    async fn set_on_hand(&self, variant_id: VariantId, quantity: u32) -> Result<()>;

    /// Atomically checks `quantity <= on_hand − Σ(active holds)` and
    /// inserts a `Held` row, or fails with `InsufficientStock`.
    async fn reserve(
        &self,
        variant_id: VariantId,
        quantity: u32,
        scope_id: Uuid,
        hold: Duration,
        now: DateTime<Utc>,
    ) -> Result<InventoryReservation>;

    /// Transitions `Held -> Committed`. Committing an already committed
    /// row is a no-op; a released row cannot be committed.
    async fn commit(&self, id: ReservationId) -> Result<()>;

    /// Transitions `Held|Committed -> Released`. Idempotent.
    async fn release(&self, id: ReservationId) -> Result<()>;

    /// Looks up a reservation.
    async fn get(&self, id: ReservationId) -> Result<Option<InventoryReservation>>;

    /// Sum of active (held + committed) quantity for a variant.
    async fn active_reserved(&self, variant_id: &VariantId, now: DateTime<Utc>) -> Result<u32>;

    /// Releases holds whose `hold_until` elapsed without commitment.
    /// Returns the reservations that were reclaimed.
    async fn release_expired(&self, now: DateTime<Utc>) -> Result<Vec<InventoryReservation>>;
}

#[derive(Default)]
struct InventoryState {
    on_hand: HashMap<VariantId, u32>,
    reservations: HashMap<ReservationId, InventoryReservation>,
}

impl InventoryState {
    fn active_reserved(&self, variant_id: &VariantId, now: DateTime<Utc>) -> u32 {
        self.reservations
            .values()
            .filter(|r| &r.variant_id == variant_id && r.is_active(now))
            .map(|r| r.quantity)
            .sum()
    }
}

/// In-memory inventory store.
///
/// A single write lock around check-and-insert gives the same
/// guarantee the PostgreSQL implementation gets from `FOR UPDATE`.
#[derive(Clone, Default)]
pub struct InMemoryInventoryStore {
    state: Arc<RwLock<InventoryState>>,
}

impl InMemoryInventoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn set_on_hand(&self, variant_id: VariantId, quantity: u32) -> Result<()> {
        self.state.write().await.on_hand.insert(variant_id, quantity);
        Ok(())
    }

    async fn reserve(
        &self,
        variant_id: VariantId,
        quantity: u32,
        scope_id: Uuid,
        hold: Duration,
        now: DateTime<Utc>,
    ) -> Result<InventoryReservation> {
        let mut state = self.state.write().await;

        let on_hand = *state.on_hand.get(&variant_id).unwrap_or(&0);
        let reserved = state.active_reserved(&variant_id, now);
        let available = on_hand.saturating_sub(reserved);

        if quantity > available {
            return Err(StoreError::InsufficientStock {
                variant_id,
                requested: quantity,
                available,
            });
        }

        let reservation = InventoryReservation::held(variant_id, scope_id, quantity, hold, now);
        state
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn commit(&self, id: ReservationId) -> Result<()> {
        let mut state = self.state.write().await;
        let reservation =
            state
                .reservations
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound {
                    entity: "reservation",
                    id: id.to_string(),
                })?;

        match reservation.status {
            ReservationStatus::Held => {
                reservation.status = ReservationStatus::Committed;
                Ok(())
            }
            ReservationStatus::Committed => Ok(()),
            ReservationStatus::Released => Err(StoreError::VersionConflict {
                entity: "reservation",
                id: id.to_string(),
            }),
        }
    }

    async fn release(&self, id: ReservationId) -> Result<()> {
        let mut state = self.state.write().await;
        let reservation =
            state
                .reservations
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound {
                    entity: "reservation",
                    id: id.to_string(),
                })?;
        reservation.status = ReservationStatus::Released;
        Ok(())
    }

    async fn get(&self, id: ReservationId) -> Result<Option<InventoryReservation>> {
        Ok(self.state.read().await.reservations.get(&id).cloned())
    }

    async fn active_reserved(&self, variant_id: &VariantId, now: DateTime<Utc>) -> Result<u32> {
        Ok(self.state.read().await.active_reserved(variant_id, now))
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> Result<Vec<InventoryReservation>> {
        let mut state = self.state.write().await;
        let mut reclaimed = Vec::new();
        for reservation in state.reservations.values_mut() {
            if reservation.is_reclaimable(now) {
                reservation.status = ReservationStatus::Released;
                reclaimed.push(reservation.clone());
            }
        }
        Ok(reclaimed)
    }
}

#[async_trait]
impl<T: InventoryStore + ?Sized> InventoryStore for Arc<T> {
    async fn set_on_hand(&self, variant_id: VariantId, quantity: u32) -> Result<()> {
        (**self).set_on_hand(variant_id, quantity).await
    }

    async fn reserve(
        &self,
        variant_id: VariantId,
        quantity: u32,
        scope_id: Uuid,
        hold: Duration,
        now: DateTime<Utc>,
    ) -> Result<InventoryReservation> {
        (**self).reserve(variant_id, quantity, scope_id, hold, now).await
    }

    async fn commit(&self, id: ReservationId) -> Result<()> {
        (**self).commit(id).await
    }

    async fn release(&self, id: ReservationId) -> Result<()> {
        (**self).release(id).await
    }

    async fn get(&self, id: ReservationId) -> Result<Option<InventoryReservation>> {
        (**self).get(id).await
    }

    async fn active_reserved(&self, variant_id: &VariantId, now: DateTime<Utc>) -> Result<u32> {
        (**self).active_reserved(variant_id, now).await
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> Result<Vec<InventoryReservation>> {
        (**self).release_expired(now).await
    }
}
