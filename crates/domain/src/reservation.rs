//! Time-bounded inventory reservations.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{ReservationId, VariantId};

/// The state of an inventory reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ReservationStatus {
    /// Stock is held; reclaimable after `hold_until` passes.
    #[default]
    Held,

    /// The order was finalized; the hold became a permanent deduction.
    Committed,

    /// The hold was given back (cancellation or expiry).
    Released,
}

impl ReservationStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Held => "Held",
            ReservationStatus::Committed => "Committed",
            ReservationStatus::Released => "Released",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A time-bounded claim against a variant's stock.
///
/// Invariant, enforced by the store: per variant, the sum of quantities
/// over active `Held` plus `Committed` rows never exceeds on-hand stock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReservation {
    pub id: ReservationId,
    pub variant_id: VariantId,
    /// The session or order this hold belongs to.
    pub scope_id: Uuid,
    pub quantity: u32,
    pub status: ReservationStatus,
    pub reserved_at: DateTime<Utc>,
    pub hold_until: DateTime<Utc>,
}

impl InventoryReservation {
    /// Creates a held reservation.
    pub fn held(
        variant_id: VariantId,
        scope_id: Uuid,
        quantity: u32,
        hold: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            variant_id,
            scope_id,
            quantity,
            status: ReservationStatus::Held,
            reserved_at: now,
            hold_until: now + hold,
        }
    }

    /// Returns true if this row still counts against availability.
    ///
    /// Committed rows always count; held rows only until `hold_until`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ReservationStatus::Committed => true,
            ReservationStatus::Held => now <= self.hold_until,
            ReservationStatus::Released => false,
        }
    }

    /// Returns true if the sweep may reclaim this hold.
    pub fn is_reclaimable(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Held && now > self.hold_until
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation() -> InventoryReservation {
        InventoryReservation::held(
            VariantId::new("SKU-001"),
            Uuid::new_v4(),
            2,
            Duration::minutes(30),
            Utc::now(),
        )
    }

    #[test]
    fn held_reservation_is_active_until_hold_elapses() {
        let r = reservation();
        assert!(r.is_active(Utc::now()));
        assert!(!r.is_active(Utc::now() + Duration::minutes(31)));
    }

    #[test]
    fn committed_reservation_never_expires() {
        let mut r = reservation();
        r.status = ReservationStatus::Committed;
        assert!(r.is_active(Utc::now() + Duration::days(1)));
        assert!(!r.is_reclaimable(Utc::now() + Duration::days(1)));
    }

    #[test]
    fn expired_hold_is_reclaimable() {
        let r = reservation();
        assert!(!r.is_reclaimable(Utc::now()));
        assert!(r.is_reclaimable(Utc::now() + Duration::minutes(31)));
    }

    #[test]
    fn released_reservation_is_inert() {
        let mut r = reservation();
        r.status = ReservationStatus::Released;
        assert!(!r.is_active(Utc::now()));
        assert!(!r.is_reclaimable(Utc::now() + Duration::days(1)));
    }
}
