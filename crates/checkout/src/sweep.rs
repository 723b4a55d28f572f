//! Background reclamation of expired state.
//!
//! Expiry is enforced lazily on every access, so the sweep is a
//! correctness backstop plus garbage collection: it returns stock to
//! availability, fails abandoned payments and drops dead rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use store::{IdempotencyStore, InventoryStore, OrderStore, SessionStore};

use crate::error::CheckoutError;
use crate::reconciler::PaymentReconciler;

/// Counters from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Holds whose window elapsed and were released.
    pub released_holds: u64,
    /// Pending payments failed and their orders cancelled.
    pub expired_payments: u64,
    /// Expired session rows deleted.
    pub purged_sessions: u64,
    /// Expired idempotency records deleted.
    pub purged_idempotency: u64,
}

impl SweepReport {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Periodic reclamation task.
pub struct Sweeper<S, I, O, K> {
    sessions: S,
    inventory: I,
    orders: O,
    idempotency: K,
    reconciler: Arc<PaymentReconciler<I, O>>,
}

impl<S, I, O, K> Sweeper<S, I, O, K>
where
    S: SessionStore,
    I: InventoryStore,
    O: OrderStore,
    K: IdempotencyStore,
{
    /// Creates a sweeper. Payment expiry goes through the reconciler so
    /// the sweep and a late gateway notification resolve the same way.
    pub fn new(
        sessions: S,
        inventory: I,
        orders: O,
        idempotency: K,
        reconciler: Arc<PaymentReconciler<I, O>>,
    ) -> Self {
        Self {
            sessions,
            inventory,
            orders,
            idempotency,
            reconciler,
        }
    }

    /// Runs one reclamation pass.
    ///
    /// Orphaned holds (a placement crash between reserve and insert)
    /// have no owner to release them, so this pass is what makes their
    /// stock sellable again.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, CheckoutError> {
        let released = self.inventory.release_expired(now).await?;

        let mut expired_payments = 0;
        for payment in self.orders.expired_pending_payments(now).await? {
            match self.reconciler.expire(&payment).await {
                Ok(()) => expired_payments += 1,
                // Keep going; the next pass retries this payment.
                Err(e) => {
                    warn!(order_id = %payment.order_id, error = %e,
                        "failed to expire pending payment");
                }
            }
        }

        let report = SweepReport {
            released_holds: released.len() as u64,
            expired_payments,
            purged_sessions: self.sessions.purge_expired(now).await?,
            purged_idempotency: self.idempotency.purge_expired(now).await?,
        };

        metrics::counter!("sweep_released_holds_total").increment(report.released_holds);
        metrics::counter!("sweep_expired_payments_total").increment(report.expired_payments);
        if !report.is_empty() {
            info!(
                released_holds = report.released_holds,
                expired_payments = report.expired_payments,
                purged_sessions = report.purged_sessions,
                purged_idempotency = report.purged_idempotency,
                "sweep pass reclaimed state"
            );
        }
        Ok(report)
    }

    /// Sweeps forever at the given interval. Spawn this on its own task.
    pub async fn run(self, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once(Utc::now()).await {
                warn!(error = %e, "sweep pass failed");
            }
        }
    }
}
