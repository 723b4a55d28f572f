//! Session lifecycle and the place-order pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use common::{CustomerId, Money, OrderId, PaymentId, ReservationId, SessionId, VariantId};
use domain::{
    CartLine, CheckoutSession, Discount, DomainError, Order, OrderStatus, Payment, PaymentMethod,
    PaymentStatus, ShippingMethod,
};
use store::{DiscountStore, InventoryStore, OrderStore, SessionStore};

use crate::engine::DiscountEngine;
use crate::error::CheckoutError;
use crate::retry_transient;

/// Tunable windows for sessions, holds and payments.
#[derive(Debug, Clone, Copy)]
pub struct CheckoutConfig {
    /// How long a session stays mutable.
    pub session_ttl: Duration,
    /// How long a reservation holds stock before the sweep reclaims it.
    pub reservation_hold: Duration,
    /// How long a pending payment may wait for the gateway.
    pub payment_window: Duration,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::minutes(30),
            reservation_hold: Duration::minutes(15),
            payment_window: Duration::minutes(15),
        }
    }
}

/// What the caller gets back from a successful placement.
///
/// Serialized into the idempotency record, so a replayed request
/// returns the same confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfirmation {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub amount: Money,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
}

/// Drives sessions from creation through placement.
///
/// `place` is the only path that creates orders. It reserves stock,
/// redeems the discount, then writes the order; every failure after a
/// side effect compensates that effect before surfacing the error.
pub struct CheckoutOrchestrator<S, I, D, O> {
    sessions: S,
    inventory: I,
    engine: DiscountEngine<D>,
    orders: O,
    config: CheckoutConfig,
}

impl<S, I, D, O> CheckoutOrchestrator<S, I, D, O>
where
    S: SessionStore,
    I: InventoryStore,
    D: DiscountStore,
    O: OrderStore,
{
    /// Creates an orchestrator over the given stores.
    pub fn new(sessions: S, inventory: I, discounts: D, orders: O, config: CheckoutConfig) -> Self {
        Self {
            sessions,
            inventory,
            engine: DiscountEngine::new(discounts),
            orders,
            config,
        }
    }

    /// Creates a session from a cart snapshot.
    #[tracing::instrument(skip(self, lines))]
    pub async fn create_session(
        &self,
        customer_id: CustomerId,
        lines: Vec<CartLine>,
        now: DateTime<Utc>,
    ) -> Result<CheckoutSession, CheckoutError> {
        let session = CheckoutSession::new(customer_id, lines, self.config.session_ttl, now)?;
        self.sessions.insert(session.clone()).await?;
        metrics::counter!("checkout_sessions_created_total").increment(1);
        Ok(session)
    }

    /// Looks up a session.
    pub async fn get_session(&self, id: SessionId) -> Result<CheckoutSession, CheckoutError> {
        self.sessions
            .get(id)
            .await?
            .ok_or_else(|| CheckoutError::NotFound {
                entity: "session",
                id: id.to_string(),
            })
    }

    /// Validates a discount code against the session's cart and applies it.
    #[tracing::instrument(skip(self))]
    pub async fn apply_discount(
        &self,
        id: SessionId,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<CheckoutSession, CheckoutError> {
        let mut session = self.load_active(id, now).await?;
        let (_, amount) = self.engine.validate(code, &session.lines, now).await?;
        session.apply_discount(code, amount, now)?;
        self.sessions.update(session.clone()).await?;
        Ok(session)
    }

    /// Removes any applied discount from the session.
    pub async fn remove_discount(
        &self,
        id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<CheckoutSession, CheckoutError> {
        let mut session = self.load_active(id, now).await?;
        session.remove_discount(now)?;
        self.sessions.update(session.clone()).await?;
        Ok(session)
    }

    /// Selects the shipping method.
    pub async fn select_shipping(
        &self,
        id: SessionId,
        method: ShippingMethod,
        now: DateTime<Utc>,
    ) -> Result<CheckoutSession, CheckoutError> {
        let mut session = self.load_active(id, now).await?;
        session.select_shipping(method, now)?;
        self.sessions.update(session.clone()).await?;
        Ok(session)
    }

    /// Selects the payment method.
    pub async fn select_payment_method(
        &self,
        id: SessionId,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<CheckoutSession, CheckoutError> {
        let mut session = self.load_active(id, now).await?;
        session.select_payment_method(method, now)?;
        self.sessions.update(session.clone()).await?;
        Ok(session)
    }

    /// Places an order from a ready session.
    ///
    /// Pipeline: reserve stock per variant in ascending SKU order,
    /// redeem the discount, write the order with its pending payment,
    /// then finalize cash-on-delivery orders immediately. Reservations
    /// acquired before a failing step are released, and a recorded
    /// redemption is removed.
    #[tracing::instrument(skip(self))]
    pub async fn place(
        &self,
        id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<PlacementConfirmation, CheckoutError> {
        let mut session = self.load_active(id, now).await?;
        if !session.is_placeable() {
            return Err(CheckoutError::Conflict(format!(
                "session {id} is not ready to place (state {})",
                session.state
            )));
        }
        let payment_method = session
            .payment_method
            .ok_or_else(|| CheckoutError::Conflict(format!("session {id} has no payment method")))?;

        let order_id = OrderId::new();
        let reservation_ids = self.reserve_cart(&session, order_id, now).await?;

        let discount = match self.settle_discount(&session, order_id, now).await {
            Ok(d) => d,
            Err(e) => {
                self.release_all(&reservation_ids).await;
                return Err(e);
            }
        };
        let discount_amount = discount
            .as_ref()
            .map(|(_, amount)| *amount)
            .unwrap_or_default();

        let subtotal = session.subtotal();
        let shipping_fee = session.shipping_fee();
        let total = subtotal - discount_amount + shipping_fee;

        let order = Order {
            id: order_id,
            session_id: session.id,
            customer_id: session.customer_id,
            lines: session.lines.clone(),
            subtotal,
            discount_amount,
            shipping_fee,
            total,
            discount_code: session.discount_code.clone(),
            reservation_ids: reservation_ids.clone(),
            status: OrderStatus::PendingPayment,
            version: 1,
            created_at: now,
        };
        let payment = Payment::pending(
            order_id,
            total,
            payment_method,
            self.config.payment_window,
            now,
        );
        let payment_id = payment.id;

        if let Err(e) = retry_transient(|| self.orders.insert(order.clone(), payment.clone())).await
        {
            self.release_all(&reservation_ids).await;
            if let Some((d, _)) = &discount {
                self.unredeem_best_effort(d, order_id).await;
            }
            return Err(e.into());
        }

        // Cash on delivery has no gateway step; finalize right away so
        // the payment sweep never touches a deliverable order.
        let (order_status, payment_status) = if payment_method == PaymentMethod::CashOnDelivery {
            self.finalize(order_id, payment_id, &reservation_ids).await?;
            (OrderStatus::Confirmed, PaymentStatus::Captured)
        } else {
            (OrderStatus::PendingPayment, PaymentStatus::Pending)
        };

        session.mark_placed(now)?;
        self.sessions.update(session).await?;

        metrics::counter!("orders_placed_total").increment(1);
        info!(%order_id, %payment_id, amount = total.cents(), "order placed");

        Ok(PlacementConfirmation {
            order_id,
            payment_id,
            amount: total,
            order_status,
            payment_status,
        })
    }

    /// Looks up an order.
    pub async fn get_order(&self, id: OrderId) -> Result<Order, CheckoutError> {
        self.orders
            .get_order(id)
            .await?
            .ok_or_else(|| CheckoutError::NotFound {
                entity: "order",
                id: id.to_string(),
            })
    }

    /// Loads a session, enforcing expiry lazily: an elapsed TTL marks
    /// the row `Expired` before the error surfaces.
    async fn load_active(
        &self,
        id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<CheckoutSession, CheckoutError> {
        let mut session = self.get_session(id).await?;
        if let Err(e) = session.ensure_active(now) {
            if matches!(e, DomainError::Expired(_)) {
                session.mark_expired();
                self.sessions.update(session).await?;
            }
            return Err(e.into());
        }
        Ok(session)
    }

    /// Reserves the whole cart, one hold per variant.
    ///
    /// Lines for the same variant are merged and variants are acquired
    /// in ascending SKU order, so two concurrent placements touching
    /// the same variants never deadlock in the row-locking store.
    async fn reserve_cart(
        &self,
        session: &CheckoutSession,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservationId>, CheckoutError> {
        let mut quantities: BTreeMap<VariantId, u32> = BTreeMap::new();
        for line in &session.lines {
            *quantities.entry(line.variant_id.clone()).or_default() += line.quantity;
        }

        let mut acquired = Vec::with_capacity(quantities.len());
        for (variant_id, quantity) in quantities {
            let result = retry_transient(|| {
                self.inventory.reserve(
                    variant_id.clone(),
                    quantity,
                    order_id.as_uuid(),
                    self.config.reservation_hold,
                    now,
                )
            })
            .await;
            match result {
                Ok(r) => acquired.push(r.id),
                Err(e) => {
                    self.release_all(&acquired).await;
                    return Err(e.into());
                }
            }
        }
        Ok(acquired)
    }

    /// Re-validates the session's discount code at placement time and
    /// records the redemption.
    async fn settle_discount(
        &self,
        session: &CheckoutSession,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<Option<(Discount, Money)>, CheckoutError> {
        let Some(code) = &session.discount_code else {
            return Ok(None);
        };
        let (discount, amount) = self.engine.validate(code, &session.lines, now).await?;
        self.engine
            .redeem(&discount, order_id, session.customer_id, now)
            .await?;
        Ok(Some((discount, amount)))
    }

    /// Captures the payment, commits the holds and confirms the order.
    /// Used for cash on delivery, where there is no gateway round trip.
    async fn finalize(
        &self,
        order_id: OrderId,
        payment_id: PaymentId,
        reservation_ids: &[ReservationId],
    ) -> Result<(), CheckoutError> {
        retry_transient(|| {
            self.orders
                .update_payment_status(payment_id, PaymentStatus::Captured, 1)
        })
        .await?;
        for id in reservation_ids {
            retry_transient(|| self.inventory.commit(*id)).await?;
        }
        retry_transient(|| self.orders.update_order_status(order_id, OrderStatus::Confirmed, 1))
            .await?;
        Ok(())
    }

    /// Best-effort compensation; failures are logged, the sweep will
    /// reclaim anything left behind once the hold elapses.
    async fn release_all(&self, reservation_ids: &[ReservationId]) {
        for id in reservation_ids {
            if let Err(e) = self.inventory.release(*id).await {
                warn!(reservation_id = %id, error = %e, "failed to release reservation");
            }
        }
    }

    async fn unredeem_best_effort(&self, discount: &Discount, order_id: OrderId) {
        if let Err(e) = self.engine.unredeem(discount, order_id).await {
            warn!(code = %discount.code, %order_id, error = %e, "failed to remove redemption");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::DiscountId;
    use domain::{DiscountKind, SessionState};
    use store::{
        InMemoryDiscountStore, InMemoryInventoryStore, InMemoryOrderStore, InMemorySessionStore,
    };

    type TestOrchestrator = CheckoutOrchestrator<
        InMemorySessionStore,
        InMemoryInventoryStore,
        InMemoryDiscountStore,
        InMemoryOrderStore,
    >;

    struct Fixture {
        orchestrator: TestOrchestrator,
        inventory: InMemoryInventoryStore,
        discounts: InMemoryDiscountStore,
        orders: InMemoryOrderStore,
    }

    async fn fixture() -> Fixture {
        let sessions = InMemorySessionStore::new();
        let inventory = InMemoryInventoryStore::new();
        let discounts = InMemoryDiscountStore::new();
        let orders = InMemoryOrderStore::new();

        inventory
            .set_on_hand(VariantId::new("SKU-001"), 10)
            .await
            .unwrap();
        inventory
            .set_on_hand(VariantId::new("SKU-002"), 5)
            .await
            .unwrap();

        Fixture {
            orchestrator: CheckoutOrchestrator::new(
                sessions,
                inventory.clone(),
                discounts.clone(),
                orders.clone(),
                CheckoutConfig::default(),
            ),
            inventory,
            discounts,
            orders,
        }
    }

    fn lines() -> Vec<CartLine> {
        vec![
            CartLine::new("SKU-001", "Widget", Money::from_cents(1000), 2),
            CartLine::new("SKU-002", "Gadget", Money::from_cents(2500), 1),
        ]
    }

    fn discount() -> Discount {
        let now = Utc::now();
        Discount {
            id: DiscountId::new(),
            code: "SAVE10".to_string(),
            kind: DiscountKind::Percentage(10),
            active: true,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            max_redemptions: None,
            per_user_limit: None,
            min_order_amount: Money::zero(),
            scope_variants: vec![],
        }
    }

    async fn ready_session(f: &Fixture, method: PaymentMethod) -> CheckoutSession {
        let now = Utc::now();
        let session = f
            .orchestrator
            .create_session(CustomerId::new(), lines(), now)
            .await
            .unwrap();
        f.orchestrator
            .select_shipping(session.id, ShippingMethod::Standard, now)
            .await
            .unwrap();
        f.orchestrator
            .select_payment_method(session.id, method, now)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn place_creates_pending_order() {
        let f = fixture().await;
        let session = ready_session(&f, PaymentMethod::Gateway).await;
        let now = Utc::now();

        let confirmation = f.orchestrator.place(session.id, now).await.unwrap();
        assert_eq!(confirmation.order_status, OrderStatus::PendingPayment);
        assert_eq!(confirmation.payment_status, PaymentStatus::Pending);
        // 2 * 1000 + 2500 subtotal, plus 500 standard shipping.
        assert_eq!(confirmation.amount.cents(), 5000);

        let order = f.orchestrator.get_order(confirmation.order_id).await.unwrap();
        assert_eq!(order.reservation_ids.len(), 2);
        assert_eq!(
            f.inventory
                .active_reserved(&VariantId::new("SKU-001"), now)
                .await
                .unwrap(),
            2
        );

        let session = f.orchestrator.get_session(session.id).await.unwrap();
        assert_eq!(session.state, SessionState::Placed);
    }

    #[tokio::test]
    async fn cash_on_delivery_finalizes_at_placement() {
        let f = fixture().await;
        let session = ready_session(&f, PaymentMethod::CashOnDelivery).await;

        let confirmation = f.orchestrator.place(session.id, Utc::now()).await.unwrap();
        assert_eq!(confirmation.order_status, OrderStatus::Confirmed);
        assert_eq!(confirmation.payment_status, PaymentStatus::Captured);

        let order = f.orchestrator.get_order(confirmation.order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
        for id in &order.reservation_ids {
            let r = f.inventory.get(*id).await.unwrap().unwrap();
            assert_eq!(r.status, domain::ReservationStatus::Committed);
        }
    }

    #[tokio::test]
    async fn place_applies_discount_to_total() {
        let f = fixture().await;
        let d = discount();
        f.discounts.insert_discount(d.clone()).await.unwrap();

        let now = Utc::now();
        let session = f
            .orchestrator
            .create_session(CustomerId::new(), lines(), now)
            .await
            .unwrap();
        f.orchestrator
            .apply_discount(session.id, "SAVE10", now)
            .await
            .unwrap();
        f.orchestrator
            .select_shipping(session.id, ShippingMethod::Standard, now)
            .await
            .unwrap();
        f.orchestrator
            .select_payment_method(session.id, PaymentMethod::Gateway, now)
            .await
            .unwrap();

        let confirmation = f.orchestrator.place(session.id, now).await.unwrap();
        // 4500 subtotal - 450 discount + 500 shipping.
        assert_eq!(confirmation.amount.cents(), 4550);

        let order = f.orchestrator.get_order(confirmation.order_id).await.unwrap();
        assert_eq!(order.discount_amount.cents(), 450);
        assert_eq!(f.discounts.redemption_count(d.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn insufficient_stock_releases_partial_holds() {
        let f = fixture().await;
        let now = Utc::now();
        // SKU-002 only has 5 on hand.
        let session = f
            .orchestrator
            .create_session(
                CustomerId::new(),
                vec![
                    CartLine::new("SKU-001", "Widget", Money::from_cents(1000), 2),
                    CartLine::new("SKU-002", "Gadget", Money::from_cents(2500), 6),
                ],
                now,
            )
            .await
            .unwrap();
        f.orchestrator
            .select_shipping(session.id, ShippingMethod::Standard, now)
            .await
            .unwrap();
        f.orchestrator
            .select_payment_method(session.id, PaymentMethod::Gateway, now)
            .await
            .unwrap();

        let err = f.orchestrator.place(session.id, now).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");

        // The SKU-001 hold acquired before the failure was given back.
        assert_eq!(
            f.inventory
                .active_reserved(&VariantId::new("SKU-001"), now)
                .await
                .unwrap(),
            0
        );
        assert_eq!(f.orders.order_count().await, 0);
    }

    #[tokio::test]
    async fn cap_exhausted_at_place_releases_holds() {
        let f = fixture().await;
        let mut d = discount();
        d.max_redemptions = Some(0);
        f.discounts.insert_discount(d.clone()).await.unwrap();

        let now = Utc::now();
        let session = f
            .orchestrator
            .create_session(CustomerId::new(), lines(), now)
            .await
            .unwrap();
        // Applying succeeds (caps are only enforced at redemption).
        f.orchestrator
            .apply_discount(session.id, "SAVE10", now)
            .await
            .unwrap();
        f.orchestrator
            .select_shipping(session.id, ShippingMethod::Standard, now)
            .await
            .unwrap();
        f.orchestrator
            .select_payment_method(session.id, PaymentMethod::Gateway, now)
            .await
            .unwrap();

        let err = f.orchestrator.place(session.id, now).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
        assert_eq!(
            f.inventory
                .active_reserved(&VariantId::new("SKU-001"), now)
                .await
                .unwrap(),
            0
        );
        assert_eq!(f.orders.order_count().await, 0);
    }

    #[tokio::test]
    async fn expired_session_cannot_place_and_is_marked() {
        let f = fixture().await;
        let session = ready_session(&f, PaymentMethod::Gateway).await;

        let later = Utc::now() + Duration::minutes(31);
        let err = f.orchestrator.place(session.id, later).await.unwrap_err();
        assert_eq!(err.code(), "EXPIRED");

        let session = f.orchestrator.get_session(session.id).await.unwrap();
        assert_eq!(session.state, SessionState::Expired);
    }

    #[tokio::test]
    async fn unready_session_cannot_place() {
        let f = fixture().await;
        let now = Utc::now();
        let session = f
            .orchestrator
            .create_session(CustomerId::new(), lines(), now)
            .await
            .unwrap();

        let err = f.orchestrator.place(session.id, now).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn duplicate_variant_lines_are_merged() {
        let f = fixture().await;
        let now = Utc::now();
        let session = f
            .orchestrator
            .create_session(
                CustomerId::new(),
                vec![
                    CartLine::new("SKU-001", "Widget", Money::from_cents(1000), 3),
                    CartLine::new("SKU-001", "Widget", Money::from_cents(1000), 4),
                ],
                now,
            )
            .await
            .unwrap();
        f.orchestrator
            .select_shipping(session.id, ShippingMethod::Standard, now)
            .await
            .unwrap();
        f.orchestrator
            .select_payment_method(session.id, PaymentMethod::Gateway, now)
            .await
            .unwrap();

        let confirmation = f.orchestrator.place(session.id, now).await.unwrap();
        let order = f.orchestrator.get_order(confirmation.order_id).await.unwrap();
        // One merged hold of 7, not two holds.
        assert_eq!(order.reservation_ids.len(), 1);
        assert_eq!(
            f.inventory
                .active_reserved(&VariantId::new("SKU-001"), now)
                .await
                .unwrap(),
            7
        );
    }
}
