//! Order and payment store with optimistic versioning.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use common::{OrderId, PaymentId};
use domain::{Order, OrderStatus, Payment, PaymentStatus};

use crate::error::{Result, StoreError};

/// Store for orders and their payments.
///
/// Status updates carry the expected version; a mismatch means another
/// writer got there first and surfaces as `VersionConflict`. That is
/// what makes duplicate payment confirmations lose cleanly.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts an order and its pending payment atomically.
    async fn insert(&self, order: Order, payment: Payment) -> Result<()>;

    /// Looks up an order.
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Looks up the payment attached to an order.
    async fn get_payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>>;

    /// Sets the payment status if the version still matches, bumping
    /// the version. Returns the updated payment.
    async fn update_payment_status(
        &self,
        id: PaymentId,
        status: PaymentStatus,
        expected_version: i64,
    ) -> Result<Payment>;

    /// Sets the order status if the version still matches, bumping the
    /// version. Returns the updated order.
    async fn update_order_status(
        &self,
        id: OrderId,
        status: OrderStatus,
        expected_version: i64,
    ) -> Result<Order>;

    /// Pending payments whose expiry window has elapsed (sweep input).
    async fn expired_pending_payments(&self, now: DateTime<Utc>) -> Result<Vec<Payment>>;
}

#[derive(Default)]
struct OrderState {
    orders: HashMap<OrderId, Order>,
    payments: HashMap<PaymentId, Payment>,
}

/// In-memory order store.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<OrderState>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of orders stored (test helper).
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order, payment: Payment) -> Result<()> {
        let mut state = self.state.write().await;
        state.orders.insert(order.id, order);
        state.payments.insert(payment.id, payment);
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn get_payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .values()
            .find(|p| p.order_id == order_id)
            .cloned())
    }

    async fn update_payment_status(
        &self,
        id: PaymentId,
        status: PaymentStatus,
        expected_version: i64,
    ) -> Result<Payment> {
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "payment",
                id: id.to_string(),
            })?;

        if payment.version != expected_version {
            return Err(StoreError::VersionConflict {
                entity: "payment",
                id: id.to_string(),
            });
        }

        payment.status = status;
        payment.version += 1;
        Ok(payment.clone())
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        status: OrderStatus,
        expected_version: i64,
    ) -> Result<Order> {
        let mut state = self.state.write().await;
        let order = state.orders.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            entity: "order",
            id: id.to_string(),
        })?;

        if order.version != expected_version {
            return Err(StoreError::VersionConflict {
                entity: "order",
                id: id.to_string(),
            });
        }

        order.status = status;
        order.version += 1;
        Ok(order.clone())
    }

    async fn expired_pending_payments(&self, now: DateTime<Utc>) -> Result<Vec<Payment>> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .values()
            .filter(|p| p.is_expired(now))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl<T: OrderStore + ?Sized> OrderStore for Arc<T> {
    async fn insert(&self, order: Order, payment: Payment) -> Result<()> {
        (**self).insert(order, payment).await
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        (**self).get_order(id).await
    }

    async fn get_payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        (**self).get_payment_for_order(order_id).await
    }

    async fn update_payment_status(
        &self,
        id: PaymentId,
        status: PaymentStatus,
        expected_version: i64,
    ) -> Result<Payment> {
        (**self).update_payment_status(id, status, expected_version).await
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        status: OrderStatus,
        expected_version: i64,
    ) -> Result<Order> {
        (**self).update_order_status(id, status, expected_version).await
    }

    async fn expired_pending_payments(&self, now: DateTime<Utc>) -> Result<Vec<Payment>> {
        (**self).expired_pending_payments(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::{CustomerId, Money, SessionId};
    use domain::{CartLine, PaymentMethod};

    fn order_with_payment() -> (Order, Payment) {
        let now = Utc::now();
        let order = Order {
            id: OrderId::new(),
            session_id: SessionId::new(),
            customer_id: CustomerId::new(),
            lines: vec![CartLine::new("SKU-001", "Widget", Money::from_cents(1000), 2)],
            subtotal: Money::from_cents(2000),
            discount_amount: Money::zero(),
            shipping_fee: Money::from_cents(500),
            total: Money::from_cents(2500),
            discount_code: None,
            reservation_ids: vec![],
            status: OrderStatus::PendingPayment,
            version: 1,
            created_at: now,
        };
        let payment = Payment::pending(
            order.id,
            order.total,
            PaymentMethod::Gateway,
            Duration::minutes(15),
            now,
        );
        (order, payment)
    }

    #[tokio::test]
    async fn insert_and_lookup() {
        let store = InMemoryOrderStore::new();
        let (order, payment) = order_with_payment();
        let (order_id, payment_id) = (order.id, payment.id);
        store.insert(order, payment).await.unwrap();

        assert!(store.get_order(order_id).await.unwrap().is_some());
        let found = store.get_payment_for_order(order_id).await.unwrap().unwrap();
        assert_eq!(found.id, payment_id);
        assert_eq!(found.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn versioned_payment_update() {
        let store = InMemoryOrderStore::new();
        let (order, payment) = order_with_payment();
        let payment_id = payment.id;
        store.insert(order, payment).await.unwrap();

        let updated = store
            .update_payment_status(payment_id, PaymentStatus::Captured, 1)
            .await
            .unwrap();
        assert_eq!(updated.version, 2);

        // The stale version loses.
        let err = store
            .update_payment_status(payment_id, PaymentStatus::Failed, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn versioned_order_update() {
        let store = InMemoryOrderStore::new();
        let (order, payment) = order_with_payment();
        let order_id = order.id;
        store.insert(order, payment).await.unwrap();

        let updated = store
            .update_order_status(order_id, OrderStatus::Confirmed, 1)
            .await
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Confirmed);
        assert_eq!(updated.version, 2);

        let err = store
            .update_order_status(order_id, OrderStatus::Cancelled, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn expired_pending_payments_listed() {
        let store = InMemoryOrderStore::new();
        let (order, mut payment) = order_with_payment();
        payment.expire_at = Utc::now() - Duration::minutes(1);
        let payment_id = payment.id;
        store.insert(order, payment).await.unwrap();

        let expired = store.expired_pending_payments(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, payment_id);

        // Terminal payments drop out of the sweep input.
        store
            .update_payment_status(payment_id, PaymentStatus::Failed, 1)
            .await
            .unwrap();
        assert!(store
            .expired_pending_payments(Utc::now())
            .await
            .unwrap()
            .is_empty());
    }
}
