//! Discount and redemption store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use common::{CustomerId, DiscountId, OrderId};
use domain::{Discount, DiscountRedemption};

use crate::error::{Result, StoreError};

/// Outcome of an atomic redemption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// A redemption row was inserted.
    Redeemed,
    /// This (discount, order) pair was already redeemed; no-op.
    AlreadyRedeemed,
    /// The global cap is exhausted.
    CapReached,
    /// This customer hit the per-user limit.
    PerUserCapReached,
}

/// Store for discounts and their redemption ledger.
///
/// `redeem` performs cap counting and the insert inside one atomic
/// boundary. Two concurrent orders can never both pass a cap check and
/// jointly exceed the cap.
#[async_trait]
pub trait DiscountStore: Send + Sync {
    /// Inserts a discount definition (seed/admin path).
    async fn insert_discount(&self, discount: Discount) -> Result<()>;

    /// Looks up a discount by its code.
    async fn get_by_code(&self, code: &str) -> Result<Option<Discount>>;

    /// Atomically checks the global and per-user caps and inserts one
    /// redemption row for (discount, order).
    async fn redeem(
        &self,
        discount: &Discount,
        order_id: OrderId,
        customer_id: CustomerId,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome>;

    /// Removes a redemption row (compensation when a placement fails
    /// after the redeem step).
    async fn remove_redemption(&self, discount_id: DiscountId, order_id: OrderId) -> Result<()>;

    /// Total redemptions recorded for a discount.
    async fn redemption_count(&self, discount_id: DiscountId) -> Result<u32>;
}

#[derive(Default)]
struct DiscountState {
    discounts: HashMap<DiscountId, Discount>,
    redemptions: Vec<DiscountRedemption>,
}

/// In-memory discount store.
#[derive(Clone, Default)]
pub struct InMemoryDiscountStore {
    state: Arc<RwLock<DiscountState>>,
}

impl InMemoryDiscountStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DiscountStore for InMemoryDiscountStore {
    async fn insert_discount(&self, discount: Discount) -> Result<()> {
        self.state
            .write()
            .await
            .discounts
            .insert(discount.id, discount);
        Ok(())
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<Discount>> {
        Ok(self
            .state
            .read()
            .await
            .discounts
            .values()
            .find(|d| d.code == code)
            .cloned())
    }

    async fn redeem(
        &self,
        discount: &Discount,
        order_id: OrderId,
        customer_id: CustomerId,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome> {
        // Single write-lock critical section: counting and inserting
        // under the same guard is what the Postgres store does with a
        // FOR UPDATE lock on the discount row.
        let mut state = self.state.write().await;

        if !state.discounts.contains_key(&discount.id) {
            return Err(StoreError::NotFound {
                entity: "discount",
                id: discount.id.to_string(),
            });
        }

        if state
            .redemptions
            .iter()
            .any(|r| r.discount_id == discount.id && r.order_id == order_id)
        {
            return Ok(RedeemOutcome::AlreadyRedeemed);
        }

        let total = state
            .redemptions
            .iter()
            .filter(|r| r.discount_id == discount.id)
            .count() as u32;
        if let Some(max) = discount.max_redemptions
            && total >= max
        {
            return Ok(RedeemOutcome::CapReached);
        }

        let by_user = state
            .redemptions
            .iter()
            .filter(|r| r.discount_id == discount.id && r.customer_id == customer_id)
            .count() as u32;
        if let Some(limit) = discount.per_user_limit
            && by_user >= limit
        {
            return Ok(RedeemOutcome::PerUserCapReached);
        }

        state.redemptions.push(DiscountRedemption {
            discount_id: discount.id,
            order_id,
            customer_id,
            redeemed_at: now,
        });
        Ok(RedeemOutcome::Redeemed)
    }

    async fn remove_redemption(&self, discount_id: DiscountId, order_id: OrderId) -> Result<()> {
        self.state
            .write()
            .await
            .redemptions
            .retain(|r| !(r.discount_id == discount_id && r.order_id == order_id));
        Ok(())
    }

    async fn redemption_count(&self, discount_id: DiscountId) -> Result<u32> {
        Ok(self
            .state
            .read()
            .await
            .redemptions
            .iter()
            .filter(|r| r.discount_id == discount_id)
            .count() as u32)
    }
}

#[async_trait]
impl<T: DiscountStore + ?Sized> DiscountStore for Arc<T> {
    async fn insert_discount(&self, discount: Discount) -> Result<()> {
        (**self).insert_discount(discount).await
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<Discount>> {
        (**self).get_by_code(code).await
    }

    async fn redeem(
        &self,
        discount: &Discount,
        order_id: OrderId,
        customer_id: CustomerId,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome> {
        (**self).redeem(discount, order_id, customer_id, now).await
    }

    async fn remove_redemption(&self, discount_id: DiscountId, order_id: OrderId) -> Result<()> {
        (**self).remove_redemption(discount_id, order_id).await
    }

    async fn redemption_count(&self, discount_id: DiscountId) -> Result<u32> {
        (**self).redemption_count(discount_id).await
    }
}
