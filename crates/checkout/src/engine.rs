//! Discount validation and atomic redemption.

use chrono::{DateTime, Utc};

use common::{CustomerId, Money, OrderId};
use domain::{CartLine, Discount};
use store::{DiscountStore, RedeemOutcome};

use crate::error::CheckoutError;

/// Validates discount codes and records redemptions.
///
/// Cap enforcement lives in the store's atomic `redeem`; `validate`
/// only performs the checks that need no transactional boundary.
pub struct DiscountEngine<D> {
    store: D,
}

impl<D: DiscountStore> DiscountEngine<D> {
    /// Creates a new engine over the given store.
    pub fn new(store: D) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &D {
        &self.store
    }

    /// Validates a code against a cart and computes the discount amount.
    #[tracing::instrument(skip(self, lines))]
    pub async fn validate(
        &self,
        code: &str,
        lines: &[CartLine],
        now: DateTime<Utc>,
    ) -> Result<(Discount, Money), CheckoutError> {
        let discount =
            self.store
                .get_by_code(code)
                .await?
                .ok_or_else(|| CheckoutError::NotFound {
                    entity: "discount",
                    id: code.to_string(),
                })?;

        if !discount.active {
            return Err(CheckoutError::Validation(format!(
                "discount {code} is inactive"
            )));
        }
        if now < discount.starts_at {
            return Err(CheckoutError::Validation(format!(
                "discount {code} is not yet active"
            )));
        }
        if now > discount.ends_at {
            return Err(CheckoutError::Validation(format!(
                "discount {code} has ended"
            )));
        }
        if !discount.applies_to(lines) {
            return Err(CheckoutError::Validation(format!(
                "discount {code} does not apply to any item in the cart"
            )));
        }

        let subtotal: Money = lines.iter().map(CartLine::line_total).sum();
        if subtotal < discount.min_order_amount {
            return Err(CheckoutError::Validation(format!(
                "order subtotal {subtotal} is below the {} minimum for {code}",
                discount.min_order_amount
            )));
        }

        let amount = discount.amount_for(subtotal);
        Ok((discount, amount))
    }

    /// Records one redemption for (discount, order).
    ///
    /// The global cap, the per-user cap and the (discount, order)
    /// uniqueness are all enforced inside the store's transaction; a
    /// retried redemption for the same order is a no-op.
    #[tracing::instrument(skip(self, discount), fields(code = %discount.code))]
    pub async fn redeem(
        &self,
        discount: &Discount,
        order_id: OrderId,
        customer_id: CustomerId,
        now: DateTime<Utc>,
    ) -> Result<(), CheckoutError> {
        match self.store.redeem(discount, order_id, customer_id, now).await? {
            RedeemOutcome::Redeemed => {
                metrics::counter!("discount_redemptions_total").increment(1);
                Ok(())
            }
            RedeemOutcome::AlreadyRedeemed => Ok(()),
            RedeemOutcome::CapReached => Err(CheckoutError::Conflict(format!(
                "discount {} has reached its redemption cap",
                discount.code
            ))),
            RedeemOutcome::PerUserCapReached => Err(CheckoutError::Conflict(format!(
                "per-user redemption limit reached for discount {}",
                discount.code
            ))),
        }
    }

    /// Compensation: removes a redemption recorded for a placement that
    /// later failed.
    pub async fn unredeem(
        &self,
        discount: &Discount,
        order_id: OrderId,
    ) -> Result<(), CheckoutError> {
        self.store.remove_redemption(discount.id, order_id).await?;
        Ok(())
    }
}
