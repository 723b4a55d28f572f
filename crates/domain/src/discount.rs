//! Discount definitions and redemption records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::{CustomerId, DiscountId, Money, OrderId, VariantId};

use crate::session::CartLine;

/// How a discount reduces the subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    /// Percentage of the subtotal (0-100).
    Percentage(u32),
    /// A fixed amount, capped at the subtotal.
    FixedAmount(Money),
}

/// A discount code with usage caps and an optional product scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discount {
    pub id: DiscountId,
    pub code: String,
    pub kind: DiscountKind,
    pub active: bool,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Global cap on redemptions; `None` means unlimited.
    pub max_redemptions: Option<u32>,
    /// Cap per customer; `None` means unlimited.
    pub per_user_limit: Option<u32>,
    /// Minimum subtotal required to use the code.
    pub min_order_amount: Money,
    /// Variants the code applies to. Empty means the code is global.
    pub scope_variants: Vec<VariantId>,
}

impl Discount {
    /// Returns true if the code's time window covers `now` and it is active.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active && now >= self.starts_at && now <= self.ends_at
    }

    /// Returns true if the discount applies to the given cart.
    ///
    /// Global discounts (empty scope) always apply; scoped discounts
    /// need at least one matching line.
    pub fn applies_to(&self, lines: &[CartLine]) -> bool {
        self.scope_variants.is_empty()
            || lines
                .iter()
                .any(|l| self.scope_variants.contains(&l.variant_id))
    }

    /// Computes the discount amount for a subtotal, capped at the subtotal.
    pub fn amount_for(&self, subtotal: Money) -> Money {
        let raw = match self.kind {
            DiscountKind::Percentage(p) => subtotal.percentage(p.min(100)),
            DiscountKind::FixedAmount(m) => m,
        };
        raw.min(subtotal)
    }
}

/// One recorded use of a discount code.
///
/// Unique on (discount, order); counted toward both the global and the
/// per-user caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountRedemption {
    pub discount_id: DiscountId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub redeemed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn discount(kind: DiscountKind) -> Discount {
        let now = Utc::now();
        Discount {
            id: DiscountId::new(),
            code: "SAVE10".to_string(),
            kind,
            active: true,
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            max_redemptions: Some(100),
            per_user_limit: Some(1),
            min_order_amount: Money::zero(),
            scope_variants: vec![],
        }
    }

    #[test]
    fn live_window() {
        let d = discount(DiscountKind::Percentage(10));
        assert!(d.is_live(Utc::now()));
        assert!(!d.is_live(Utc::now() + Duration::days(2)));
        assert!(!d.is_live(Utc::now() - Duration::days(2)));

        let mut inactive = discount(DiscountKind::Percentage(10));
        inactive.active = false;
        assert!(!inactive.is_live(Utc::now()));
    }

    #[test]
    fn global_discount_applies_to_any_cart() {
        let d = discount(DiscountKind::Percentage(10));
        let lines = vec![CartLine::new("SKU-001", "Widget", Money::from_cents(100), 1)];
        assert!(d.applies_to(&lines));
    }

    #[test]
    fn scoped_discount_requires_matching_line() {
        let mut d = discount(DiscountKind::Percentage(10));
        d.scope_variants = vec![VariantId::new("SKU-777")];

        let other = vec![CartLine::new("SKU-001", "Widget", Money::from_cents(100), 1)];
        assert!(!d.applies_to(&other));

        let matching = vec![
            CartLine::new("SKU-001", "Widget", Money::from_cents(100), 1),
            CartLine::new("SKU-777", "Gizmo", Money::from_cents(200), 1),
        ];
        assert!(d.applies_to(&matching));
    }

    #[test]
    fn percentage_amount() {
        let d = discount(DiscountKind::Percentage(10));
        assert_eq!(d.amount_for(Money::from_cents(4500)).cents(), 450);
    }

    #[test]
    fn fixed_amount_capped_at_subtotal() {
        let d = discount(DiscountKind::FixedAmount(Money::from_cents(2000)));
        assert_eq!(d.amount_for(Money::from_cents(4500)).cents(), 2000);
        assert_eq!(d.amount_for(Money::from_cents(1500)).cents(), 1500);
    }

    #[test]
    fn percentage_over_100_clamped() {
        let d = discount(DiscountKind::Percentage(150));
        assert_eq!(d.amount_for(Money::from_cents(1000)).cents(), 1000);
    }
}
