//! Checkout session state machine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use common::{CustomerId, Money, SessionId, VariantId};

use crate::error::DomainError;

/// The state of a checkout session in its lifecycle.
///
/// State transitions:
/// ```text
/// Draft ──► Priced ──► DiscountApplied ──► Ready ──► Placed
///             │              │               │
///             └──────────────┴───────────────┴──► Expired | Failed
/// ```
///
/// `Placed`, `Expired` and `Failed` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SessionState {
    /// Session exists but has no priced cart yet.
    #[default]
    Draft,

    /// Cart lines present, totals computed.
    Priced,

    /// A discount code has been validated and applied.
    DiscountApplied,

    /// Shipping and payment method selected, ready to place.
    Ready,

    /// An order was placed from this session (terminal).
    Placed,

    /// The session TTL elapsed before placement (terminal).
    Expired,

    /// Placement failed irrecoverably (terminal).
    Failed,
}

impl SessionState {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Placed | SessionState::Expired | SessionState::Failed
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Draft => "Draft",
            SessionState::Priced => "Priced",
            SessionState::DiscountApplied => "DiscountApplied",
            SessionState::Ready => "Ready",
            SessionState::Placed => "Placed",
            SessionState::Expired => "Expired",
            SessionState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hard ceiling on a single cart line's total, $100M in cents. Money
/// arithmetic saturates rather than wraps, so this bound keeps every
/// session total far away from the saturation point.
pub const MAX_LINE_TOTAL: Money = Money::from_cents(10_000_000_000);

/// One line of the cart snapshot carried by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// The product variant (SKU).
    pub variant_id: VariantId,
    /// Human-readable product name.
    pub name: String,
    /// Price per unit.
    pub unit_price: Money,
    /// Quantity ordered.
    pub quantity: u32,
}

impl CartLine {
    /// Creates a new cart line.
    pub fn new(
        variant_id: impl Into<VariantId>,
        name: impl Into<String>,
        unit_price: Money,
        quantity: u32,
    ) -> Self {
        Self {
            variant_id: variant_id.into(),
            name: name.into(),
            unit_price,
            quantity,
        }
    }

    /// Returns the total price for this line (quantity * unit price).
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Shipping method selected during checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingMethod {
    Standard,
    Express,
}

impl ShippingMethod {
    /// Returns the flat fee charged for this method.
    pub fn fee(&self) -> Money {
        match self {
            ShippingMethod::Standard => Money::from_cents(500),
            ShippingMethod::Express => Money::from_cents(1500),
        }
    }
}

/// Payment method selected during checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Pay through the external gateway; the order stays pending until
    /// the gateway confirms.
    Gateway,
    /// Pay on delivery; the order is confirmed at placement.
    CashOnDelivery,
}

/// An ephemeral, TTL-backed checkout session.
///
/// The session carries the cart snapshot and the customer's selections.
/// Totals are recomputed on every mutation so a stale price never
/// survives into `place`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: SessionId,
    pub customer_id: CustomerId,
    pub lines: Vec<CartLine>,
    pub discount_code: Option<String>,
    pub discount_amount: Money,
    pub shipping_method: Option<ShippingMethod>,
    pub payment_method: Option<PaymentMethod>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CheckoutSession {
    /// Creates a new session from a cart snapshot.
    ///
    /// Rejects empty carts and zero-quantity lines.
    pub fn new(
        customer_id: CustomerId,
        lines: Vec<CartLine>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if lines.is_empty() {
            return Err(DomainError::EmptyCart);
        }
        for line in &lines {
            if line.quantity == 0 {
                return Err(DomainError::InvalidQuantity(line.quantity));
            }
            if line.unit_price.is_negative() {
                return Err(DomainError::Validation(format!(
                    "negative unit price for {}",
                    line.variant_id
                )));
            }
            if line.line_total() > MAX_LINE_TOTAL {
                return Err(DomainError::Validation(format!(
                    "line total for {} exceeds the {MAX_LINE_TOTAL} maximum",
                    line.variant_id
                )));
            }
        }

        Ok(Self {
            id: SessionId::new(),
            customer_id,
            lines,
            discount_code: None,
            discount_amount: Money::zero(),
            shipping_method: None,
            payment_method: None,
            state: SessionState::Priced,
            created_at: now,
            expires_at: now + ttl,
        })
    }

    /// Returns true if the session TTL has elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Sum of all line totals before discount and shipping.
    pub fn subtotal(&self) -> Money {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    /// Shipping fee for the selected method, zero if none selected yet.
    pub fn shipping_fee(&self) -> Money {
        self.shipping_method.map(|m| m.fee()).unwrap_or_default()
    }

    /// Grand total: subtotal − discount + shipping fee.
    pub fn total(&self) -> Money {
        self.subtotal() - self.discount_amount + self.shipping_fee()
    }

    /// Fails with the appropriate error if the session cannot be mutated.
    ///
    /// An elapsed TTL is surfaced as `Expired` even before the sweep has
    /// marked the row, so expiry is enforced lazily on every access.
    pub fn ensure_active(&self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.state.is_terminal() {
            return Err(DomainError::InvalidStateTransition {
                entity: "session",
                from: self.state.to_string(),
                to: "mutation".to_string(),
            });
        }
        if self.is_expired(now) {
            return Err(DomainError::Expired("session"));
        }
        Ok(())
    }

    /// Records a validated discount on the session.
    pub fn apply_discount(
        &mut self,
        code: impl Into<String>,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_active(now)?;
        self.discount_code = Some(code.into());
        self.discount_amount = amount.min(self.subtotal());
        self.refresh_state();
        Ok(())
    }

    /// Removes any applied discount.
    pub fn remove_discount(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_active(now)?;
        self.discount_code = None;
        self.discount_amount = Money::zero();
        self.refresh_state();
        Ok(())
    }

    /// Selects the shipping method.
    pub fn select_shipping(
        &mut self,
        method: ShippingMethod,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_active(now)?;
        self.shipping_method = Some(method);
        self.refresh_state();
        Ok(())
    }

    /// Selects the payment method.
    pub fn select_payment_method(
        &mut self,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_active(now)?;
        self.payment_method = Some(method);
        self.refresh_state();
        Ok(())
    }

    /// Returns true if the session has everything `place` needs.
    pub fn is_placeable(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Marks the session placed (terminal).
    pub fn mark_placed(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_active(now)?;
        if !self.is_placeable() {
            return Err(DomainError::InvalidStateTransition {
                entity: "session",
                from: self.state.to_string(),
                to: SessionState::Placed.to_string(),
            });
        }
        self.state = SessionState::Placed;
        Ok(())
    }

    /// Marks the session expired (terminal). Idempotent.
    pub fn mark_expired(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Expired;
        }
    }

    /// Marks the session failed (terminal). Idempotent.
    pub fn mark_failed(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Failed;
        }
    }

    /// Recomputes the non-terminal state from the current selections.
    fn refresh_state(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = if self.shipping_method.is_some() && self.payment_method.is_some() {
            SessionState::Ready
        } else if self.discount_code.is_some() {
            SessionState::DiscountApplied
        } else {
            SessionState::Priced
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines() -> Vec<CartLine> {
        vec![
            CartLine::new("SKU-001", "Widget", Money::from_cents(1000), 2),
            CartLine::new("SKU-002", "Gadget", Money::from_cents(2500), 1),
        ]
    }

    fn session() -> CheckoutSession {
        CheckoutSession::new(CustomerId::new(), lines(), Duration::minutes(30), Utc::now()).unwrap()
    }

    #[test]
    fn new_session_is_priced() {
        let s = session();
        assert_eq!(s.state, SessionState::Priced);
        assert_eq!(s.subtotal().cents(), 4500);
        assert_eq!(s.total().cents(), 4500);
    }

    #[test]
    fn empty_cart_rejected() {
        let result = CheckoutSession::new(
            CustomerId::new(),
            vec![],
            Duration::minutes(30),
            Utc::now(),
        );
        assert!(matches!(result, Err(DomainError::EmptyCart)));
    }

    #[test]
    fn zero_quantity_rejected() {
        let result = CheckoutSession::new(
            CustomerId::new(),
            vec![CartLine::new("SKU-001", "Widget", Money::from_cents(100), 0)],
            Duration::minutes(30),
            Utc::now(),
        );
        assert!(matches!(result, Err(DomainError::InvalidQuantity(0))));
    }

    #[test]
    fn absurd_line_total_rejected() {
        let result = CheckoutSession::new(
            CustomerId::new(),
            vec![CartLine::new("SKU-001", "Widget", Money::from_cents(i64::MAX), 2)],
            Duration::minutes(30),
            Utc::now(),
        );
        assert!(matches!(result, Err(DomainError::Validation(_))));

        let result = CheckoutSession::new(
            CustomerId::new(),
            vec![CartLine::new(
                "SKU-001",
                "Widget",
                MAX_LINE_TOTAL,
                u32::MAX,
            )],
            Duration::minutes(30),
            Utc::now(),
        );
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn overflowing_line_total_saturates_instead_of_panicking() {
        let line = CartLine::new("SKU-001", "Widget", Money::from_cents(i64::MAX), 2);
        assert_eq!(line.line_total().cents(), i64::MAX);
    }

    #[test]
    fn discount_caps_at_subtotal() {
        let mut s = session();
        s.apply_discount("HUGE", Money::from_cents(99999), Utc::now())
            .unwrap();
        assert_eq!(s.discount_amount, s.subtotal());
        assert_eq!(s.state, SessionState::DiscountApplied);
    }

    #[test]
    fn selections_make_session_ready() {
        let now = Utc::now();
        let mut s = session();
        s.select_shipping(ShippingMethod::Standard, now).unwrap();
        assert_eq!(s.state, SessionState::Priced);
        s.select_payment_method(PaymentMethod::Gateway, now).unwrap();
        assert_eq!(s.state, SessionState::Ready);
        assert_eq!(s.total().cents(), 5000);
    }

    #[test]
    fn totals_recomputed_after_discount_removal() {
        let now = Utc::now();
        let mut s = session();
        s.apply_discount("SAVE10", Money::from_cents(450), now)
            .unwrap();
        assert_eq!(s.total().cents(), 4050);
        s.remove_discount(now).unwrap();
        assert_eq!(s.total().cents(), 4500);
        assert_eq!(s.state, SessionState::Priced);
    }

    #[test]
    fn expired_session_rejects_mutation() {
        let now = Utc::now();
        let mut s = session();
        let later = now + Duration::minutes(31);
        let result = s.select_shipping(ShippingMethod::Express, later);
        assert!(matches!(result, Err(DomainError::Expired("session"))));
    }

    #[test]
    fn place_requires_ready_state() {
        let now = Utc::now();
        let mut s = session();
        assert!(s.mark_placed(now).is_err());

        s.select_shipping(ShippingMethod::Standard, now).unwrap();
        s.select_payment_method(PaymentMethod::Gateway, now).unwrap();
        s.mark_placed(now).unwrap();
        assert_eq!(s.state, SessionState::Placed);

        // Terminal: no further mutations.
        assert!(s.select_shipping(ShippingMethod::Express, now).is_err());
    }

    #[test]
    fn mark_expired_is_idempotent_and_sticky() {
        let mut s = session();
        s.mark_expired();
        assert_eq!(s.state, SessionState::Expired);
        s.mark_failed();
        assert_eq!(s.state, SessionState::Expired);
    }
}
