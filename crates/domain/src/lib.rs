//! Domain layer for the checkout core.
//!
//! This crate provides the pure domain types and state machines:
//! - Checkout session lifecycle with cart lines and computed totals
//! - Order pricing snapshot and monotonic payment state machine
//! - Time-bounded inventory reservations
//! - Discount definitions and redemption records
//! - Idempotency records for at-most-once request execution
//!
//! Nothing in this crate performs I/O; persistence lives in the
//! `store` crate and coordination in the `checkout` crate.

pub mod discount;
pub mod error;
pub mod idempotency;
pub mod order;
pub mod reservation;
pub mod session;

pub use common::{
    CustomerId, DiscountId, Money, OrderId, PaymentId, ReservationId, SessionId, VariantId,
};
pub use discount::{Discount, DiscountKind, DiscountRedemption};
pub use error::DomainError;
pub use idempotency::{IdempotencyRecord, IdempotencyStatus, scope_hash};
pub use order::{Order, OrderStatus, Payment, PaymentStatus};
pub use reservation::{InventoryReservation, ReservationStatus};
pub use session::{
    CartLine, CheckoutSession, MAX_LINE_TOTAL, PaymentMethod, SessionState, ShippingMethod,
};
