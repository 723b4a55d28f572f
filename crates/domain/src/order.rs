//! Order pricing snapshot and payment state machine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use common::{CustomerId, Money, OrderId, PaymentId, ReservationId, SessionId};

use crate::error::DomainError;
use crate::session::{CartLine, PaymentMethod};

/// The state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Waiting for the gateway to confirm payment.
    #[default]
    PendingPayment,

    /// Payment captured or cash-on-delivery accepted (terminal).
    Confirmed,

    /// Payment failed or expired; reservations released (terminal).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Cancelled)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "PendingPayment",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable pricing snapshot produced by a successful placement.
///
/// Only `status` and `version` ever change after creation; the lines
/// and amounts are frozen at placement time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub session_id: SessionId,
    pub customer_id: CustomerId,
    pub lines: Vec<CartLine>,
    pub subtotal: Money,
    pub discount_amount: Money,
    pub shipping_fee: Money,
    pub total: Money,
    pub discount_code: Option<String>,
    /// Reservations held for this order, committed on confirmation,
    /// released on cancellation.
    pub reservation_ids: Vec<ReservationId>,
    pub status: OrderStatus,
    /// Optimistic concurrency counter, bumped on every store update.
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Transitions the order to `Confirmed`.
    pub fn confirm(&mut self) -> Result<(), DomainError> {
        self.transition(OrderStatus::Confirmed)
    }

    /// Transitions the order to `Cancelled`.
    pub fn cancel(&mut self) -> Result<(), DomainError> {
        self.transition(OrderStatus::Cancelled)
    }

    fn transition(&mut self, to: OrderStatus) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidStateTransition {
                entity: "order",
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}

/// The state of a payment.
///
/// Transitions are monotonic: `Pending` moves exactly once to
/// `Captured` or `Failed` and never leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaymentStatus {
    #[default]
    Pending,
    Captured,
    Failed,
}

impl PaymentStatus {
    /// Returns true if the payment reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Captured | PaymentStatus::Failed)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Captured => "Captured",
            PaymentStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The single active payment attached to an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    /// Optimistic concurrency counter, bumped on every store update.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    /// Pending payments past this instant auto-fail.
    pub expire_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a pending payment for an order.
    pub fn pending(
        order_id: OrderId,
        amount: Money,
        method: PaymentMethod,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            order_id,
            amount,
            method,
            status: PaymentStatus::Pending,
            version: 1,
            created_at: now,
            expire_at: now + window,
        }
    }

    /// Returns true if a pending payment's window has elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Pending && now > self.expire_at
    }

    /// Transitions `Pending -> Captured`.
    pub fn capture(&mut self) -> Result<(), DomainError> {
        self.transition(PaymentStatus::Captured)
    }

    /// Transitions `Pending -> Failed`.
    pub fn fail(&mut self) -> Result<(), DomainError> {
        self.transition(PaymentStatus::Failed)
    }

    fn transition(&mut self, to: PaymentStatus) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidStateTransition {
                entity: "payment",
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}
