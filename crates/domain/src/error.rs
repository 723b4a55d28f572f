//! Domain error types.

use thiserror::Error;

/// Errors raised by domain-level validation and state machines.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Input failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// An entity was asked to make a transition its state machine forbids.
    #[error("Invalid {entity} state transition: {from} -> {to}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// The session or payment has expired.
    #[error("{0} has expired")]
    Expired(&'static str),

    /// A quantity was zero or otherwise unusable.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(u32),

    /// The cart has no lines.
    #[error("Cart is empty")]
    EmptyCart,
}
