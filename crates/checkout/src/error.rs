//! Checkout error taxonomy.
//!
//! Every error carries a stable code that survives into the HTTP error
//! body, so clients can branch on it without parsing messages.

use domain::DomainError;
use store::StoreError;
use thiserror::Error;

/// Errors surfaced by the checkout components.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Missing or malformed input.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Duplicate in-flight request, reservation unavailable, redemption
    /// cap reached, or a lost optimistic-version race.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Missing session, order, payment or discount.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Session, payment or hold expiry.
    #[error("{0} has expired")]
    Expired(&'static str),

    /// Signature or amount mismatch on a payment confirmation. Never
    /// safe to auto-retry.
    #[error("Security check failed: {0}")]
    Security(String),

    /// Infrastructure failure, surfaced generically after bounded retry.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckoutError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            CheckoutError::Validation(_) => "VALIDATION",
            CheckoutError::Conflict(_) => "CONFLICT",
            CheckoutError::NotFound { .. } => "NOT_FOUND",
            CheckoutError::Expired(_) => "EXPIRED",
            CheckoutError::Security(_) => "SECURITY",
            CheckoutError::Internal(_) => "INTERNAL",
        }
    }

    /// True if the client may safely retry the request.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CheckoutError::Security(_))
    }
}

impl From<StoreError> for CheckoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientStock {
                variant_id,
                requested,
                available,
            } => CheckoutError::Conflict(format!(
                "insufficient stock for {variant_id}: requested {requested}, available {available}"
            )),
            StoreError::VersionConflict { entity, id } => {
                CheckoutError::Conflict(format!("concurrent update on {entity} {id}"))
            }
            StoreError::NotFound { entity, id } => CheckoutError::NotFound { entity, id },
            StoreError::Database(e) => CheckoutError::Internal(e.to_string()),
            StoreError::Migration(e) => CheckoutError::Internal(e.to_string()),
            StoreError::Serialization(e) => CheckoutError::Internal(e.to_string()),
        }
    }
}

impl From<DomainError> for CheckoutError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => CheckoutError::Validation(msg),
            DomainError::InvalidQuantity(q) => {
                CheckoutError::Validation(format!("invalid quantity: {q}"))
            }
            DomainError::EmptyCart => CheckoutError::Validation("cart is empty".to_string()),
            DomainError::Expired(what) => CheckoutError::Expired(what),
            DomainError::InvalidStateTransition { entity, from, to } => CheckoutError::Conflict(
                format!("invalid {entity} state transition: {from} -> {to}"),
            ),
        }
    }
}

impl From<serde_json::Error> for CheckoutError {
    fn from(err: serde_json::Error) -> Self {
        CheckoutError::Internal(err.to_string())
    }
}
