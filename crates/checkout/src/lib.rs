//! Checkout orchestration for exactly-once order placement.
//!
//! The flow is: client request → [`IdempotencyGuard`] →
//! [`CheckoutOrchestrator`] → {[`DiscountEngine`], inventory ledger} →
//! order and pending payment → gateway redirect →
//! [`PaymentReconciler`] (poll or push) → final order state.
//!
//! Three independent duplication sources are defused independently:
//! - client retries by the guard's key uniqueness
//! - inventory and discount contention by the store's atomic
//!   check-and-write calls
//! - duplicated gateway confirmations by the reconciler's
//!   `AlreadyFinal` short-circuit over a version-guarded transition

pub mod engine;
pub mod error;
pub mod guard;
pub mod orchestrator;
pub mod reconciler;
pub mod sweep;

pub use engine::DiscountEngine;
pub use error::CheckoutError;
pub use guard::{GuardOutcome, IdempotencyGuard};
pub use orchestrator::{CheckoutConfig, CheckoutOrchestrator, PlacementConfirmation};
pub use reconciler::{ConfirmOutcome, GatewayStatus, PaymentReconciler, SignatureVerifier};
pub use sweep::{SweepReport, Sweeper};

use std::future::Future;

use store::StoreError;

/// Retries a store call once when it fails with a transient
/// infrastructure error. Domain outcomes are never retried here.
pub(crate) async fn retry_transient<T, F, Fut>(mut call: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    match call().await {
        Err(e) if e.is_transient() => {
            tracing::warn!(error = %e, "transient store error, retrying once");
            call().await
        }
        other => other,
    }
}
