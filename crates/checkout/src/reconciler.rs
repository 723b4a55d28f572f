//! Gateway notification handling.
//!
//! The gateway calls back with a signed outcome for a pending payment.
//! Applying that outcome races with duplicate notifications and with
//! the expiry sweep, so every status write is version-guarded and a
//! lost race degrades to reporting the already-final state.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, warn};

use common::{Money, OrderId};
use domain::{Order, OrderStatus, Payment, PaymentStatus};
use store::{InventoryStore, OrderStore, StoreError};

use crate::error::CheckoutError;
use crate::retry_transient;

type HmacSha256 = Hmac<Sha256>;

/// The outcome a gateway notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Success,
    Failure,
}

impl GatewayStatus {
    /// The wire form used in the signed message.
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayStatus::Success => "success",
            GatewayStatus::Failure => "failure",
        }
    }
}

/// Verifies HMAC-SHA256 signatures over gateway notifications.
///
/// The signed message is `"{order_id}.{amount_cents}.{status}"`, the
/// signature is lowercase hex.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl SignatureVerifier {
    /// Creates a verifier with the shared gateway secret.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Computes the signature for a notification (used by tests and by
    /// gateway simulators).
    pub fn sign(&self, order_id: OrderId, amount: Money, status: GatewayStatus) -> String {
        let mut mac = self.mac();
        mac.update(Self::message(order_id, amount, status).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Checks a hex signature in constant time.
    pub fn verify(
        &self,
        order_id: OrderId,
        amount: Money,
        status: GatewayStatus,
        signature: &str,
    ) -> bool {
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(Self::message(order_id, amount, status).as_bytes());
        mac.verify_slice(&provided).is_ok()
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts keys of any length")
    }

    fn message(order_id: OrderId, amount: Money, status: GatewayStatus) -> String {
        format!("{order_id}.{}.{}", amount.cents(), status.as_str())
    }
}

/// What applying a notification did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmOutcome {
    /// This notification transitioned the payment.
    Applied {
        order_status: OrderStatus,
        payment_status: PaymentStatus,
    },
    /// The payment was already final; nothing changed. Duplicate
    /// notifications land here, whichever channel they arrive on.
    AlreadyFinal {
        order_status: OrderStatus,
        payment_status: PaymentStatus,
    },
}

/// Applies gateway outcomes to pending payments.
pub struct PaymentReconciler<I, O> {
    inventory: I,
    orders: O,
    verifier: SignatureVerifier,
}

impl<I, O> PaymentReconciler<I, O>
where
    I: InventoryStore,
    O: OrderStore,
{
    /// Creates a reconciler over the given stores.
    pub fn new(inventory: I, orders: O, verifier: SignatureVerifier) -> Self {
        Self {
            inventory,
            orders,
            verifier,
        }
    }

    /// Applies a signed gateway notification.
    ///
    /// Signature and amount checks come before any state is touched; a
    /// mismatch on either is a security rejection, not a conflict.
    #[tracing::instrument(skip(self, signature))]
    pub async fn confirm(
        &self,
        order_id: OrderId,
        amount: Money,
        status: GatewayStatus,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome, CheckoutError> {
        if !self.verifier.verify(order_id, amount, status, signature) {
            metrics::counter!("gateway_signature_rejections_total").increment(1);
            warn!(%order_id, "gateway notification with invalid signature");
            return Err(CheckoutError::Security(
                "invalid notification signature".to_string(),
            ));
        }

        let payment = self.payment_for(order_id).await?;
        if payment.amount != amount {
            warn!(%order_id, expected = payment.amount.cents(), got = amount.cents(),
                "gateway notification with mismatched amount");
            return Err(CheckoutError::Security(
                "notification amount does not match the payment".to_string(),
            ));
        }

        if payment.status.is_terminal() {
            return self.already_final(order_id, payment.status).await;
        }

        if payment.is_expired(now) {
            // The window closed before the gateway answered. Expire the
            // payment so the outcome matches what the sweep would do.
            self.expire(&payment).await?;
            return Err(CheckoutError::Expired("payment"));
        }

        let target = match status {
            GatewayStatus::Success => PaymentStatus::Captured,
            GatewayStatus::Failure => PaymentStatus::Failed,
        };

        let updated = match self.transition_payment(&payment, target).await? {
            Some(p) => p,
            // Lost the version race to a duplicate or the sweep.
            None => {
                let payment = self.payment_for(order_id).await?;
                return self.already_final(order_id, payment.status).await;
            }
        };

        let order = self.order(order_id).await?;
        let order_status = match target {
            PaymentStatus::Captured => {
                for id in &order.reservation_ids {
                    retry_transient(|| self.inventory.commit(*id)).await?;
                }
                retry_transient(|| {
                    self.orders
                        .update_order_status(order_id, OrderStatus::Confirmed, order.version)
                })
                .await?
                .status
            }
            _ => {
                for id in &order.reservation_ids {
                    retry_transient(|| self.inventory.release(*id)).await?;
                }
                retry_transient(|| {
                    self.orders
                        .update_order_status(order_id, OrderStatus::Cancelled, order.version)
                })
                .await?
                .status
            }
        };

        metrics::counter!("gateway_notifications_applied_total", "status" => status.as_str())
            .increment(1);
        info!(%order_id, payment_status = %updated.status, %order_status, "gateway outcome applied");

        Ok(ConfirmOutcome::Applied {
            order_status,
            payment_status: updated.status,
        })
    }

    /// Reports the current payment state, expiring it lazily if the
    /// window elapsed while it was still pending.
    #[tracing::instrument(skip(self))]
    pub async fn check(
        &self,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<(Order, Payment), CheckoutError> {
        let payment = self.payment_for(order_id).await?;
        if payment.is_expired(now) {
            self.expire(&payment).await?;
        }
        let payment = self.payment_for(order_id).await?;
        let order = self.order(order_id).await?;
        Ok((order, payment))
    }

    /// Fails an expired pending payment, cancelling its order and
    /// releasing its holds. Tolerates losing the race to a concurrent
    /// writer. Also used by the sweep.
    pub(crate) async fn expire(&self, payment: &Payment) -> Result<(), CheckoutError> {
        match self.transition_payment(payment, PaymentStatus::Failed).await? {
            Some(_) => {}
            // Someone else finalized it first; their outcome stands.
            None => return Ok(()),
        }

        let order = self.order(payment.order_id).await?;
        for id in &order.reservation_ids {
            retry_transient(|| self.inventory.release(*id)).await?;
        }
        match self
            .orders
            .update_order_status(payment.order_id, OrderStatus::Cancelled, order.version)
            .await
        {
            Ok(_) => {
                metrics::counter!("payments_expired_total").increment(1);
                info!(order_id = %payment.order_id, "expired pending payment");
                Ok(())
            }
            Err(StoreError::VersionConflict { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Version-guarded payment transition. Returns `None` when another
    /// writer finalized the payment first.
    async fn transition_payment(
        &self,
        payment: &Payment,
        target: PaymentStatus,
    ) -> Result<Option<Payment>, CheckoutError> {
        match self
            .orders
            .update_payment_status(payment.id, target, payment.version)
            .await
        {
            Ok(p) => Ok(Some(p)),
            Err(StoreError::VersionConflict { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn already_final(
        &self,
        order_id: OrderId,
        payment_status: PaymentStatus,
    ) -> Result<ConfirmOutcome, CheckoutError> {
        metrics::counter!("gateway_duplicate_notifications_total").increment(1);
        let order = self.order(order_id).await?;
        Ok(ConfirmOutcome::AlreadyFinal {
            order_status: order.status,
            payment_status,
        })
    }

    async fn payment_for(&self, order_id: OrderId) -> Result<Payment, CheckoutError> {
        self.orders
            .get_payment_for_order(order_id)
            .await?
            .ok_or_else(|| CheckoutError::NotFound {
                entity: "payment",
                id: order_id.to_string(),
            })
    }

    async fn order(&self, order_id: OrderId) -> Result<Order, CheckoutError> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| CheckoutError::NotFound {
                entity: "order",
                id: order_id.to_string(),
            })
    }
}
