use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use common::{CustomerId, Money, OrderId, PaymentId, ReservationId, SessionId};
use domain::{CartLine, Order, OrderStatus, Payment, PaymentMethod, PaymentStatus};

use crate::error::{Result, StoreError};
use crate::orders::OrderStore;

/// PostgreSQL order and payment store.
///
/// Status updates are version-guarded `UPDATE ... WHERE version = $n`;
/// zero affected rows means another writer won and surfaces as
/// `VersionConflict`.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new store over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let lines: serde_json::Value = row.try_get("lines")?;
        let lines: Vec<CartLine> = serde_json::from_value(lines)?;
        let reservation_ids: serde_json::Value = row.try_get("reservation_ids")?;
        let reservation_ids: Vec<ReservationId> = serde_json::from_value(reservation_ids)?;
        let status: String = row.try_get("status")?;
        let status = match status.as_str() {
            "Confirmed" => OrderStatus::Confirmed,
            "Cancelled" => OrderStatus::Cancelled,
            _ => OrderStatus::PendingPayment,
        };

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            session_id: SessionId::from_uuid(row.try_get::<Uuid, _>("session_id")?),
            customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
            lines,
            subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
            discount_amount: Money::from_cents(row.try_get("discount_cents")?),
            shipping_fee: Money::from_cents(row.try_get("shipping_cents")?),
            total: Money::from_cents(row.try_get("total_cents")?),
            discount_code: row.try_get("discount_code")?,
            reservation_ids,
            status,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let method: String = row.try_get("method")?;
        let method = match method.as_str() {
            "cash_on_delivery" => PaymentMethod::CashOnDelivery,
            _ => PaymentMethod::Gateway,
        };
        let status: String = row.try_get("status")?;
        let status = match status.as_str() {
            "Captured" => PaymentStatus::Captured,
            "Failed" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        };

        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            amount: Money::from_cents(row.try_get("amount_cents")?),
            method,
            status,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            expire_at: row.try_get("expire_at")?,
        })
    }

    fn method_str(method: PaymentMethod) -> &'static str {
        match method {
            PaymentMethod::Gateway => "gateway",
            PaymentMethod::CashOnDelivery => "cash_on_delivery",
        }
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[tracing::instrument(skip(self, order, payment), fields(order_id = %order.id))]
    async fn insert(&self, order: Order, payment: Payment) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders
                (id, session_id, customer_id, lines, subtotal_cents, discount_cents,
                 shipping_cents, total_cents, discount_code, reservation_ids, status,
                 version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.session_id.as_uuid())
        .bind(order.customer_id.as_uuid())
        .bind(serde_json::to_value(&order.lines)?)
        .bind(order.subtotal.cents())
        .bind(order.discount_amount.cents())
        .bind(order.shipping_fee.cents())
        .bind(order.total.cents())
        .bind(&order.discount_code)
        .bind(serde_json::to_value(&order.reservation_ids)?)
        .bind(order.status.as_str())
        .bind(order.version)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO payments
                (id, order_id, amount_cents, method, status, version, created_at, expire_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.amount.cents())
        .bind(Self::method_str(payment.method))
        .bind(payment.status.as_str())
        .bind(payment.version)
        .bind(payment.created_at)
        .bind(payment.expire_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_order).transpose()
    }

    async fn get_payment_for_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let row = sqlx::query("SELECT * FROM payments WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_payment).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn update_payment_status(
        &self,
        id: PaymentId,
        status: PaymentStatus,
        expected_version: i64,
    ) -> Result<Payment> {
        let row = sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, version = version + 1
            WHERE id = $1 AND version = $3
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_payment(row),
            None => Err(StoreError::VersionConflict {
                entity: "payment",
                id: id.to_string(),
            }),
        }
    }

    async fn update_order_status(
        &self,
        id: OrderId,
        status: OrderStatus,
        expected_version: i64,
    ) -> Result<Order> {
        let row = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, version = version + 1
            WHERE id = $1 AND version = $3
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_order(row),
            None => Err(StoreError::VersionConflict {
                entity: "order",
                id: id.to_string(),
            }),
        }
    }

    async fn expired_pending_payments(&self, now: DateTime<Utc>) -> Result<Vec<Payment>> {
        let rows =
            sqlx::query("SELECT * FROM payments WHERE status = 'Pending' AND expire_at < $1")
                .bind(now)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Self::row_to_payment).collect()
    }
}
