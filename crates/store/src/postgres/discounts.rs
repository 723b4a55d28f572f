use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use common::{CustomerId, DiscountId, Money, OrderId, VariantId};
use domain::{Discount, DiscountKind};

use crate::discounts::{DiscountStore, RedeemOutcome};
use crate::error::{Result, StoreError};

/// PostgreSQL discount store.
///
/// `redeem` locks the discount row with `FOR UPDATE` so cap counting
/// and the insert are one atomic unit; the (discount, order) primary
/// key additionally makes retried redemptions no-ops.
#[derive(Clone)]
pub struct PostgresDiscountStore {
    pool: PgPool,
}

impl PostgresDiscountStore {
    /// Creates a new store over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_discount(row: PgRow) -> Result<Discount> {
        let kind: serde_json::Value = row.try_get("kind")?;
        let kind: DiscountKind = serde_json::from_value(kind)?;
        let scope: serde_json::Value = row.try_get("scope_variants")?;
        let scope_variants: Vec<VariantId> = serde_json::from_value(scope)?;

        Ok(Discount {
            id: DiscountId::from_uuid(row.try_get::<Uuid, _>("id")?),
            code: row.try_get("code")?,
            kind,
            active: row.try_get("active")?,
            starts_at: row.try_get("starts_at")?,
            ends_at: row.try_get("ends_at")?,
            max_redemptions: row
                .try_get::<Option<i32>, _>("max_redemptions")?
                .map(|v| v as u32),
            per_user_limit: row
                .try_get::<Option<i32>, _>("per_user_limit")?
                .map(|v| v as u32),
            min_order_amount: Money::from_cents(row.try_get("min_order_cents")?),
            scope_variants,
        })
    }
}

#[async_trait]
impl DiscountStore for PostgresDiscountStore {
    async fn insert_discount(&self, discount: Discount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO discounts
                (id, code, kind, active, starts_at, ends_at, max_redemptions,
                 per_user_limit, min_order_cents, scope_variants)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(discount.id.as_uuid())
        .bind(&discount.code)
        .bind(serde_json::to_value(discount.kind)?)
        .bind(discount.active)
        .bind(discount.starts_at)
        .bind(discount.ends_at)
        .bind(discount.max_redemptions.map(|v| v as i32))
        .bind(discount.per_user_limit.map(|v| v as i32))
        .bind(discount.min_order_amount.cents())
        .bind(serde_json::to_value(&discount.scope_variants)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<Discount>> {
        let row = sqlx::query("SELECT * FROM discounts WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_discount).transpose()
    }

    #[tracing::instrument(skip(self, discount, now), fields(code = %discount.code))]
    async fn redeem(
        &self,
        discount: &Discount,
        order_id: OrderId,
        customer_id: CustomerId,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome> {
        let mut tx = self.pool.begin().await?;

        // Serialize all redemptions of this code on the discount row.
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM discounts WHERE id = $1 FOR UPDATE")
                .bind(discount.id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StoreError::NotFound {
                entity: "discount",
                id: discount.id.to_string(),
            });
        }

        let already: Option<Uuid> = sqlx::query_scalar(
            "SELECT order_id FROM discount_redemptions WHERE discount_id = $1 AND order_id = $2",
        )
        .bind(discount.id.as_uuid())
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        if already.is_some() {
            return Ok(RedeemOutcome::AlreadyRedeemed);
        }

        if let Some(max) = discount.max_redemptions {
            let total: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM discount_redemptions WHERE discount_id = $1",
            )
            .bind(discount.id.as_uuid())
            .fetch_one(&mut *tx)
            .await?;
            if total as u32 >= max {
                return Ok(RedeemOutcome::CapReached);
            }
        }

        if let Some(limit) = discount.per_user_limit {
            let by_user: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM discount_redemptions WHERE discount_id = $1 AND customer_id = $2",
            )
            .bind(discount.id.as_uuid())
            .bind(customer_id.as_uuid())
            .fetch_one(&mut *tx)
            .await?;
            if by_user as u32 >= limit {
                return Ok(RedeemOutcome::PerUserCapReached);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO discount_redemptions (discount_id, order_id, customer_id, redeemed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT ON CONSTRAINT unique_discount_order DO NOTHING
            "#,
        )
        .bind(discount.id.as_uuid())
        .bind(order_id.as_uuid())
        .bind(customer_id.as_uuid())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(RedeemOutcome::Redeemed)
    }

    async fn remove_redemption(&self, discount_id: DiscountId, order_id: OrderId) -> Result<()> {
        sqlx::query(
            "DELETE FROM discount_redemptions WHERE discount_id = $1 AND order_id = $2",
        )
        .bind(discount_id.as_uuid())
        .bind(order_id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn redemption_count(&self, discount_id: DiscountId) -> Result<u32> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM discount_redemptions WHERE discount_id = $1")
                .bind(discount_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u32)
    }
}
