use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use common::{ReservationId, VariantId};
use domain::{InventoryReservation, ReservationStatus};

use crate::error::{Result, StoreError};
use crate::inventory::InventoryStore;

/// PostgreSQL inventory store.
///
/// `reserve` takes a `FOR UPDATE` lock on the stock row, so the
/// availability check and the insert happen under one row lock and two
/// concurrent checkouts can never jointly oversell a variant.
#[derive(Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Creates a new store over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_reservation(row: PgRow) -> Result<InventoryReservation> {
        let status: String = row.try_get("status")?;
        let status = match status.as_str() {
            "Committed" => ReservationStatus::Committed,
            "Released" => ReservationStatus::Released,
            _ => ReservationStatus::Held,
        };
        Ok(InventoryReservation {
            id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            variant_id: VariantId::new(row.try_get::<String, _>("variant_id")?),
            scope_id: row.try_get("scope_id")?,
            quantity: row.try_get::<i32, _>("quantity")? as u32,
            status,
            reserved_at: row.try_get("reserved_at")?,
            hold_until: row.try_get("hold_until")?,
        })
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn set_on_hand(&self, variant_id: VariantId, quantity: u32) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory_stock (variant_id, on_hand)
            VALUES ($1, $2)
            ON CONFLICT (variant_id) DO UPDATE SET on_hand = EXCLUDED.on_hand
            "#,
        )
        .bind(variant_id.as_str())
        .bind(quantity as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, variant_id, hold, now), fields(variant = %variant_id))]
    async fn reserve(
        &self,
        variant_id: VariantId,
        quantity: u32,
        scope_id: Uuid,
        hold: Duration,
        now: DateTime<Utc>,
    ) -> Result<InventoryReservation> {
        let mut tx = self.pool.begin().await?;

        // Lock the stock row; all competing reservations for this
        // variant serialize here.
        let on_hand: Option<i32> =
            sqlx::query_scalar("SELECT on_hand FROM inventory_stock WHERE variant_id = $1 FOR UPDATE")
                .bind(variant_id.as_str())
                .fetch_optional(&mut *tx)
                .await?;
        let on_hand = on_hand.unwrap_or(0) as u32;

        let reserved: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT SUM(quantity) FROM inventory_reservations
            WHERE variant_id = $1
              AND (status = 'Committed' OR (status = 'Held' AND hold_until >= $2))
            "#,
        )
        .bind(variant_id.as_str())
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let reserved = reserved.unwrap_or(0) as u32;
        let available = on_hand.saturating_sub(reserved);

        if quantity > available {
            return Err(StoreError::InsufficientStock {
                variant_id,
                requested: quantity,
                available,
            });
        }

        let reservation = InventoryReservation::held(variant_id, scope_id, quantity, hold, now);
        sqlx::query(
            r#"
            INSERT INTO inventory_reservations (id, variant_id, scope_id, quantity, status, reserved_at, hold_until)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.variant_id.as_str())
        .bind(reservation.scope_id)
        .bind(reservation.quantity as i32)
        .bind(reservation.status.as_str())
        .bind(reservation.reserved_at)
        .bind(reservation.hold_until)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(reservation)
    }

    async fn commit(&self, id: ReservationId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM inventory_reservations WHERE id = $1 FOR UPDATE",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        match status.as_deref() {
            None => {
                return Err(StoreError::NotFound {
                    entity: "reservation",
                    id: id.to_string(),
                });
            }
            Some("Released") => {
                return Err(StoreError::VersionConflict {
                    entity: "reservation",
                    id: id.to_string(),
                });
            }
            Some("Committed") => {}
            _ => {
                sqlx::query("UPDATE inventory_reservations SET status = 'Committed' WHERE id = $1")
                    .bind(id.as_uuid())
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn release(&self, id: ReservationId) -> Result<()> {
        let released =
            sqlx::query("UPDATE inventory_reservations SET status = 'Released' WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await?
                .rows_affected();
        if released == 0 {
            return Err(StoreError::NotFound {
                entity: "reservation",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn get(&self, id: ReservationId) -> Result<Option<InventoryReservation>> {
        let row = sqlx::query("SELECT * FROM inventory_reservations WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_reservation).transpose()
    }

    async fn active_reserved(&self, variant_id: &VariantId, now: DateTime<Utc>) -> Result<u32> {
        let reserved: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT SUM(quantity) FROM inventory_reservations
            WHERE variant_id = $1
              AND (status = 'Committed' OR (status = 'Held' AND hold_until >= $2))
            "#,
        )
        .bind(variant_id.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(reserved.unwrap_or(0) as u32)
    }

    #[tracing::instrument(skip(self))]
    async fn release_expired(&self, now: DateTime<Utc>) -> Result<Vec<InventoryReservation>> {
        let rows = sqlx::query(
            r#"
            UPDATE inventory_reservations
            SET status = 'Released'
            WHERE status = 'Held' AND hold_until < $1
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }
}
