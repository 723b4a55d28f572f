//! PostgreSQL-backed store implementations.
//!
//! All exactly-once guarantees come from the database: primary-key
//! uniqueness on idempotency keys, `FOR UPDATE` row locks around
//! availability and cap checks, the (discount, order) unique
//! constraint, and version-guarded `UPDATE ... WHERE version = $n`
//! statements.

mod discounts;
mod idempotency;
mod inventory;
mod orders;
mod sessions;

pub use discounts::PostgresDiscountStore;
pub use idempotency::PostgresIdempotencyStore;
pub use inventory::PostgresInventoryStore;
pub use orders::PostgresOrderStore;
pub use sessions::PostgresSessionStore;

use sqlx::PgPool;

use crate::error::Result;

/// Runs the workspace migrations against the given pool.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}
