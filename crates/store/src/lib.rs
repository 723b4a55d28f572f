//! Persistence layer for the checkout core.
//!
//! Each concern exposes a trait plus two implementations:
//! - an in-memory store (tokio `RwLock`) that simulates the database's
//!   uniqueness and locking guarantees, used by unit and property tests
//! - a PostgreSQL store (sqlx) where those guarantees come from real
//!   transactions, `FOR UPDATE` row locks and unique constraints
//!
//! The traits deliberately bundle check-and-write into single calls
//! (`reserve`, `redeem`, `insert_processing`, versioned updates) so an
//! implementation can make each call atomic. Callers never get a
//! read-then-write seam to race through.

pub mod discounts;
pub mod error;
pub mod idempotency;
pub mod inventory;
pub mod orders;
pub mod postgres;
pub mod sessions;

pub use discounts::{DiscountStore, InMemoryDiscountStore, RedeemOutcome};
pub use error::{Result, StoreError};
pub use idempotency::{IdempotencyStore, InMemoryIdempotencyStore, InsertOutcome};
pub use inventory::{InMemoryInventoryStore, InventoryStore};
pub use orders::{InMemoryOrderStore, OrderStore};
pub use postgres::{
    PostgresDiscountStore, PostgresIdempotencyStore, PostgresInventoryStore, PostgresOrderStore,
    PostgresSessionStore, run_migrations,
};
pub use sessions::{InMemorySessionStore, SessionStore};
