use common::VariantId;
use thiserror::Error;

/// Errors that can occur when interacting with the stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested quantity exceeds what is sellable right now.
    #[error("Insufficient stock for {variant_id}: requested {requested}, available {available}")]
    InsufficientStock {
        variant_id: VariantId,
        requested: u32,
        available: u32,
    },

    /// An optimistic version check failed; someone else updated the row.
    #[error("Version conflict on {entity} {id}")]
    VersionConflict { entity: &'static str, id: String },

    /// The row was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True for transient infrastructure failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
