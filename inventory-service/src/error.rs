//! Error types for inventory operations.

use diesel_async::pooled_connection::PoolError;
use shared::ErrorKind;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T, E = InventoryError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum InventoryError {
    /// Bad quantity, id or duration supplied by the caller
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Reservation exists but its hold has already lapsed
    #[error("reservation {0} has expired")]
    ReservationExpired(Uuid),

    #[error("insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("product {0} is unavailable")]
    ProductUnavailable(Uuid),

    /// Optimistic version check on a product row lost a race
    #[error("concurrent modification of product {0}")]
    Conflict(Uuid),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl InventoryError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } | Self::ReservationExpired(_) => ErrorKind::NotFound,
            Self::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            Self::ProductUnavailable(_) => ErrorKind::ProductUnavailable,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Database(_) | Self::Pool(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict | ErrorKind::Internal)
    }
}

impl From<bb8::RunError<PoolError>> for InventoryError {
    fn from(err: bb8::RunError<PoolError>) -> Self {
        Self::Pool(err.to_string())
    }
}
