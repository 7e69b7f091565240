use crate::error::InventoryError;
use serde::Serialize;
use shared::ErrorKind;
use uuid::Uuid;

/// A recoverable refusal. Returned as a value, not an error, so batch
/// callers can keep processing the remaining items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub product_id: Uuid,
    pub kind: ErrorKind,
    pub requested: i32,
    pub available: i32,
    pub shortfall: i32,
    pub message: String,
}

impl Rejection {
    pub fn insufficient(product_id: Uuid, requested: i32, available: i32) -> Self {
        let available = available.max(0);
        Self {
            product_id,
            kind: ErrorKind::InsufficientStock,
            requested,
            available,
            shortfall: (requested - available).max(0),
            message: format!("only {} left", available),
        }
    }

    pub fn unavailable(product_id: Uuid, requested: i32) -> Self {
        Self::without_stock(product_id, requested, ErrorKind::ProductUnavailable, "product is not available for sale")
    }

    pub fn not_found(product_id: Uuid, requested: i32) -> Self {
        Self::without_stock(product_id, requested, ErrorKind::NotFound, "product not found")
    }

    pub fn from_error(product_id: Uuid, requested: i32, err: &InventoryError) -> Self {
        match err {
            InventoryError::InsufficientStock { requested, available, .. } => {
                Self::insufficient(product_id, *requested, *available)
            }
            other => Self::without_stock(product_id, requested, other.kind(), &other.to_string()),
        }
    }

    fn without_stock(product_id: Uuid, requested: i32, kind: ErrorKind, message: &str) -> Self {
        Self {
            product_id,
            kind,
            requested,
            available: 0,
            shortfall: 0,
            message: message.to_string(),
        }
    }
}
