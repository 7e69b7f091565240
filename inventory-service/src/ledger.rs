use crate::context::InventoryContext;
use crate::domain::Movement;
use crate::error::{InventoryError, Result};
use uuid::Uuid;

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 500;

/// Read side of the append-only stock movement ledger.
#[derive(Clone)]
pub struct MovementLedger {
    ctx: InventoryContext,
}

impl MovementLedger {
    pub fn new(ctx: InventoryContext) -> Self {
        Self { ctx }
    }

    /// Newest movements first, at most `limit` of them.
    pub async fn history(&self, product_id: Uuid, limit: i64) -> Result<Vec<Movement>> {
        if limit <= 0 {
            return Err(InventoryError::Validation(format!("limit must be positive, got {}", limit)));
        }
        if self.ctx.store.get_product(product_id).await?.is_none() {
            return Err(InventoryError::not_found("product", product_id));
        }
        self.ctx.store.movements(product_id, limit.min(MAX_HISTORY_LIMIT)).await
    }
}
