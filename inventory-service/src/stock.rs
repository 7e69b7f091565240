//! Authoritative stock mutations. Each applied change appends exactly one
//! movement in the same storage step.

use crate::context::InventoryContext;
use crate::domain::{Movement, Product};
use crate::error::{InventoryError, Result};
use crate::outcome::Rejection;
use crate::store::{StockChange, StockChangeOutcome, StockChangeRequest};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StockMutationOutcome {
    Applied { product: Product, movement: Movement },
    Rejected(Rejection),
}

impl StockMutationOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    pub fn product(&self) -> Option<&Product> {
        match self {
            Self::Applied { product, .. } => Some(product),
            Self::Rejected(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct StockService {
    ctx: InventoryContext,
}

impl StockService {
    pub fn new(ctx: InventoryContext) -> Self {
        Self { ctx }
    }

    pub async fn increase(
        &self,
        product_id: Uuid,
        quantity: i32,
        reason: &str,
        reference: Option<String>,
    ) -> Result<StockMutationOutcome> {
        require_positive(quantity)?;
        self.apply(product_id, StockChange::Increase(quantity), reason, reference).await
    }

    /// Rejected with `INSUFFICIENT_STOCK` if the decrement would eat into
    /// actively reserved units.
    pub async fn decrease(
        &self,
        product_id: Uuid,
        quantity: i32,
        reason: &str,
        reference: Option<String>,
    ) -> Result<StockMutationOutcome> {
        require_positive(quantity)?;
        self.apply(product_id, StockChange::Decrease(quantity), reason, reference).await
    }

    /// Sets stock to `new_stock`. A target below the actively reserved
    /// quantity is rejected.
    pub async fn adjust(
        &self,
        product_id: Uuid,
        new_stock: i32,
        reason: &str,
        reference: Option<String>,
    ) -> Result<StockMutationOutcome> {
        if new_stock < 0 {
            return Err(InventoryError::Validation(format!("stock cannot be negative, got {}", new_stock)));
        }
        self.apply(product_id, StockChange::Adjust(new_stock), reason, reference).await
    }

    async fn apply(
        &self,
        product_id: Uuid,
        change: StockChange,
        reason: &str,
        reference: Option<String>,
    ) -> Result<StockMutationOutcome> {
        let request = StockChangeRequest {
            product_id,
            change,
            reason: reason.to_string(),
            reference,
        };

        match self.ctx.store.apply_stock_change(request, self.ctx.now()).await? {
            StockChangeOutcome::Applied { product, movement } => {
                info!(
                    product_id = %product_id,
                    movement = %movement.movement_type,
                    quantity = movement.quantity,
                    previous_stock = movement.previous_stock,
                    new_stock = movement.new_stock,
                    reason,
                    "stock updated"
                );
                self.ctx.stock_changed(&product, movement.previous_stock).await;
                Ok(StockMutationOutcome::Applied { product, movement })
            }
            StockChangeOutcome::Insufficient { requested, available } => {
                info!(product_id = %product_id, change = ?change, requested, available, "stock change rejected");
                let rejection = match change {
                    StockChange::Adjust(target) => Rejection {
                        message: format!("{} units are reserved, cannot set stock to {}", requested, target),
                        ..Rejection::insufficient(product_id, requested, available)
                    },
                    _ => Rejection::insufficient(product_id, requested, available),
                };
                Ok(StockMutationOutcome::Rejected(rejection))
            }
            StockChangeOutcome::ProductMissing => Err(InventoryError::not_found("product", product_id)),
        }
    }
}

fn require_positive(quantity: i32) -> Result<()> {
    if quantity <= 0 {
        return Err(InventoryError::Validation(format!("quantity must be positive, got {}", quantity)));
    }
    Ok(())
}
