//! Stock availability queries.
//!
//! Available stock is authoritative stock minus the quantity of holds that
//! are still active at the time of the read. Queries never fail because a
//! product is missing; they report it as unavailable instead.

use crate::context::InventoryContext;
use crate::domain::Product;
use crate::error::{InventoryError, Result};
use crate::store::ProductLevels;
use serde::Serialize;
use shared::{ErrorKind, ItemQuantity};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub product_id: Uuid,
    pub requested: i32,
    pub available: bool,
    pub current_stock: i32,
    pub reserved_stock: i32,
    pub available_stock: i32,
    pub is_low_stock: bool,
    pub is_out_of_stock: bool,
    /// Units missing to satisfy `requested`; zero when available.
    pub shortfall: i32,
    /// Why the product cannot be sold, when it cannot.
    pub reason: Option<ErrorKind>,
}

impl Availability {
    pub fn missing(product_id: Uuid, requested: i32) -> Self {
        Self::unavailable(product_id, requested, ErrorKind::NotFound)
    }

    fn unavailable(product_id: Uuid, requested: i32, reason: ErrorKind) -> Self {
        Self {
            product_id,
            requested,
            available: false,
            current_stock: 0,
            reserved_stock: 0,
            available_stock: 0,
            is_low_stock: false,
            is_out_of_stock: false,
            shortfall: requested.max(0),
            reason: Some(reason),
        }
    }

    pub fn evaluate(levels: &ProductLevels, requested: i32) -> Self {
        Self::evaluate_after(levels, requested, 0)
    }

    /// Like [`Availability::evaluate`], with `claimed` units already spoken
    /// for by earlier lines of the same request.
    fn evaluate_after(levels: &ProductLevels, requested: i32, claimed: i32) -> Self {
        let product = &levels.product;
        let available_stock = levels.available().max(0);
        let remaining = available_stock.saturating_sub(claimed).max(0);

        if !product.track_quantity {
            return Self {
                product_id: product.id,
                requested,
                available: product.is_active,
                current_stock: product.stock,
                reserved_stock: levels.reserved,
                available_stock,
                is_low_stock: false,
                is_out_of_stock: false,
                shortfall: 0,
                reason: (!product.is_active).then_some(ErrorKind::ProductUnavailable),
            };
        }

        let shortfall = requested.saturating_sub(remaining).max(0);
        let (available, reason) = if !product.is_active {
            (false, Some(ErrorKind::ProductUnavailable))
        } else if shortfall > 0 {
            (false, Some(ErrorKind::InsufficientStock))
        } else {
            (true, None)
        };

        Self {
            product_id: product.id,
            requested,
            available,
            current_stock: product.stock,
            reserved_stock: levels.reserved,
            available_stock,
            is_low_stock: available_stock > 0 && available_stock <= product.low_stock_threshold,
            is_out_of_stock: available_stock <= 0,
            shortfall,
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkAvailability {
    pub all_available: bool,
    pub items: Vec<Availability>,
}

#[derive(Clone)]
pub struct AvailabilityService {
    ctx: InventoryContext,
}

impl AvailabilityService {
    pub fn new(ctx: InventoryContext) -> Self {
        Self { ctx }
    }

    pub async fn check_availability(&self, product_id: Uuid, quantity: i32) -> Result<Availability> {
        if quantity <= 0 {
            return Err(InventoryError::Validation(format!(
                "quantity must be positive, got {}",
                quantity
            )));
        }
        let now = self.ctx.now();
        let levels = self.ctx.store.product_levels(&[product_id], now).await?;
        Ok(match levels.first() {
            Some(levels) => Availability::evaluate(levels, quantity),
            None => Availability::missing(product_id, quantity),
        })
    }

    /// One read for the whole batch; a bad item only marks itself unavailable.
    ///
    /// Lines naming the same product draw from one pool: each is checked
    /// against what the earlier lines left over.
    pub async fn bulk_check_availability(&self, items: &[ItemQuantity]) -> Result<BulkAvailability> {
        let now = self.ctx.now();
        let ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        let levels: HashMap<Uuid, ProductLevels> = self
            .ctx
            .store
            .product_levels(&ids, now)
            .await?
            .into_iter()
            .map(|l| (l.product.id, l))
            .collect();

        let mut claimed: HashMap<Uuid, i32> = HashMap::new();
        let items: Vec<Availability> = items
            .iter()
            .map(|item| {
                if item.quantity <= 0 {
                    return Availability::unavailable(item.product_id, item.quantity, ErrorKind::Validation);
                }
                match levels.get(&item.product_id) {
                    Some(levels) => {
                        let earlier = claimed.entry(item.product_id).or_insert(0);
                        let availability = Availability::evaluate_after(levels, item.quantity, *earlier);
                        *earlier = earlier.saturating_add(item.quantity);
                        availability
                    }
                    None => Availability::missing(item.product_id, item.quantity),
                }
            })
            .collect();

        Ok(BulkAvailability {
            all_available: items.iter().all(|a| a.available),
            items,
        })
    }

    pub async fn low_stock_products(&self) -> Result<Vec<Product>> {
        self.ctx.store.low_stock_products().await
    }
}
