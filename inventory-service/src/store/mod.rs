//! Persistence contract for products, reservations and the movement ledger.
//!
//! Each method that both checks availability and writes is a single atomic
//! operation at the storage layer. Callers orchestrate; they never read,
//! decide and write in separate steps.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::domain::{Movement, Product, Reservation};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::OwnerKey;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A product together with the quantity currently held against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductLevels {
    pub product: Product,
    /// Sum of active reservation quantities only.
    pub reserved: i32,
}

impl ProductLevels {
    pub fn available(&self) -> i32 {
        self.product.stock - self.reserved
    }
}

#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub product_id: Uuid,
    pub owner_key: OwnerKey,
    pub quantity: i32,
    pub reason: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved {
        reservation: Reservation,
        /// The hold this one replaced, if the owner already had one on the product.
        previous: Option<Reservation>,
        /// `None` for untracked products.
        available_after: Option<i32>,
    },
    Insufficient { requested: i32, available: i32 },
    Inactive,
    ProductMissing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtendOutcome {
    Extended(Reservation),
    Expired(Reservation),
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockChange {
    Increase(i32),
    Decrease(i32),
    /// Set stock to an absolute value.
    Adjust(i32),
}

#[derive(Debug, Clone)]
pub struct StockChangeRequest {
    pub product_id: Uuid,
    pub change: StockChange,
    pub reason: String,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockChangeOutcome {
    Applied { product: Product, movement: Movement },
    /// Decrease or adjust would push stock below the actively reserved quantity.
    Insufficient { requested: i32, available: i32 },
    ProductMissing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvertedLine {
    pub reservation: Reservation,
    /// Absent for untracked or vanished products.
    pub movement: Option<Movement>,
    pub product: Option<Product>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionOutcome {
    pub converted: Vec<ConvertedLine>,
    /// Holds of the owner that had lapsed; deleted without touching stock.
    pub expired: Vec<Reservation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub deleted: u64,
    pub product_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductReservationStats {
    pub product_id: Uuid,
    pub active_count: i64,
    pub reserved_quantity: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReservationStats {
    pub total_active: i64,
    pub total_quantity: i64,
    pub expiring_soon: i64,
    pub per_product: Vec<ProductReservationStats>,
}

impl ReservationStats {
    /// Aggregates already-filtered active holds; shared by both stores.
    pub(crate) fn from_active<'a>(
        active: impl IntoIterator<Item = &'a Reservation>,
        horizon: DateTime<Utc>,
    ) -> Self {
        let mut stats = Self::default();
        let mut per_product: BTreeMap<Uuid, ProductReservationStats> = BTreeMap::new();

        for reservation in active {
            stats.total_active += 1;
            stats.total_quantity += i64::from(reservation.quantity);
            if reservation.expires_at <= horizon {
                stats.expiring_soon += 1;
            }
            let entry = per_product
                .entry(reservation.product_id)
                .or_insert_with(|| ProductReservationStats {
                    product_id: reservation.product_id,
                    active_count: 0,
                    reserved_quantity: 0,
                });
            entry.active_count += 1;
            entry.reserved_quantity += i64::from(reservation.quantity);
        }

        stats.per_product = per_product.into_values().collect();
        stats
    }
}

#[derive(Debug, Clone)]
pub struct StoredReply {
    pub command_id: Uuid,
    pub reply: serde_json::Value,
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>>;

    /// Levels for each requested product that exists, reserved quantities filtered on `now`.
    async fn product_levels(&self, product_ids: &[Uuid], now: DateTime<Utc>) -> Result<Vec<ProductLevels>>;

    /// Tracked, active products whose stock is at or below their threshold.
    async fn low_stock_products(&self) -> Result<Vec<Product>>;

    /// Atomically checks availability and inserts or replaces the owner's hold.
    async fn try_reserve(&self, request: ReserveRequest, now: DateTime<Utc>) -> Result<ReserveOutcome>;

    async fn get_reservation(&self, reservation_id: Uuid) -> Result<Option<Reservation>>;

    async fn owner_reservations(&self, owner_key: &OwnerKey) -> Result<Vec<Reservation>>;

    async fn delete_reservation(&self, reservation_id: Uuid) -> Result<Option<Reservation>>;

    /// Deletes the owner's holds, or only the one on `product_id` when given.
    async fn delete_owner_reservations(
        &self,
        owner_key: &OwnerKey,
        product_id: Option<Uuid>,
    ) -> Result<Vec<Reservation>>;

    /// Moves the expiry of an active hold as [`extended_expiry`] decides.
    async fn extend_reservation(
        &self,
        reservation_id: Uuid,
        by: chrono::Duration,
        cap: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ExtendOutcome>;

    /// Turns every active hold of the owner into a stock decrement plus an OUT
    /// movement and deletes the holds, all or nothing.
    async fn convert_owner(&self, owner_key: &OwnerKey, reason: &str, now: DateTime<Utc>) -> Result<ConversionOutcome>;

    /// Applies a stock change and appends its movement in one step.
    async fn apply_stock_change(&self, request: StockChangeRequest, now: DateTime<Utc>) -> Result<StockChangeOutcome>;

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<SweepOutcome>;

    async fn reservation_stats(&self, now: DateTime<Utc>, horizon: DateTime<Utc>) -> Result<ReservationStats>;

    /// Newest first.
    async fn movements(&self, product_id: Uuid, limit: i64) -> Result<Vec<Movement>>;

    async fn find_processed_command(&self, idempotency_key: &str) -> Result<Option<StoredReply>>;

    async fn record_processed_command(
        &self,
        idempotency_key: &str,
        reply: StoredReply,
        now: DateTime<Utc>,
    ) -> Result<()>;
}

/// Computes the stock after `change`, or the rejection if it would leave
/// available stock negative. Untracked products are never rejected.
pub(crate) fn next_stock(
    product: &Product,
    reserved: i32,
    change: StockChange,
) -> std::result::Result<i32, (i32, i32)> {
    let available = product.stock - reserved;
    match change {
        StockChange::Increase(qty) => Ok(product.stock.saturating_add(qty)),
        StockChange::Decrease(qty) if !product.track_quantity => Ok((product.stock - qty).max(0)),
        StockChange::Decrease(qty) if qty > available => Err((qty, available)),
        StockChange::Decrease(qty) => Ok(product.stock - qty),
        StockChange::Adjust(target) if product.track_quantity && target < reserved => {
            Err((reserved, target))
        }
        StockChange::Adjust(target) => Ok(target),
    }
}

/// The expiry an extension by `by` produces: at most `cap`, and never earlier
/// than `current`.
pub(crate) fn extended_expiry(current: DateTime<Utc>, by: chrono::Duration, cap: DateTime<Utc>) -> DateTime<Utc> {
    current
        .checked_add_signed(by)
        .map_or(cap, |pushed| pushed.min(cap))
        .max(current)
}
