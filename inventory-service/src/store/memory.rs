//! In-process store for tests and local runs.
//!
//! All product, reservation and ledger state sits behind one mutex, so every
//! trait method is a single critical section and therefore atomic.

use super::{
    extended_expiry, next_stock, ConversionOutcome, ConvertedLine, ExtendOutcome, InventoryStore, ProductLevels,
    ReservationStats, ReserveOutcome, ReserveRequest, StockChange, StockChangeOutcome,
    StockChangeRequest, StoredReply, SweepOutcome,
};
use crate::domain::{total_quantity, Movement, MovementType, Product, Reservation};
use crate::error::{InventoryError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use shared::OwnerKey;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryState {
    products: HashMap<Uuid, Product>,
    reservations: HashMap<Uuid, Reservation>,
    movements: Vec<Movement>,
}

impl MemoryState {
    fn reserved(&self, product_id: Uuid, now: DateTime<Utc>, excluding: Option<&OwnerKey>) -> i32 {
        let holds = self
            .reservations
            .values()
            .filter(|r| r.product_id == product_id && r.is_active(now))
            .filter(|r| excluding != Some(&r.owner_key))
            .map(|r| r.quantity);
        total_quantity(holds)
    }

    fn owner_hold(&self, owner_key: &OwnerKey, product_id: Uuid) -> Option<&Reservation> {
        self.reservations
            .values()
            .find(|r| r.product_id == product_id && &r.owner_key == owner_key)
    }

    /// Writes a new stock value, enforcing the version token.
    fn write_stock(&mut self, product_id: Uuid, expected_version: i64, stock: i32, now: DateTime<Utc>) -> Result<Product> {
        let product = self
            .products
            .get_mut(&product_id)
            .ok_or_else(|| InventoryError::not_found("product", product_id))?;
        if product.version != expected_version {
            return Err(InventoryError::Conflict(product_id));
        }
        product.stock = stock;
        product.version += 1;
        product.updated_at = now;
        Ok(product.clone())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    processed: DashMap<String, StoredReply>,
    fail_writes: AtomicBool,
    fail_lookups: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let store = Self::new();
        for product in products {
            store.insert_product(product);
        }
        store
    }

    /// Inserts or replaces a product row. Catalog management lives elsewhere;
    /// this exists for seeding.
    pub fn insert_product(&self, product: Product) {
        self.state.lock().products.insert(product.id, product);
    }

    /// Makes every stock-writing operation fail until switched off again.
    pub fn fail_stock_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes processed-command lookups fail until switched off again.
    pub fn fail_command_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(InventoryError::Internal("stock write rejected by store".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>> {
        Ok(self.state.lock().products.get(&product_id).cloned())
    }

    async fn product_levels(&self, product_ids: &[Uuid], now: DateTime<Utc>) -> Result<Vec<ProductLevels>> {
        let state = self.state.lock();
        let levels = product_ids
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|id| state.products.get(id))
            .map(|product| ProductLevels {
                product: product.clone(),
                reserved: state.reserved(product.id, now, None),
            })
            .collect();
        Ok(levels)
    }

    async fn low_stock_products(&self) -> Result<Vec<Product>> {
        let state = self.state.lock();
        let mut products: Vec<Product> = state
            .products
            .values()
            .filter(|p| p.track_quantity && p.is_active && p.stock <= p.low_stock_threshold)
            .cloned()
            .collect();
        products.sort_by_key(|p| (p.stock, p.id));
        Ok(products)
    }

    async fn try_reserve(&self, request: ReserveRequest, now: DateTime<Utc>) -> Result<ReserveOutcome> {
        let mut state = self.state.lock();

        let product = match state.products.get(&request.product_id) {
            Some(product) => product.clone(),
            None => return Ok(ReserveOutcome::ProductMissing),
        };
        if !product.is_active {
            return Ok(ReserveOutcome::Inactive);
        }

        // The owner's existing hold is replaced, not added to.
        let reserved = state.reserved(product.id, now, Some(&request.owner_key));
        let available = product.stock - reserved;
        if product.track_quantity && available < request.quantity {
            return Ok(ReserveOutcome::Insufficient {
                requested: request.quantity,
                available,
            });
        }

        let previous = state.owner_hold(&request.owner_key, product.id).cloned();
        let reservation = match &previous {
            Some(existing) => Reservation {
                quantity: request.quantity,
                reason: request.reason,
                expires_at: request.expires_at,
                updated_at: now,
                ..existing.clone()
            },
            None => Reservation {
                id: Uuid::new_v4(),
                product_id: product.id,
                owner_key: request.owner_key,
                quantity: request.quantity,
                reason: request.reason,
                expires_at: request.expires_at,
                created_at: now,
                updated_at: now,
            },
        };
        state.reservations.insert(reservation.id, reservation.clone());

        Ok(ReserveOutcome::Reserved {
            available_after: product
                .track_quantity
                .then(|| available - reservation.quantity),
            reservation,
            previous,
        })
    }

    async fn get_reservation(&self, reservation_id: Uuid) -> Result<Option<Reservation>> {
        Ok(self.state.lock().reservations.get(&reservation_id).cloned())
    }

    async fn owner_reservations(&self, owner_key: &OwnerKey) -> Result<Vec<Reservation>> {
        let state = self.state.lock();
        let mut holds: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| &r.owner_key == owner_key)
            .cloned()
            .collect();
        holds.sort_by_key(|r| (r.created_at, r.id));
        Ok(holds)
    }

    async fn delete_reservation(&self, reservation_id: Uuid) -> Result<Option<Reservation>> {
        Ok(self.state.lock().reservations.remove(&reservation_id))
    }

    async fn delete_owner_reservations(
        &self,
        owner_key: &OwnerKey,
        product_id: Option<Uuid>,
    ) -> Result<Vec<Reservation>> {
        let mut state = self.state.lock();
        let ids: Vec<Uuid> = state
            .reservations
            .values()
            .filter(|r| &r.owner_key == owner_key)
            .filter(|r| product_id.map_or(true, |p| r.product_id == p))
            .map(|r| r.id)
            .collect();
        Ok(ids
            .into_iter()
            .filter_map(|id| state.reservations.remove(&id))
            .collect())
    }

    async fn extend_reservation(
        &self,
        reservation_id: Uuid,
        by: chrono::Duration,
        cap: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ExtendOutcome> {
        let mut state = self.state.lock();
        let Some(reservation) = state.reservations.get_mut(&reservation_id) else {
            return Ok(ExtendOutcome::Missing);
        };
        if !reservation.is_active(now) {
            return Ok(ExtendOutcome::Expired(reservation.clone()));
        }
        reservation.expires_at = extended_expiry(reservation.expires_at, by, cap);
        reservation.updated_at = now;
        Ok(ExtendOutcome::Extended(reservation.clone()))
    }

    async fn convert_owner(&self, owner_key: &OwnerKey, reason: &str, now: DateTime<Utc>) -> Result<ConversionOutcome> {
        let mut state = self.state.lock();

        let mut holds: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| &r.owner_key == owner_key)
            .cloned()
            .collect();
        if holds.is_empty() {
            return Ok(ConversionOutcome::default());
        }
        holds.sort_by_key(|r| (r.product_id, r.id));
        self.check_writable()?;

        // Stage every write first so a failure leaves the holds in place.
        let mut staged: HashMap<Uuid, Product> = HashMap::new();
        let mut outcome = ConversionOutcome::default();
        let mut movements = Vec::new();

        for hold in holds {
            if !hold.is_active(now) {
                outcome.expired.push(hold);
                continue;
            }
            let current = match staged.get(&hold.product_id).or_else(|| state.products.get(&hold.product_id)) {
                Some(product) => product.clone(),
                None => {
                    tracing::warn!(reservation_id = %hold.id, product_id = %hold.product_id, "converting hold for missing product");
                    outcome.converted.push(ConvertedLine { reservation: hold, movement: None, product: None });
                    continue;
                }
            };
            if !current.track_quantity {
                outcome.converted.push(ConvertedLine { reservation: hold, movement: None, product: Some(current) });
                continue;
            }

            let new_stock = (current.stock - hold.quantity).max(0);
            let movement = Movement::record(
                current.id,
                MovementType::Out,
                current.stock,
                new_stock,
                reason,
                Some(owner_key.to_string()),
                now,
            );
            let updated = Product {
                stock: new_stock,
                version: current.version + 1,
                updated_at: now,
                ..current
            };
            staged.insert(updated.id, updated.clone());
            movements.push(movement.clone());
            outcome.converted.push(ConvertedLine { reservation: hold, movement: Some(movement), product: Some(updated) });
        }

        for product in staged.into_values() {
            state.products.insert(product.id, product);
        }
        state.movements.extend(movements);
        for id in outcome.converted.iter().map(|l| l.reservation.id).chain(outcome.expired.iter().map(|r| r.id)) {
            state.reservations.remove(&id);
        }

        Ok(outcome)
    }

    async fn apply_stock_change(&self, request: StockChangeRequest, now: DateTime<Utc>) -> Result<StockChangeOutcome> {
        let mut state = self.state.lock();
        let product = match state.products.get(&request.product_id) {
            Some(product) => product.clone(),
            None => return Ok(StockChangeOutcome::ProductMissing),
        };
        let reserved = state.reserved(product.id, now, None);
        let new_stock = match next_stock(&product, reserved, request.change) {
            Ok(stock) => stock,
            Err((requested, available)) => {
                return Ok(StockChangeOutcome::Insufficient { requested, available });
            }
        };
        self.check_writable()?;

        let movement_type = match request.change {
            StockChange::Increase(_) => MovementType::In,
            StockChange::Decrease(_) => MovementType::Out,
            StockChange::Adjust(_) => MovementType::Adjustment,
        };
        let updated = state.write_stock(product.id, product.version, new_stock, now)?;
        let movement = Movement::record(
            product.id,
            movement_type,
            product.stock,
            new_stock,
            request.reason,
            request.reference,
            now,
        );
        state.movements.push(movement.clone());

        Ok(StockChangeOutcome::Applied { product: updated, movement })
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<SweepOutcome> {
        let mut state = self.state.lock();
        let mut product_ids = BTreeSet::new();
        let before = state.reservations.len();
        state.reservations.retain(|_, r| {
            let stale = r.expires_at < now;
            if stale {
                product_ids.insert(r.product_id);
            }
            !stale
        });
        Ok(SweepOutcome {
            deleted: (before - state.reservations.len()) as u64,
            product_ids: product_ids.into_iter().collect(),
        })
    }

    async fn reservation_stats(&self, now: DateTime<Utc>, horizon: DateTime<Utc>) -> Result<ReservationStats> {
        let state = self.state.lock();
        Ok(ReservationStats::from_active(
            state.reservations.values().filter(|r| r.is_active(now)),
            horizon,
        ))
    }

    async fn movements(&self, product_id: Uuid, limit: i64) -> Result<Vec<Movement>> {
        let state = self.state.lock();
        Ok(state
            .movements
            .iter()
            .rev()
            .filter(|m| m.product_id == product_id)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn find_processed_command(&self, idempotency_key: &str) -> Result<Option<StoredReply>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(InventoryError::Internal("processed command lookup failed".into()));
        }
        Ok(self.processed.get(idempotency_key).map(|entry| entry.value().clone()))
    }

    async fn record_processed_command(
        &self,
        idempotency_key: &str,
        reply: StoredReply,
        _now: DateTime<Utc>,
    ) -> Result<()> {
        // First writer wins, as with the primary key in PostgreSQL.
        if let Entry::Vacant(entry) = self.processed.entry(idempotency_key.to_string()) {
            entry.insert(reply);
        }
        Ok(())
    }
}
