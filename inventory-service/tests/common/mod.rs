#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use inventory_service::alerts::AlertPublisher;
use inventory_service::cache::CacheInvalidator;
use inventory_service::clock::ManualClock;
use inventory_service::domain::Product;
use inventory_service::store::{InventoryStore, MemoryStore};
use inventory_service::{Inventory, InventoryConfig, InventoryContext};
use parking_lot::Mutex;
use shared::{OwnerKey, StockAlert};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default)]
pub struct RecordingAlerts {
    pub sent: Mutex<Vec<StockAlert>>,
}

#[async_trait]
impl AlertPublisher for RecordingAlerts {
    async fn notify(&self, alert: StockAlert) -> anyhow::Result<()> {
        self.sent.lock().push(alert);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingCache {
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl CacheInvalidator for RecordingCache {
    async fn invalidate(&self, keys: &[String]) -> anyhow::Result<()> {
        self.deleted.lock().extend(keys.iter().cloned());
        Ok(())
    }
}

pub struct Harness {
    pub inventory: Inventory,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub alerts: Arc<RecordingAlerts>,
    pub cache: Arc<RecordingCache>,
}

impl Harness {
    pub fn new(products: impl IntoIterator<Item = Product>) -> Self {
        let store = Arc::new(MemoryStore::with_products(products));
        let clock = Arc::new(ManualClock::new(start()));
        let alerts = Arc::new(RecordingAlerts::default());
        let cache = Arc::new(RecordingCache::default());

        let ctx = InventoryContext::new(store.clone())
            .with_clock(clock.clone())
            .with_alerts(alerts.clone())
            .with_cache(cache.clone());

        Self {
            inventory: Inventory::new(ctx, InventoryConfig::default()),
            store,
            clock,
            alerts,
            cache,
        }
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(chrono::Duration::minutes(minutes));
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inventory.context().now()
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        self.store
            .get_product(product_id)
            .await
            .unwrap()
            .map(|p| p.stock)
            .unwrap_or_default()
    }
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn product(stock: i32, threshold: i32) -> Product {
    Product::new(Uuid::new_v4(), stock, threshold, start())
}

pub fn cart(id: &str) -> OwnerKey {
    OwnerKey::Cart(id.to_string())
}
