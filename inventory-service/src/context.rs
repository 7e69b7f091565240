use crate::alerts::{threshold_crossing, AlertPublisher, NoopAlertPublisher};
use crate::cache::{keys_for, CacheInvalidator, NoopCache};
use crate::clock::{Clock, SystemClock};
use crate::domain::Product;
use crate::store::InventoryStore;
use chrono::{DateTime, Utc};
use shared::StockAlert;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Collaborators shared by every service.
#[derive(Clone)]
pub struct InventoryContext {
    pub store: Arc<dyn InventoryStore>,
    pub clock: Arc<dyn Clock>,
    pub alerts: Arc<dyn AlertPublisher>,
    pub cache: Arc<dyn CacheInvalidator>,
}

impl InventoryContext {
    pub fn new(store: Arc<dyn InventoryStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            alerts: Arc::new(NoopAlertPublisher),
            cache: Arc::new(NoopCache),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertPublisher>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheInvalidator>) -> Self {
        self.cache = cache;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Drops cached views of the given products. Failures are logged only.
    pub async fn invalidate(&self, product_ids: &[Uuid]) {
        let keys = keys_for(product_ids);
        if keys.is_empty() {
            return;
        }
        if let Err(e) = self.cache.invalidate(&keys).await {
            warn!(error = %e, keys = ?keys, "cache invalidation failed");
        }
    }

    /// Follow-up after a committed stock write: alert on threshold crossings
    /// and invalidate caches. Never fails the mutation that triggered it.
    pub async fn stock_changed(&self, product: &Product, previous_stock: i32) {
        if product.track_quantity {
            if let Some(kind) = threshold_crossing(previous_stock, product.stock, product.low_stock_threshold) {
                let alert = StockAlert {
                    kind,
                    product_id: product.id,
                    current_stock: product.stock,
                    threshold: product.low_stock_threshold,
                    raised_at: self.now(),
                };
                info!(product_id = %product.id, kind = ?kind, stock = product.stock, "stock threshold crossed");
                if let Err(e) = self.alerts.notify(alert).await {
                    warn!(product_id = %product.id, error = %e, "failed to publish stock alert");
                }
            }
        }
        self.invalidate(&[product.id]).await;
    }
}
