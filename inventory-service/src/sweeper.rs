use crate::reservation::ReservationService;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error};

/// Periodically deletes lapsed reservations. Readers never depend on it.
pub struct ExpirySweeper {
    reservations: ReservationService,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(reservations: ReservationService, interval: Duration) -> Self {
        Self { reservations, interval }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.sweep_once().await;
        }
    }

    /// One pass; a failure is logged and left for the next tick.
    pub async fn sweep_once(&self) -> u64 {
        match self.reservations.sweep_expired().await {
            Ok(outcome) => {
                debug!(deleted = outcome.deleted, "sweep finished");
                outcome.deleted
            }
            Err(e) => {
                error!(error = %e, "error sweeping expired reservations");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::context::InventoryContext;
    use crate::domain::Product;
    use crate::store::MemoryStore;
    use crate::InventoryConfig;
    use chrono::Utc;
    use shared::OwnerKey;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn sweep_once_reports_deleted_rows() {
        let now = Utc::now();
        let product = Product::new(Uuid::new_v4(), 5, 1, now);
        let clock = Arc::new(ManualClock::new(now));
        let ctx = InventoryContext::new(Arc::new(MemoryStore::with_products([product.clone()])))
            .with_clock(clock.clone());
        let reservations = ReservationService::new(ctx, InventoryConfig::default());
        reservations
            .reserve(product.id, 2, &OwnerKey::Cart("a".into()), Some(1))
            .await
            .unwrap();

        let sweeper = ExpirySweeper::new(reservations, Duration::from_secs(60));
        assert_eq!(sweeper.sweep_once().await, 0);

        clock.advance(chrono::Duration::minutes(2));
        assert_eq!(sweeper.sweep_once().await, 1);
        assert_eq!(sweeper.sweep_once().await, 0);
    }
}
