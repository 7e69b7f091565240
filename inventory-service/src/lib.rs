//! Inventory reservation and stock consistency.
//!
//! Stock is reserved with time-bounded holds while a cart or checkout is in
//! flight, and holds are converted into permanent decrements when an order is
//! confirmed. The storage layer is the only enforcement point: every
//! check-then-write runs as one atomic [`store::InventoryStore`] operation.

pub mod alerts;
pub mod api;
pub mod availability;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod outcome;
pub mod reservation;
pub mod retry;
pub mod schema;
pub mod stock;
pub mod store;
pub mod sweeper;

pub use config::InventoryConfig;
pub use context::InventoryContext;
pub use error::{InventoryError, Result};

use availability::AvailabilityService;
use diesel_migrations::{embed_migrations, EmbeddedMigrations};
use ledger::MovementLedger;
use reservation::ReservationService;
use stock::StockService;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// The services over one shared context.
#[derive(Clone)]
pub struct Inventory {
    pub availability: AvailabilityService,
    pub reservations: ReservationService,
    pub stock: StockService,
    pub ledger: MovementLedger,
    ctx: InventoryContext,
    config: InventoryConfig,
}

impl Inventory {
    pub fn new(ctx: InventoryContext, config: InventoryConfig) -> Self {
        Self {
            availability: AvailabilityService::new(ctx.clone()),
            reservations: ReservationService::new(ctx.clone(), config.clone()),
            stock: StockService::new(ctx.clone()),
            ledger: MovementLedger::new(ctx.clone()),
            ctx,
            config,
        }
    }

    pub fn context(&self) -> &InventoryContext {
        &self.ctx
    }

    pub fn config(&self) -> &InventoryConfig {
        &self.config
    }
}
