use anyhow::Result;
use clap::Parser;
use diesel::{Connection, PgConnection};
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};
use diesel_migrations::MigrationHarness;
use inventory_service::alerts::KafkaAlertPublisher;
use inventory_service::api;
use inventory_service::cache::RedisCacheInvalidator;
use inventory_service::config::Args;
use inventory_service::handlers::{CommandHandler, CommandProcessor};
use inventory_service::store::{InventoryStore, MemoryStore, PostgresStore};
use inventory_service::sweeper::ExpirySweeper;
use inventory_service::{Inventory, InventoryConfig, InventoryContext, MIGRATIONS};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::FutureProducer;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    let config = InventoryConfig::from(&args);

    let store: Arc<dyn InventoryStore> = if args.in_memory {
        warn!("Using in-memory store; state is lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        // Run migrations first
        info!("Running database migrations...");
        let mut conn = PgConnection::establish(&args.database_url)?;
        conn.run_pending_migrations(MIGRATIONS).map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
        info!("Migrations completed successfully");

        let manager = diesel_async::pooled_connection::AsyncDieselConnectionManager::<AsyncPgConnection>::new(&args.database_url);
        let pool = Pool::builder().build(manager).await?;
        Arc::new(PostgresStore::new(pool))
    };

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &args.kafka_brokers)
        .set("message.timeout.ms", "5000")
        .create()?;

    let consumer: StreamConsumer = ClientConfig::new()
        .set("group.id", "inventory-service")
        .set("bootstrap.servers", &args.kafka_brokers)
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", "6000")
        .set("enable.auto.commit", "true")
        .create()?;

    consumer.subscribe(&[&args.command_topic])?;

    let mut ctx = InventoryContext::new(store)
        .with_alerts(Arc::new(KafkaAlertPublisher::new(producer.clone(), args.alert_topic.clone())));
    match &args.redis_url {
        Some(url) => {
            ctx = ctx.with_cache(Arc::new(RedisCacheInvalidator::connect(url).await?));
            info!("Cache invalidation enabled");
        }
        None => info!("REDIS_URL not set, cache invalidation disabled"),
    }

    let inventory = Inventory::new(ctx, config.clone());

    let sweeper = ExpirySweeper::new(inventory.reservations.clone(), config.sweep_interval);
    let command_handler = CommandHandler::new(
        CommandProcessor::new(inventory.clone()),
        producer.clone(),
        args.reply_topic.clone(),
    );

    tokio::spawn(async move {
        sweeper.run().await;
    });

    tokio::spawn(async move {
        command_handler.run(consumer).await;
    });

    let app = api::create_router(api::AppState { inventory });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Inventory service web server started on port {}", args.port);

    axum::serve(listener, app).await?;

    Ok(())
}
