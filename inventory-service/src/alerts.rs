//! Low/out-of-stock alerts.
//!
//! Alerts fire on the transition only: a product that is already low does not
//! re-alert on every further decrement.

use anyhow::Result;
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::{AlertKind, StockAlert};

#[async_trait]
pub trait AlertPublisher: Send + Sync {
    /// Fire-and-forget: implementations must not wait on delivery.
    async fn notify(&self, alert: StockAlert) -> Result<()>;
}

/// Returns the alert a stock change from `previous` to `current` should raise.
pub fn threshold_crossing(previous: i32, current: i32, threshold: i32) -> Option<AlertKind> {
    if current <= 0 && previous > 0 {
        Some(AlertKind::OutOfStock)
    } else if current <= threshold && previous > threshold {
        Some(AlertKind::LowStock)
    } else {
        None
    }
}

pub struct KafkaAlertPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaAlertPublisher {
    pub fn new(producer: FutureProducer, topic: String) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl AlertPublisher for KafkaAlertPublisher {
    async fn notify(&self, alert: StockAlert) -> Result<()> {
        let json = serde_json::to_string(&alert)?;
        let key = alert.product_id.to_string();
        let record = FutureRecord::to(&self.topic)
            .payload(&json)
            .key(&key);

        // Enqueue only; the delivery future is dropped.
        self.producer
            .send_result(record)
            .map_err(|(e, _)| anyhow::anyhow!("Failed to enqueue alert: {}", e))?;

        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAlertPublisher;

#[async_trait]
impl AlertPublisher for NoopAlertPublisher {
    async fn notify(&self, _alert: StockAlert) -> Result<()> {
        Ok(())
    }
}
