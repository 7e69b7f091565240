//! Invalidation of read caches derived from stock and reservations.

use anyhow::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

pub const LOW_STOCK_KEY: &str = "low-stock-products";

pub fn stock_key(product_id: Uuid) -> String {
    format!("stock:{}", product_id)
}

/// Keys to drop after any stock or reservation change on `product_ids`.
pub fn keys_for(product_ids: &[Uuid]) -> Vec<String> {
    let mut keys: Vec<String> = product_ids.iter().copied().map(stock_key).collect();
    if !keys.is_empty() {
        keys.push(LOW_STOCK_KEY.to_string());
    }
    keys
}

#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, keys: &[String]) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisCacheInvalidator {
    conn_manager: ConnectionManager,
}

impl RedisCacheInvalidator {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn_manager = ConnectionManager::new(client).await?;
        Ok(Self { conn_manager })
    }
}

#[async_trait]
impl CacheInvalidator for RedisCacheInvalidator {
    async fn invalidate(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn_manager.clone();
        let _: () = conn.del(keys).await?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl CacheInvalidator for NoopCache {
    async fn invalidate(&self, _keys: &[String]) -> Result<()> {
        Ok(())
    }
}
