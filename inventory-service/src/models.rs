use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use crate::domain::{Movement, Product, Reservation};
use crate::error::InventoryError;

#[derive(Debug, Clone, Queryable, Identifiable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::products)]
pub struct ProductRow {
    pub id: Uuid,
    pub stock: i32,
    pub low_stock_threshold: i32,
    pub track_quantity: bool,
    pub is_active: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Insertable)]
#[diesel(table_name = crate::schema::reservations)]
pub struct ReservationRow {
    pub id: Uuid,
    pub product_id: Uuid,
    pub owner_key: String,
    pub quantity: i32,
    pub reason: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::stock_movements)]
pub struct MovementRow {
    pub id: Uuid,
    pub product_id: Uuid,
    pub movement_type: String,
    pub quantity: i32,
    pub previous_stock: i32,
    pub new_stock: i32,
    pub reason: String,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::processed_commands)]
pub struct ProcessedCommand {
    pub idempotency_key: String,
    pub command_id: Uuid,
    pub result: Option<serde_json::Value>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            stock: row.stock,
            low_stock_threshold: row.low_stock_threshold,
            track_quantity: row.track_quantity,
            is_active: row.is_active,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<&Product> for ProductRow {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id,
            stock: product.stock,
            low_stock_threshold: product.low_stock_threshold,
            track_quantity: product.track_quantity,
            is_active: product.is_active,
            version: product.version,
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = InventoryError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let owner_key = row
            .owner_key
            .parse()
            .map_err(|e| InventoryError::Internal(format!("reservation {}: {}", row.id, e)))?;

        Ok(Self {
            id: row.id,
            product_id: row.product_id,
            owner_key,
            quantity: row.quantity,
            reason: row.reason,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&Movement> for MovementRow {
    fn from(movement: &Movement) -> Self {
        Self {
            id: movement.id,
            product_id: movement.product_id,
            movement_type: movement.movement_type.as_str().to_string(),
            quantity: movement.quantity,
            previous_stock: movement.previous_stock,
            new_stock: movement.new_stock,
            reason: movement.reason.clone(),
            reference: movement.reference.clone(),
            created_at: movement.created_at,
        }
    }
}

impl TryFrom<MovementRow> for Movement {
    type Error = InventoryError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let movement_type = row.movement_type.parse().map_err(InventoryError::Internal)?;

        Ok(Self {
            id: row.id,
            product_id: row.product_id,
            movement_type,
            quantity: row.quantity,
            previous_stock: row.previous_stock,
            new_stock: row.new_stock,
            reason: row.reason,
            reference: row.reference,
            created_at: row.created_at,
        })
    }
}
