use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub command_type: CommandType,
    pub payload: serde_json::Value,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    Reserve,
    BulkReserve,
    Release,
    ReleaseAll,
    Extend,
    ConvertToSale,
    IncreaseStock,
    DecreaseStock,
    AdjustStock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReply {
    pub id: Uuid,
    pub command_id: Uuid,
    pub status: CommandStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    Success,
    Failed,
}

/// Error taxonomy shared by every reply, alert and HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientStock,
    ProductUnavailable,
    Conflict,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::Validation => "VALIDATION",
            Self::NotFound => "NOT_FOUND",
            Self::InsufficientStock => "INSUFFICIENT_STOCK",
            Self::ProductUnavailable => "PRODUCT_UNAVAILABLE",
            Self::Conflict => "CONFLICT",
            Self::Internal => "INTERNAL",
        };
        f.write_str(code)
    }
}

/// The cart or order a reservation is scoped to.
///
/// Stored and transmitted in its canonical `cart:<id>` / `order:<uuid>` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OwnerKey {
    Cart(String),
    Order(Uuid),
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cart(id) => write!(f, "cart:{}", id),
            Self::Order(id) => write!(f, "order:{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerKeyParseError(pub String);

impl fmt::Display for OwnerKeyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid owner key: {}", self.0)
    }
}

impl std::error::Error for OwnerKeyParseError {}

impl FromStr for OwnerKey {
    type Err = OwnerKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("cart", id)) if !id.is_empty() => Ok(Self::Cart(id.to_string())),
            Some(("order", id)) => Uuid::parse_str(id)
                .map(Self::Order)
                .map_err(|_| OwnerKeyParseError(s.to_string())),
            _ => Err(OwnerKeyParseError(s.to_string())),
        }
    }
}

impl Serialize for OwnerKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OwnerKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveData {
    pub product_id: Uuid,
    pub quantity: i32,
    pub owner_key: OwnerKey,
    pub ttl_minutes: Option<i64>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BulkMode {
    #[default]
    BestEffort,
    AllOrNothing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkReserveData {
    pub owner_key: OwnerKey,
    pub items: Vec<ItemQuantity>,
    pub ttl_minutes: Option<i64>,
    #[serde(default)]
    pub mode: BulkMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQuantity {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseData {
    pub reservation_id: Option<Uuid>,
    pub owner_key: Option<OwnerKey>,
    pub product_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerData {
    pub owner_key: OwnerKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendData {
    pub reservation_id: Uuid,
    pub minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockChangeData {
    pub product_id: Uuid,
    pub quantity: i32,
    pub reason: String,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    LowStock,
    OutOfStock,
}

/// Published on the alert topic when a product crosses its stock threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAlert {
    pub kind: AlertKind,
    pub product_id: Uuid,
    pub current_stock: i32,
    pub threshold: i32,
    pub raised_at: DateTime<Utc>,
}

impl Command {
    pub fn new(command_type: CommandType, payload: serde_json::Value, idempotency_key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            command_type,
            payload,
            idempotency_key: idempotency_key.into(),
            created_at: Utc::now(),
        }
    }
}

impl CommandReply {
    pub fn success(command_id: Uuid, result: Option<serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            command_id,
            status: CommandStatus::Success,
            result,
            error: None,
            error_kind: None,
            created_at: Utc::now(),
        }
    }

    pub fn failed(command_id: Uuid, kind: ErrorKind, error: String, result: Option<serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            command_id,
            status: CommandStatus::Failed,
            result,
            error: Some(error),
            error_kind: Some(kind),
            created_at: Utc::now(),
        }
    }

    /// Re-addresses a stored reply to a repeated command.
    pub fn replayed_for(mut self, command_id: Uuid) -> Self {
        self.id = Uuid::new_v4();
        self.command_id = command_id;
        self.created_at = Utc::now();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_key_round_trips_through_canonical_form() {
        let order = OwnerKey::Order(Uuid::new_v4());
        assert_eq!(order.to_string().parse::<OwnerKey>().unwrap(), order);

        let cart: OwnerKey = "cart:sess-42".parse().unwrap();
        assert_eq!(cart, OwnerKey::Cart("sess-42".to_string()));
    }

    #[test]
    fn owner_key_rejects_unknown_prefix() {
        assert!("wishlist:1".parse::<OwnerKey>().is_err());
        assert!("cart:".parse::<OwnerKey>().is_err());
        assert!("order:not-a-uuid".parse::<OwnerKey>().is_err());
    }

    #[test]
    fn error_kind_serializes_as_screaming_snake() {
        let json = serde_json::to_string(&ErrorKind::InsufficientStock).unwrap();
        assert_eq!(json, "\"INSUFFICIENT_STOCK\"");
        assert_eq!(ErrorKind::ProductUnavailable.to_string(), "PRODUCT_UNAVAILABLE");
    }

    #[test]
    fn bulk_mode_defaults_to_best_effort() {
        let data: BulkReserveData = serde_json::from_value(serde_json::json!({
            "owner_key": "cart:abc",
            "items": [{"product_id": Uuid::nil(), "quantity": 1}],
            "ttl_minutes": null
        }))
        .unwrap();
        assert_eq!(data.mode, BulkMode::BestEffort);
    }
}
