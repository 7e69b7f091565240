//! Core inventory records.
//!
//! A [`Product`] carries the authoritative stock counter, a [`Reservation`]
//! is a time-bounded hold against it, and a [`Movement`] is one entry of the
//! append-only ledger that explains every change to the counter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::OwnerKey;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub stock: i32,
    pub low_stock_threshold: i32,
    /// Untracked products are always available and never decremented.
    pub track_quantity: bool,
    pub is_active: bool,
    /// Bumped on every stock write; guards conditional updates.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(id: Uuid, stock: i32, low_stock_threshold: i32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            stock,
            low_stock_threshold,
            track_quantity: true,
            is_active: true,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn untracked(mut self) -> Self {
        self.track_quantity = false;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub product_id: Uuid,
    pub owner_key: OwnerKey,
    pub quantity: i32,
    pub reason: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        is_active(self.expires_at, now)
    }
}

/// A hold counts against availability only while `expires_at > now`.
///
/// Every reader applies this, so correctness never depends on the sweeper.
pub fn is_active(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at > now
}

/// Sums the quantity of the holds in `reservations` that are still active.
pub fn active_quantity<'a>(
    reservations: impl IntoIterator<Item = &'a Reservation>,
    now: DateTime<Utc>,
) -> i32 {
    total_quantity(reservations.into_iter().filter(|r| r.is_active(now)).map(|r| r.quantity))
}

/// Sums quantities in `i64` and saturates at `i32::MAX`.
///
/// Untracked products accept holds of any size, so a plain `i32` sum can
/// overflow.
pub fn total_quantity(quantities: impl IntoIterator<Item = i32>) -> i32 {
    let total: i64 = quantities.into_iter().map(i64::from).sum();
    i32::try_from(total).unwrap_or(if total < 0 { i32::MIN } else { i32::MAX })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    In,
    Out,
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "IN",
            Self::Out => "OUT",
            Self::Adjustment => "ADJUSTMENT",
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN" => Ok(Self::In),
            "OUT" => Ok(Self::Out),
            "ADJUSTMENT" => Ok(Self::Adjustment),
            other => Err(format!("unknown movement type: {}", other)),
        }
    }
}

/// Append-only ledger entry. Never mutated or deleted once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: Uuid,
    pub product_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: i32,
    pub previous_stock: i32,
    pub new_stock: i32,
    pub reason: String,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Movement {
    pub fn record(
        product_id: Uuid,
        movement_type: MovementType,
        previous_stock: i32,
        new_stock: i32,
        reason: impl Into<String>,
        reference: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            movement_type,
            quantity: (new_stock - previous_stock).abs(),
            previous_stock,
            new_stock,
            reason: reason.into(),
            reference,
            created_at: now,
        }
    }
}
