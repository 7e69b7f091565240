//! Reservation lifecycle: reserve, release, extend, convert, sweep.
//!
//! ```text
//!            ┌──release──────► RELEASED
//!  ACTIVE ───┼──expires_at ≤ now──► EXPIRED
//!            └──convert_to_sale──► CONVERTED (stock decremented, OUT movement)
//! ```
//!
//! Every terminal state deletes the row. Only `ACTIVE` holds count against
//! availability, and that is decided by comparing `expires_at` with the
//! clock at read time, not by whether the sweeper has run.

use crate::config::InventoryConfig;
use crate::context::InventoryContext;
use crate::domain::{total_quantity, Reservation};
use crate::error::{InventoryError, Result};
use crate::outcome::Rejection;
use crate::store::{ConvertedLine, ExtendOutcome, ReservationStats, ReserveOutcome, ReserveRequest, SweepOutcome};
use chrono::Duration;
use serde::Serialize;
use shared::{BulkMode, ItemQuantity, OwnerKey};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationReceipt {
    pub reservation: Reservation,
    /// True when an existing hold of the same owner was replaced.
    pub updated: bool,
    /// `None` for untracked products.
    pub remaining_available: Option<i32>,
    #[serde(skip)]
    previous: Option<Reservation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReservationOutcome {
    Reserved(ReservationReceipt),
    Rejected(Rejection),
}

impl ReservationOutcome {
    pub fn is_reserved(&self) -> bool {
        matches!(self, Self::Reserved(_))
    }

    pub fn receipt(&self) -> Option<&ReservationReceipt> {
        match self {
            Self::Reserved(receipt) => Some(receipt),
            Self::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Reserved(_) => None,
            Self::Rejected(rejection) => Some(rejection),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkReserveLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub outcome: ReservationOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkReserveResult {
    pub success: bool,
    pub items: Vec<BulkReserveLine>,
    pub total_reserved: i32,
    pub failed_items: Vec<Rejection>,
    /// Set in all-or-nothing mode when partial successes were undone.
    pub rolled_back: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseTarget {
    Reservation(Uuid),
    /// The owner's hold on one product.
    OwnerProduct { owner_key: OwnerKey, product_id: Uuid },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseResult {
    /// False when nothing matched; the hold was already gone.
    pub released: bool,
    pub count: usize,
    pub quantity: i32,
}

impl ReleaseResult {
    fn from_deleted(deleted: &[Reservation]) -> Self {
        Self {
            released: !deleted.is_empty(),
            count: deleted.len(),
            quantity: total_quantity(deleted.iter().map(|r| r.quantity)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionReport {
    pub owner_key: OwnerKey,
    pub converted_count: usize,
    pub converted_quantity: i32,
    pub lines: Vec<ConvertedLine>,
    /// Lapsed holds that were dropped without decrementing stock.
    pub expired: Vec<Reservation>,
}

impl ConversionReport {
    /// True when the call found nothing to do, e.g. a repeated confirmation.
    pub fn is_noop(&self) -> bool {
        self.lines.is_empty() && self.expired.is_empty()
    }
}

#[derive(Clone)]
pub struct ReservationService {
    ctx: InventoryContext,
    config: InventoryConfig,
}

impl ReservationService {
    pub fn new(ctx: InventoryContext, config: InventoryConfig) -> Self {
        Self { ctx, config }
    }

    /// Places or replaces `owner_key`'s hold on `product_id`.
    ///
    /// Insufficient stock and unavailable products come back as
    /// [`ReservationOutcome::Rejected`]. Errors are reserved for invalid
    /// input and storage failures.
    pub async fn reserve(
        &self,
        product_id: Uuid,
        quantity: i32,
        owner_key: &OwnerKey,
        ttl_minutes: Option<i64>,
    ) -> Result<ReservationOutcome> {
        let reason = match owner_key {
            OwnerKey::Cart(_) => "cart",
            OwnerKey::Order(_) => "checkout",
        };
        self.reserve_with_reason(product_id, quantity, owner_key, ttl_minutes, reason).await
    }

    pub async fn reserve_with_reason(
        &self,
        product_id: Uuid,
        quantity: i32,
        owner_key: &OwnerKey,
        ttl_minutes: Option<i64>,
        reason: &str,
    ) -> Result<ReservationOutcome> {
        if quantity <= 0 {
            return Err(InventoryError::Validation(format!("quantity must be positive, got {}", quantity)));
        }
        let ttl = match ttl_minutes {
            Some(minutes) if minutes <= 0 => {
                return Err(InventoryError::Validation(format!("ttl must be positive, got {} minutes", minutes)));
            }
            Some(minutes) => minutes_duration(minutes, "ttl")?,
            None => self.config.default_ttl,
        };
        // No hold may outlive what an extension could reach.
        if ttl > self.config.max_hold {
            debug!(product_id = %product_id, owner_key = %owner_key, ttl_minutes = ttl.num_minutes(), "ttl capped at max hold");
        }
        let ttl = ttl.min(self.config.max_hold);

        let now = self.ctx.now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| InventoryError::Validation(format!("ttl of {} minutes is out of range", ttl.num_minutes())))?;
        let request = ReserveRequest {
            product_id,
            owner_key: owner_key.clone(),
            quantity,
            reason: reason.to_string(),
            expires_at,
        };

        let outcome = match self.ctx.store.try_reserve(request, now).await? {
            ReserveOutcome::Reserved { reservation, previous, available_after } => {
                info!(
                    reservation_id = %reservation.id,
                    product_id = %product_id,
                    owner_key = %owner_key,
                    quantity,
                    expires_at = %reservation.expires_at,
                    updated = previous.is_some(),
                    "stock reserved"
                );
                self.ctx.invalidate(&[product_id]).await;
                ReservationOutcome::Reserved(ReservationReceipt {
                    updated: previous.is_some(),
                    remaining_available: available_after,
                    reservation,
                    previous,
                })
            }
            ReserveOutcome::Insufficient { requested, available } => {
                info!(product_id = %product_id, owner_key = %owner_key, requested, available, "reservation rejected: insufficient stock");
                ReservationOutcome::Rejected(Rejection::insufficient(product_id, requested, available))
            }
            ReserveOutcome::Inactive => {
                info!(product_id = %product_id, owner_key = %owner_key, "reservation rejected: product inactive");
                ReservationOutcome::Rejected(Rejection::unavailable(product_id, quantity))
            }
            ReserveOutcome::ProductMissing => {
                info!(product_id = %product_id, owner_key = %owner_key, "reservation rejected: product not found");
                ReservationOutcome::Rejected(Rejection::not_found(product_id, quantity))
            }
        };
        Ok(outcome)
    }

    /// Reserves each item in turn for the same owner.
    ///
    /// In [`BulkMode::BestEffort`] earlier successes stand when a later item
    /// fails. In [`BulkMode::AllOrNothing`] any failure undoes the holds this
    /// call placed, restoring holds it replaced.
    pub async fn bulk_reserve(
        &self,
        owner_key: &OwnerKey,
        items: &[ItemQuantity],
        ttl_minutes: Option<i64>,
        mode: BulkMode,
    ) -> BulkReserveResult {
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let outcome = match self.reserve(item.product_id, item.quantity, owner_key, ttl_minutes).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(product_id = %item.product_id, owner_key = %owner_key, error = %e, "bulk reserve item failed");
                    ReservationOutcome::Rejected(Rejection::from_error(item.product_id, item.quantity, &e))
                }
            };
            let stop = mode == BulkMode::AllOrNothing && !outcome.is_reserved();
            lines.push(BulkReserveLine { product_id: item.product_id, quantity: item.quantity, outcome });
            if stop {
                break;
            }
        }

        let failed_items: Vec<Rejection> = lines.iter().filter_map(|l| l.outcome.rejection().cloned()).collect();
        let mut rolled_back = false;
        if mode == BulkMode::AllOrNothing && !failed_items.is_empty() {
            self.compensate(&lines).await;
            rolled_back = true;
        }

        // A product listed twice holds only its last successful quantity.
        let total_reserved = if rolled_back {
            0
        } else {
            let held: BTreeMap<Uuid, i32> = lines
                .iter()
                .filter_map(|l| l.outcome.receipt())
                .map(|r| (r.reservation.product_id, r.reservation.quantity))
                .collect();
            total_quantity(held.into_values())
        };

        BulkReserveResult {
            success: failed_items.is_empty(),
            items: lines,
            total_reserved,
            failed_items,
            rolled_back,
        }
    }

    /// Undoes receipts newest first, so a product listed twice unwinds to its
    /// original hold.
    async fn compensate(&self, lines: &[BulkReserveLine]) {
        for receipt in lines.iter().rev().filter_map(|l| l.outcome.receipt()) {
            let reservation = &receipt.reservation;
            let result = match &receipt.previous {
                // Put back the hold this call replaced.
                Some(previous) => {
                    let request = ReserveRequest {
                        product_id: previous.product_id,
                        owner_key: previous.owner_key.clone(),
                        quantity: previous.quantity,
                        reason: previous.reason.clone(),
                        expires_at: previous.expires_at,
                    };
                    self.ctx
                        .store
                        .try_reserve(request, self.ctx.now())
                        .await
                        .map(|outcome| matches!(outcome, ReserveOutcome::Reserved { .. }))
                }
                None => self
                    .ctx
                    .store
                    .delete_reservation(reservation.id)
                    .await
                    .map(|_| true),
            };
            match result {
                Ok(true) => debug!(reservation_id = %reservation.id, "bulk reserve compensated"),
                Ok(false) => warn!(reservation_id = %reservation.id, "could not restore replaced hold"),
                Err(e) => warn!(reservation_id = %reservation.id, error = %e, "bulk reserve compensation failed"),
            }
            self.ctx.invalidate(&[reservation.product_id]).await;
        }
    }

    /// Idempotent: releasing a hold that is already gone succeeds with
    /// `released = false`.
    pub async fn release(&self, target: ReleaseTarget) -> Result<ReleaseResult> {
        let deleted = match &target {
            ReleaseTarget::Reservation(id) => self.ctx.store.delete_reservation(*id).await?.into_iter().collect(),
            ReleaseTarget::OwnerProduct { owner_key, product_id } => {
                self.ctx.store.delete_owner_reservations(owner_key, Some(*product_id)).await?
            }
        };
        self.finish_release(&deleted, &target).await
    }

    pub async fn release_all(&self, owner_key: &OwnerKey) -> Result<ReleaseResult> {
        let deleted = self.ctx.store.delete_owner_reservations(owner_key, None).await?;
        let result = ReleaseResult::from_deleted(&deleted);
        info!(owner_key = %owner_key, count = result.count, quantity = result.quantity, "released all holds");
        self.invalidate_holds(&deleted).await;
        Ok(result)
    }

    async fn finish_release(&self, deleted: &[Reservation], target: &ReleaseTarget) -> Result<ReleaseResult> {
        let result = ReleaseResult::from_deleted(deleted);
        if result.released {
            info!(release = ?target, count = result.count, quantity = result.quantity, "reservation released");
            self.invalidate_holds(deleted).await;
        } else {
            debug!(release = ?target, "release found nothing; already released");
        }
        Ok(result)
    }

    /// Pushes an active hold's expiry forward by `minutes`, never beyond
    /// `now + max_hold` and never backwards. Lapsed holds cannot be revived.
    pub async fn extend(&self, reservation_id: Uuid, minutes: i64) -> Result<Reservation> {
        if minutes <= 0 {
            return Err(InventoryError::Validation(format!("extension must be positive, got {} minutes", minutes)));
        }
        let by = minutes_duration(minutes, "extension")?;
        let now = self.ctx.now();
        let cap = now
            .checked_add_signed(self.config.max_hold)
            .ok_or_else(|| InventoryError::Internal("max hold is out of range".into()))?;

        match self
            .ctx
            .store
            .extend_reservation(reservation_id, by, cap, now)
            .await?
        {
            ExtendOutcome::Extended(reservation) => {
                if reservation.expires_at == cap {
                    debug!(reservation_id = %reservation_id, "extension capped at max hold");
                }
                info!(reservation_id = %reservation_id, expires_at = %reservation.expires_at, "reservation extended");
                Ok(reservation)
            }
            ExtendOutcome::Expired(_) => Err(InventoryError::ReservationExpired(reservation_id)),
            ExtendOutcome::Missing => Err(InventoryError::not_found("reservation", reservation_id)),
        }
    }

    /// Turns the owner's active holds into permanent stock decrements.
    ///
    /// Safe to call repeatedly: once the holds are converted they are gone,
    /// so a retried confirmation finds nothing and changes nothing. If the
    /// store fails, the holds stay in place for the retry.
    pub async fn convert_to_sale(&self, owner_key: &OwnerKey) -> Result<ConversionReport> {
        let now = self.ctx.now();
        let outcome = self.ctx.store.convert_owner(owner_key, "order confirmed", now).await?;

        for line in &outcome.converted {
            if let (Some(product), Some(movement)) = (&line.product, &line.movement) {
                self.ctx.stock_changed(product, movement.previous_stock).await;
            } else {
                self.ctx.invalidate(&[line.reservation.product_id]).await;
            }
        }
        if !outcome.expired.is_empty() {
            warn!(owner_key = %owner_key, expired = outcome.expired.len(), "lapsed holds dropped at conversion");
            self.invalidate_holds(&outcome.expired).await;
        }

        let report = ConversionReport {
            owner_key: owner_key.clone(),
            converted_count: outcome.converted.len(),
            converted_quantity: total_quantity(outcome.converted.iter().map(|l| l.reservation.quantity)),
            lines: outcome.converted,
            expired: outcome.expired,
        };
        if report.is_noop() {
            info!(owner_key = %owner_key, "nothing to convert; already converted or released");
        } else {
            info!(owner_key = %owner_key, count = report.converted_count, quantity = report.converted_quantity, "reservations converted to sale");
        }
        Ok(report)
    }

    /// Storage hygiene only; readers already ignore lapsed holds.
    pub async fn sweep_expired(&self) -> Result<SweepOutcome> {
        let outcome = self.ctx.store.delete_expired(self.ctx.now()).await?;
        if outcome.deleted > 0 {
            info!(deleted = outcome.deleted, products = outcome.product_ids.len(), "expired reservations swept");
            self.ctx.invalidate(&outcome.product_ids).await;
        }
        Ok(outcome)
    }

    pub async fn get_stats(&self) -> Result<ReservationStats> {
        let now = self.ctx.now();
        self.ctx.store.reservation_stats(now, now + self.config.stats_horizon).await
    }

    pub async fn get_reservation(&self, reservation_id: Uuid) -> Result<Reservation> {
        self.ctx
            .store
            .get_reservation(reservation_id)
            .await?
            .ok_or_else(|| InventoryError::not_found("reservation", reservation_id))
    }

    pub async fn active_reservations(&self, owner_key: &OwnerKey) -> Result<Vec<Reservation>> {
        let now = self.ctx.now();
        let holds = self.ctx.store.owner_reservations(owner_key).await?;
        Ok(holds.into_iter().filter(|r| r.is_active(now)).collect())
    }

    async fn invalidate_holds(&self, holds: &[Reservation]) {
        let mut product_ids: Vec<Uuid> = holds.iter().map(|r| r.product_id).collect();
        product_ids.sort();
        product_ids.dedup();
        self.ctx.invalidate(&product_ids).await;
    }
}

fn minutes_duration(minutes: i64, what: &str) -> Result<Duration> {
    Duration::try_minutes(minutes)
        .ok_or_else(|| InventoryError::Validation(format!("{} of {} minutes is out of range", what, minutes)))
}
