//! PostgreSQL store.
//!
//! Every operation that checks availability before writing takes a row lock on
//! the affected product (`SELECT ... FOR UPDATE`) inside a transaction, so two
//! instances racing for the last units serialize on that row. Stock writes are
//! additionally conditioned on the product's `version` column.

use super::{
    extended_expiry, next_stock, ConversionOutcome, ConvertedLine, ExtendOutcome, InventoryStore, ProductLevels,
    ProductReservationStats, ReservationStats, ReserveOutcome, ReserveRequest, StockChange,
    StockChangeOutcome, StockChangeRequest, StoredReply, SweepOutcome,
};
use crate::domain::{Movement, MovementType, Product, Reservation};
use crate::error::{InventoryError, Result};
use crate::models::*;
use crate::schema::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::OwnerKey;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;
use uuid::Uuid;

type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct PostgresStore {
    pool: DbPool,
}

impl PostgresStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Inserts a product row. Catalog management lives elsewhere; this exists
    /// for seeding.
    pub async fn insert_product(&self, product: &Product) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(products::table)
            .values(ProductRow::from(product))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}

/// Saturates a `SUM(quantity)` into the `i32` the domain works in.
fn to_i32(value: Option<i64>) -> i32 {
    let total = value.unwrap_or(0);
    i32::try_from(total).unwrap_or(if total < 0 { i32::MIN } else { i32::MAX })
}

async fn active_reserved(
    conn: &mut AsyncPgConnection,
    product_id: Uuid,
    now: DateTime<Utc>,
    excluding_owner: Option<&str>,
) -> Result<i32> {
    let mut query = reservations::table
        .filter(reservations::product_id.eq(product_id))
        .filter(reservations::expires_at.gt(now))
        .select(diesel::dsl::sum(reservations::quantity))
        .into_boxed();
    if let Some(owner) = excluding_owner {
        query = query.filter(reservations::owner_key.ne(owner.to_string()));
    }
    let reserved: Option<i64> = query.get_result(conn).await?;
    Ok(to_i32(reserved))
}

async fn lock_product(conn: &mut AsyncPgConnection, product_id: Uuid) -> Result<Option<Product>> {
    let row = products::table
        .find(product_id)
        .for_update()
        .first::<ProductRow>(conn)
        .await
        .optional()?;
    Ok(row.map(Product::from))
}

/// Writes a new stock value if nobody bumped the version since `product` was read.
async fn write_stock(
    conn: &mut AsyncPgConnection,
    product: &Product,
    stock: i32,
    now: DateTime<Utc>,
) -> Result<Product> {
    let row = diesel::update(
        products::table
            .filter(products::id.eq(product.id))
            .filter(products::version.eq(product.version)),
    )
    .set((
        products::stock.eq(stock),
        products::version.eq(product.version + 1),
        products::updated_at.eq(now),
    ))
    .get_result::<ProductRow>(conn)
    .await
    .optional()?;

    row.map(Product::from).ok_or(InventoryError::Conflict(product.id))
}

async fn append_movement(conn: &mut AsyncPgConnection, movement: &Movement) -> Result<()> {
    diesel::insert_into(stock_movements::table)
        .values(MovementRow::from(movement))
        .execute(conn)
        .await?;
    Ok(())
}

#[async_trait]
impl InventoryStore for PostgresStore {
    async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>> {
        let mut conn = self.pool.get().await?;
        let row = products::table
            .find(product_id)
            .first::<ProductRow>(&mut conn)
            .await
            .optional()?;
        Ok(row.map(Product::from))
    }

    async fn product_levels(&self, product_ids: &[Uuid], now: DateTime<Utc>) -> Result<Vec<ProductLevels>> {
        let mut conn = self.pool.get().await?;
        let ids: Vec<Uuid> = product_ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();

        // One snapshot for both reads, so stock and holds agree with each other.
        conn.build_transaction()
            .repeatable_read()
            .read_only()
            .run::<_, InventoryError, _>(|conn| {
                Box::pin(async move {
                    let rows = products::table
                        .filter(products::id.eq_any(ids.clone()))
                        .load::<ProductRow>(conn)
                        .await?;

                    let reserved: Vec<(Uuid, Option<i64>)> = reservations::table
                        .filter(reservations::product_id.eq_any(ids))
                        .filter(reservations::expires_at.gt(now))
                        .group_by(reservations::product_id)
                        .select((reservations::product_id, diesel::dsl::sum(reservations::quantity)))
                        .load(conn)
                        .await?;
                    let reserved: HashMap<Uuid, Option<i64>> = reserved.into_iter().collect();

                    Ok(rows
                        .into_iter()
                        .map(|row| {
                            let held = to_i32(reserved.get(&row.id).copied().flatten());
                            ProductLevels { product: Product::from(row), reserved: held }
                        })
                        .collect())
                })
            })
            .await
    }

    async fn low_stock_products(&self) -> Result<Vec<Product>> {
        let mut conn = self.pool.get().await?;
        let rows = products::table
            .filter(products::track_quantity.eq(true))
            .filter(products::is_active.eq(true))
            .filter(products::stock.le(products::low_stock_threshold))
            .order((products::stock.asc(), products::id.asc()))
            .load::<ProductRow>(&mut conn)
            .await?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn try_reserve(&self, request: ReserveRequest, now: DateTime<Utc>) -> Result<ReserveOutcome> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, InventoryError, _>(|conn| {
            Box::pin(async move {
                let product = match lock_product(conn, request.product_id).await? {
                    Some(product) => product,
                    None => return Ok(ReserveOutcome::ProductMissing),
                };
                if !product.is_active {
                    return Ok(ReserveOutcome::Inactive);
                }

                let owner = request.owner_key.to_string();
                let reserved = active_reserved(conn, product.id, now, Some(&owner)).await?;
                let available = product.stock - reserved;
                if product.track_quantity && available < request.quantity {
                    return Ok(ReserveOutcome::Insufficient {
                        requested: request.quantity,
                        available,
                    });
                }

                let previous = reservations::table
                    .filter(reservations::owner_key.eq(&owner))
                    .filter(reservations::product_id.eq(product.id))
                    .for_update()
                    .first::<ReservationRow>(conn)
                    .await
                    .optional()?;

                let row = match &previous {
                    Some(existing) => {
                        diesel::update(reservations::table.filter(reservations::id.eq(existing.id)))
                            .set((
                                reservations::quantity.eq(request.quantity),
                                reservations::reason.eq(&request.reason),
                                reservations::expires_at.eq(request.expires_at),
                                reservations::updated_at.eq(now),
                            ))
                            .get_result::<ReservationRow>(conn)
                            .await?
                    }
                    None => {
                        let new_reservation = ReservationRow {
                            id: Uuid::new_v4(),
                            product_id: product.id,
                            owner_key: owner.clone(),
                            quantity: request.quantity,
                            reason: request.reason.clone(),
                            expires_at: request.expires_at,
                            created_at: now,
                            updated_at: now,
                        };
                        diesel::insert_into(reservations::table)
                            .values(&new_reservation)
                            .get_result::<ReservationRow>(conn)
                            .await?
                    }
                };

                let reservation = Reservation::try_from(row)?;
                Ok(ReserveOutcome::Reserved {
                    available_after: product.track_quantity.then(|| available - reservation.quantity),
                    previous: previous.map(Reservation::try_from).transpose()?,
                    reservation,
                })
            })
        })
        .await
    }

    async fn get_reservation(&self, reservation_id: Uuid) -> Result<Option<Reservation>> {
        let mut conn = self.pool.get().await?;
        let row = reservations::table
            .find(reservation_id)
            .first::<ReservationRow>(&mut conn)
            .await
            .optional()?;
        row.map(Reservation::try_from).transpose()
    }

    async fn owner_reservations(&self, owner_key: &OwnerKey) -> Result<Vec<Reservation>> {
        let mut conn = self.pool.get().await?;
        let rows = reservations::table
            .filter(reservations::owner_key.eq(owner_key.to_string()))
            .order((reservations::created_at.asc(), reservations::id.asc()))
            .load::<ReservationRow>(&mut conn)
            .await?;
        rows.into_iter().map(Reservation::try_from).collect()
    }

    async fn delete_reservation(&self, reservation_id: Uuid) -> Result<Option<Reservation>> {
        let mut conn = self.pool.get().await?;
        let row = diesel::delete(reservations::table.filter(reservations::id.eq(reservation_id)))
            .get_result::<ReservationRow>(&mut conn)
            .await
            .optional()?;
        row.map(Reservation::try_from).transpose()
    }

    async fn delete_owner_reservations(
        &self,
        owner_key: &OwnerKey,
        product_id: Option<Uuid>,
    ) -> Result<Vec<Reservation>> {
        let mut conn = self.pool.get().await?;
        let owner = owner_key.to_string();
        let rows = match product_id {
            Some(product_id) => {
                diesel::delete(
                    reservations::table
                        .filter(reservations::owner_key.eq(owner))
                        .filter(reservations::product_id.eq(product_id)),
                )
                .get_results::<ReservationRow>(&mut conn)
                .await?
            }
            None => {
                diesel::delete(reservations::table.filter(reservations::owner_key.eq(owner)))
                    .get_results::<ReservationRow>(&mut conn)
                    .await?
            }
        };
        rows.into_iter().map(Reservation::try_from).collect()
    }

    async fn extend_reservation(
        &self,
        reservation_id: Uuid,
        by: chrono::Duration,
        cap: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ExtendOutcome> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, InventoryError, _>(|conn| {
            Box::pin(async move {
                let row = reservations::table
                    .find(reservation_id)
                    .for_update()
                    .first::<ReservationRow>(conn)
                    .await
                    .optional()?;
                let reservation = match row {
                    Some(row) => Reservation::try_from(row)?,
                    None => return Ok(ExtendOutcome::Missing),
                };
                if !reservation.is_active(now) {
                    return Ok(ExtendOutcome::Expired(reservation));
                }

                let expires_at = extended_expiry(reservation.expires_at, by, cap);
                let row = diesel::update(reservations::table.filter(reservations::id.eq(reservation_id)))
                    .set((reservations::expires_at.eq(expires_at), reservations::updated_at.eq(now)))
                    .get_result::<ReservationRow>(conn)
                    .await?;
                Ok(ExtendOutcome::Extended(Reservation::try_from(row)?))
            })
        })
        .await
    }

    async fn convert_owner(&self, owner_key: &OwnerKey, reason: &str, now: DateTime<Utc>) -> Result<ConversionOutcome> {
        let mut conn = self.pool.get().await?;
        let owner = owner_key.to_string();
        let reason = reason.to_string();

        conn.transaction::<_, InventoryError, _>(|conn| {
            Box::pin(async move {
                // Lock products before holds, the same order try_reserve uses.
                let product_ids: Vec<Uuid> = reservations::table
                    .filter(reservations::owner_key.eq(&owner))
                    .select(reservations::product_id)
                    .distinct()
                    .load(conn)
                    .await?;
                if product_ids.is_empty() {
                    return Ok(ConversionOutcome::default());
                }

                let mut locked: HashMap<Uuid, Product> = products::table
                    .filter(products::id.eq_any(product_ids))
                    .order(products::id.asc())
                    .for_update()
                    .load::<ProductRow>(conn)
                    .await?
                    .into_iter()
                    .map(|row| (row.id, Product::from(row)))
                    .collect();

                let holds = reservations::table
                    .filter(reservations::owner_key.eq(&owner))
                    .order((reservations::product_id.asc(), reservations::id.asc()))
                    .for_update()
                    .load::<ReservationRow>(conn)
                    .await?;

                let mut outcome = ConversionOutcome::default();
                let mut consumed = Vec::with_capacity(holds.len());

                for row in holds {
                    let hold = Reservation::try_from(row)?;
                    consumed.push(hold.id);
                    if !hold.is_active(now) {
                        outcome.expired.push(hold);
                        continue;
                    }

                    let current = match locked.get(&hold.product_id) {
                        Some(product) => product.clone(),
                        // A hold added between the two reads above.
                        None => match lock_product(conn, hold.product_id).await? {
                            Some(product) => product,
                            None => {
                                warn!(reservation_id = %hold.id, product_id = %hold.product_id, "converting hold for missing product");
                                outcome.converted.push(ConvertedLine { reservation: hold, movement: None, product: None });
                                continue;
                            }
                        },
                    };
                    if !current.track_quantity {
                        outcome.converted.push(ConvertedLine { reservation: hold, movement: None, product: Some(current) });
                        continue;
                    }

                    let new_stock = (current.stock - hold.quantity).max(0);
                    let updated = write_stock(conn, &current, new_stock, now).await?;
                    let movement = Movement::record(
                        current.id,
                        MovementType::Out,
                        current.stock,
                        new_stock,
                        reason.as_str(),
                        Some(owner.clone()),
                        now,
                    );
                    append_movement(conn, &movement).await?;

                    locked.insert(updated.id, updated.clone());
                    outcome.converted.push(ConvertedLine { reservation: hold, movement: Some(movement), product: Some(updated) });
                }

                diesel::delete(reservations::table.filter(reservations::id.eq_any(consumed)))
                    .execute(conn)
                    .await?;

                Ok(outcome)
            })
        })
        .await
    }

    async fn apply_stock_change(&self, request: StockChangeRequest, now: DateTime<Utc>) -> Result<StockChangeOutcome> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, InventoryError, _>(|conn| {
            Box::pin(async move {
                let product = match lock_product(conn, request.product_id).await? {
                    Some(product) => product,
                    None => return Ok(StockChangeOutcome::ProductMissing),
                };
                let reserved = active_reserved(conn, product.id, now, None).await?;
                let new_stock = match next_stock(&product, reserved, request.change) {
                    Ok(stock) => stock,
                    Err((requested, available)) => {
                        return Ok(StockChangeOutcome::Insufficient { requested, available });
                    }
                };

                let movement_type = match request.change {
                    StockChange::Increase(_) => MovementType::In,
                    StockChange::Decrease(_) => MovementType::Out,
                    StockChange::Adjust(_) => MovementType::Adjustment,
                };
                let updated = write_stock(conn, &product, new_stock, now).await?;
                let movement = Movement::record(
                    product.id,
                    movement_type,
                    product.stock,
                    new_stock,
                    request.reason,
                    request.reference,
                    now,
                );
                append_movement(conn, &movement).await?;

                Ok(StockChangeOutcome::Applied { product: updated, movement })
            })
        })
        .await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<SweepOutcome> {
        let mut conn = self.pool.get().await?;
        let product_ids: Vec<Uuid> = diesel::delete(reservations::table.filter(reservations::expires_at.lt(now)))
            .returning(reservations::product_id)
            .get_results(&mut conn)
            .await?;

        let deleted = product_ids.len() as u64;
        let product_ids = product_ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        Ok(SweepOutcome { deleted, product_ids })
    }

    async fn reservation_stats(&self, now: DateTime<Utc>, horizon: DateTime<Utc>) -> Result<ReservationStats> {
        let mut conn = self.pool.get().await?;

        let grouped: Vec<(Uuid, i64, Option<i64>)> = reservations::table
            .filter(reservations::expires_at.gt(now))
            .group_by(reservations::product_id)
            .select((
                reservations::product_id,
                diesel::dsl::count_star(),
                diesel::dsl::sum(reservations::quantity),
            ))
            .order(reservations::product_id.asc())
            .load(&mut conn)
            .await?;

        let expiring_soon: i64 = reservations::table
            .filter(reservations::expires_at.gt(now))
            .filter(reservations::expires_at.le(horizon))
            .count()
            .get_result(&mut conn)
            .await?;

        let per_product: Vec<ProductReservationStats> = grouped
            .into_iter()
            .map(|(product_id, active_count, quantity)| ProductReservationStats {
                product_id,
                active_count,
                reserved_quantity: quantity.unwrap_or(0),
            })
            .collect();

        Ok(ReservationStats {
            total_active: per_product.iter().map(|s| s.active_count).sum(),
            total_quantity: per_product.iter().map(|s| s.reserved_quantity).sum(),
            expiring_soon,
            per_product,
        })
    }

    async fn movements(&self, product_id: Uuid, limit: i64) -> Result<Vec<Movement>> {
        let mut conn = self.pool.get().await?;
        let rows = stock_movements::table
            .filter(stock_movements::product_id.eq(product_id))
            .order((stock_movements::created_at.desc(), stock_movements::id.desc()))
            .limit(limit)
            .load::<MovementRow>(&mut conn)
            .await?;
        rows.into_iter().map(Movement::try_from).collect()
    }

    async fn find_processed_command(&self, idempotency_key: &str) -> Result<Option<StoredReply>> {
        let mut conn = self.pool.get().await?;
        let result = processed_commands::table
            .filter(processed_commands::idempotency_key.eq(idempotency_key))
            .first::<ProcessedCommand>(&mut conn)
            .await
            .optional()?;
        Ok(result.map(|processed| StoredReply {
            command_id: processed.command_id,
            reply: processed.result.unwrap_or(serde_json::Value::Null),
        }))
    }

    async fn record_processed_command(
        &self,
        idempotency_key: &str,
        reply: StoredReply,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let processed_command = ProcessedCommand {
            idempotency_key: idempotency_key.to_string(),
            command_id: reply.command_id,
            result: Some(reply.reply),
            processed_at: Some(now),
        };

        diesel::insert_into(processed_commands::table)
            .values(&processed_command)
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;

        Ok(())
    }
}
