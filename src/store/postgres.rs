//! Postgres-backed store. Each mutating method is one transaction; stock rows are
//! taken `FOR UPDATE` before any reservation arithmetic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgConnection;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;
use crate::domain::aggregates::{
    Availability, Cart, CartItem, LineItem, Order, OrderError, OrderParts, PaymentResult, Reservation,
    ReservationTotals, StatusEntry, StockEffect, StockItem,
};
use crate::domain::events::{DomainEvent, StockEvent};
use crate::domain::value_objects::{Money, Quantity, Sku, StockKey, UnknownVariant};
use crate::store::{ApplyOutcome, CallbackOutcome, OrderEventRequest, ReservationClaim, Store};
use crate::{EcommerceError, Result};

#[derive(Clone)]
pub struct PgStore { pool: PgPool }

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[derive(sqlx::FromRow)]
struct StockRow { product_id: Uuid, variant_id: Uuid, sku: Option<String>, name: String, unit_price: Decimal, currency: String, total_stock: i32, updated_at: DateTime<Utc> }

impl From<StockRow> for StockItem {
    fn from(r: StockRow) -> Self {
        StockItem {
            key: StockKey::from_columns(r.product_id, r.variant_id), sku: r.sku.and_then(|s| Sku::new(s).ok()),
            name: r.name, unit_price: Money::new(r.unit_price, &r.currency),
            total_stock: Quantity::new(to_u32(r.total_stock.into())), updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReservationRow { id: Uuid, product_id: Uuid, variant_id: Uuid, shopper_id: Uuid, order_id: Option<Uuid>, quantity: i32, created_at: DateTime<Utc>, expires_at: DateTime<Utc>, is_active: bool }

impl From<ReservationRow> for Reservation {
    fn from(r: ReservationRow) -> Self {
        Reservation {
            id: r.id, key: StockKey::from_columns(r.product_id, r.variant_id), shopper_id: r.shopper_id, order_id: r.order_id,
            quantity: to_u32(r.quantity.into()), created_at: r.created_at, expires_at: r.expires_at, is_active: r.is_active,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CartRow { owner_id: Uuid, currency: String, items: Json<Vec<CartItem>>, created_at: DateTime<Utc>, updated_at: DateTime<Utc> }

impl From<CartRow> for Cart {
    fn from(r: CartRow) -> Self { Cart::restore(r.owner_id, &r.currency, r.items.0, r.created_at, r.updated_at) }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid, order_number: String, owner_id: Uuid, items: Json<Vec<LineItem>>, total: Decimal, currency: String,
    status: String, payment_status: String, payment_method: String, is_paid: bool, paid_at: Option<DateTime<Utc>>,
    payment_result: Option<Json<PaymentResult>>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct HistoryRow { status: String, note: String, created_at: DateTime<Utc> }

fn to_u32(v: i64) -> u32 { u32::try_from(v.max(0)).unwrap_or(u32::MAX) }

fn parse<T: std::str::FromStr<Err = UnknownVariant>>(column: &str, value: &str) -> Result<T> {
    value.parse().map_err(|e: UnknownVariant| EcommerceError::StorageError(format!("{column}: {e}")))
}

async fn availability(conn: &mut PgConnection, key: &StockKey, shopper_id: Uuid, lock: bool) -> Result<Option<Availability>> {
    let sql = if lock {
        "SELECT total_stock FROM stock_items WHERE product_id = $1 AND variant_id = $2 FOR UPDATE"
    } else {
        "SELECT total_stock FROM stock_items WHERE product_id = $1 AND variant_id = $2"
    };
    let Some(total) = sqlx::query_scalar::<_, i32>(sql).bind(key.product_id).bind(key.variant_column()).fetch_optional(&mut *conn).await? else { return Ok(None) };
    let (others, own): (i64, i64) = sqlx::query_as(
        "SELECT COALESCE(SUM(quantity) FILTER (WHERE shopper_id <> $3 OR order_id IS NOT NULL), 0)::BIGINT, \
                COALESCE(SUM(quantity) FILTER (WHERE shopper_id = $3 AND order_id IS NULL), 0)::BIGINT \
         FROM reservations WHERE product_id = $1 AND variant_id = $2 AND is_active")
        .bind(key.product_id).bind(key.variant_column()).bind(shopper_id).fetch_one(&mut *conn).await?;
    Ok(Some(Availability { total_stock: to_u32(total.into()), reserved_by_others: to_u32(others), own_reserved: to_u32(own) }))
}

async fn fetch_order(conn: &mut PgConnection, id: Uuid, lock: bool) -> Result<Option<Order>> {
    let sql = if lock { "SELECT * FROM orders WHERE id = $1 FOR UPDATE" } else { "SELECT * FROM orders WHERE id = $1" };
    let Some(row) = sqlx::query_as::<_, OrderRow>(sql).bind(id).fetch_optional(&mut *conn).await? else { return Ok(None) };
    let history = sqlx::query_as::<_, HistoryRow>("SELECT status, note, created_at FROM order_status_history WHERE order_id = $1 ORDER BY id")
        .bind(id).fetch_all(&mut *conn).await?;
    let status_history = history.into_iter()
        .map(|h| Ok(StatusEntry { status: parse("order_status_history.status", &h.status)?, note: h.note, date: h.created_at }))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(Order::restore(OrderParts {
        id: row.id, order_number: row.order_number, owner_id: row.owner_id, items: row.items.0,
        total: Money::new(row.total, &row.currency),
        status: parse("orders.status", &row.status)?,
        payment_status: parse("orders.payment_status", &row.payment_status)?,
        payment_method: parse("orders.payment_method", &row.payment_method)?,
        is_paid: row.is_paid, paid_at: row.paid_at, payment_result: row.payment_result.map(|j| j.0),
        status_history, created_at: row.created_at, updated_at: row.updated_at,
    })))
}

async fn insert_history(conn: &mut PgConnection, order_id: Uuid, entries: &[StatusEntry]) -> Result<()> {
    for e in entries {
        sqlx::query("INSERT INTO order_status_history (order_id, status, note, created_at) VALUES ($1, $2, $3, $4)")
            .bind(order_id).bind(e.status.as_str()).bind(&e.note).bind(e.date).execute(&mut *conn).await?;
    }
    Ok(())
}

async fn retire_order_reservations(conn: &mut PgConnection, order_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE reservations SET is_active = FALSE WHERE order_id = $1 AND is_active").bind(order_id).execute(&mut *conn).await?;
    Ok(())
}

async fn apply_stock_effect(conn: &mut PgConnection, order: &Order, effect: StockEffect) -> Result<Vec<DomainEvent>> {
    let mut events = vec![];
    match effect {
        StockEffect::None => {}
        StockEffect::Release => retire_order_reservations(conn, order.id()).await?,
        StockEffect::CommitSale => {
            // Lock stock rows in key order so concurrent commits cannot deadlock.
            let mut lines: Vec<&LineItem> = order.items().iter().collect();
            lines.sort_by_key(|l| l.key);
            for line in lines {
                let row = sqlx::query_as::<_, StockRow>("SELECT * FROM stock_items WHERE product_id = $1 AND variant_id = $2 FOR UPDATE")
                    .bind(line.key.product_id).bind(line.key.variant_column()).fetch_optional(&mut *conn).await?;
                let Some(row) = row else {
                    events.push(DomainEvent::Stock(StockEvent::Oversold { key: line.key, order_id: order.id(), shortfall: line.quantity }));
                    continue;
                };
                let mut item = StockItem::from(row);
                let sale = item.commit_sale(line.quantity);
                sqlx::query("UPDATE stock_items SET total_stock = $3, updated_at = $4 WHERE product_id = $1 AND variant_id = $2")
                    .bind(line.key.product_id).bind(line.key.variant_column()).bind(sale.remaining as i32).bind(item.updated_at)
                    .execute(&mut *conn).await?;
                events.push(DomainEvent::Stock(StockEvent::SaleCommitted { key: line.key, quantity: sale.sold, remaining: sale.remaining }));
                if sale.shortfall > 0 {
                    events.push(DomainEvent::Stock(StockEvent::Oversold { key: line.key, order_id: order.id(), shortfall: sale.shortfall }));
                }
            }
            retire_order_reservations(conn, order.id()).await?;
        }
    }
    Ok(events)
}

#[async_trait]
impl Store for PgStore {
    async fn put_stock_item(&self, item: StockItem) -> Result<()> {
        sqlx::query("INSERT INTO stock_items (product_id, variant_id, sku, name, unit_price, currency, total_stock, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                     ON CONFLICT (product_id, variant_id) DO UPDATE SET sku = EXCLUDED.sku, name = EXCLUDED.name, unit_price = EXCLUDED.unit_price, \
                     currency = EXCLUDED.currency, total_stock = EXCLUDED.total_stock, updated_at = EXCLUDED.updated_at")
            .bind(item.key.product_id).bind(item.key.variant_column()).bind(item.sku.as_ref().map(|s| s.as_str().to_string()))
            .bind(&item.name).bind(item.unit_price.amount()).bind(item.unit_price.currency())
            .bind(item.total_stock.value() as i32).bind(item.updated_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn stock_item(&self, key: &StockKey) -> Result<Option<StockItem>> {
        let row = sqlx::query_as::<_, StockRow>("SELECT * FROM stock_items WHERE product_id = $1 AND variant_id = $2")
            .bind(key.product_id).bind(key.variant_column()).fetch_optional(&self.pool).await?;
        Ok(row.map(StockItem::from))
    }

    async fn reserve(&self, claim: ReservationClaim) -> Result<ReservationTotals> {
        let mut tx = self.pool.begin().await?;
        let av = availability(&mut tx, &claim.key, claim.shopper_id, true).await?.ok_or(EcommerceError::ProductNotFound(claim.key))?;
        if !av.can_claim(claim.quantity) {
            return Err(EcommerceError::CapacityExceeded { key: claim.key, requested: claim.quantity, available: av.claimable() });
        }
        sqlx::query("INSERT INTO reservations (id, product_id, variant_id, shopper_id, order_id, quantity, created_at, expires_at, is_active) \
                     VALUES ($1, $2, $3, $4, NULL, $5, $6, $7, TRUE) \
                     ON CONFLICT (product_id, variant_id, shopper_id) WHERE order_id IS NULL \
                     DO UPDATE SET quantity = EXCLUDED.quantity, expires_at = EXCLUDED.expires_at, is_active = TRUE, \
                     created_at = CASE WHEN reservations.is_active THEN reservations.created_at ELSE EXCLUDED.created_at END")
            .bind(Uuid::now_v7()).bind(claim.key.product_id).bind(claim.key.variant_column()).bind(claim.shopper_id)
            .bind(claim.quantity as i32).bind(claim.now).bind(claim.expires_at)
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(av.totals_with(claim.quantity))
    }

    async fn release(&self, key: &StockKey, shopper_id: Uuid, quantity: u32) -> Result<ReservationTotals> {
        let mut tx = self.pool.begin().await?;
        if availability(&mut tx, key, shopper_id, true).await?.is_none() {
            return Err(EcommerceError::ProductNotFound(*key));
        }
        sqlx::query("UPDATE reservations SET quantity = GREATEST(quantity - $4, 0), is_active = quantity > $4 \
                     WHERE product_id = $1 AND variant_id = $2 AND shopper_id = $3 AND is_active AND order_id IS NULL")
            .bind(key.product_id).bind(key.variant_column()).bind(shopper_id).bind(i64::from(quantity))
            .execute(&mut *tx).await?;
        let av = availability(&mut tx, key, shopper_id, false).await?.ok_or(EcommerceError::ProductNotFound(*key))?;
        tx.commit().await?;
        Ok(av.totals_with(av.own_reserved))
    }

    async fn availability(&self, key: &StockKey, shopper_id: Uuid) -> Result<Option<Availability>> {
        let mut conn = self.pool.acquire().await?;
        availability(&mut conn, key, shopper_id, false).await
    }

    async fn active_reservation(&self, key: &StockKey, shopper_id: Uuid) -> Result<Option<Reservation>> {
        let row = sqlx::query_as::<_, ReservationRow>("SELECT * FROM reservations WHERE product_id = $1 AND variant_id = $2 AND shopper_id = $3 AND is_active AND order_id IS NULL")
            .bind(key.product_id).bind(key.variant_column()).bind(shopper_id).fetch_optional(&self.pool).await?;
        Ok(row.map(Reservation::from))
    }

    async fn expire_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>("UPDATE reservations SET is_active = FALSE WHERE is_active AND order_id IS NULL AND expires_at <= $1 RETURNING *")
            .bind(now).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Reservation::from).collect())
    }

    async fn cart(&self, owner_id: Uuid) -> Result<Option<Cart>> {
        let row = sqlx::query_as::<_, CartRow>("SELECT * FROM carts WHERE owner_id = $1").bind(owner_id).fetch_optional(&self.pool).await?;
        Ok(row.map(Cart::from))
    }

    async fn save_cart(&self, cart: &Cart) -> Result<()> {
        sqlx::query("INSERT INTO carts (owner_id, currency, items, created_at, updated_at) VALUES ($1, $2, $3, $4, $5) \
                     ON CONFLICT (owner_id) DO UPDATE SET currency = EXCLUDED.currency, items = EXCLUDED.items, updated_at = EXCLUDED.updated_at")
            .bind(cart.owner_id()).bind(cart.currency()).bind(Json(cart.items().to_vec())).bind(cart.created_at()).bind(cart.updated_at())
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_cart(&self, owner_id: Uuid) -> Result<bool> {
        let done = sqlx::query("DELETE FROM carts WHERE owner_id = $1").bind(owner_id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }

    async fn abandoned_carts(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
        Ok(sqlx::query_scalar::<_, Uuid>("SELECT owner_id FROM carts WHERE updated_at < $1").bind(cutoff).fetch_all(&self.pool).await?)
    }

    async fn purge_cart(&self, owner_id: Uuid, cutoff: DateTime<Utc>) -> Result<Option<Cart>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, CartRow>("DELETE FROM carts WHERE owner_id = $1 AND updated_at < $2 RETURNING *")
            .bind(owner_id).bind(cutoff).fetch_optional(&mut *tx).await?;
        let Some(cart) = row.map(Cart::from) else { return Ok(None) };
        for line in cart.items() {
            sqlx::query("UPDATE reservations SET is_active = FALSE WHERE product_id = $1 AND variant_id = $2 AND shopper_id = $3 AND is_active AND order_id IS NULL")
                .bind(line.key.product_id).bind(line.key.variant_column()).bind(owner_id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(Some(cart))
    }

    async fn insert_order(&self, order: &Order, effect: StockEffect, hold_until: DateTime<Utc>) -> Result<Vec<DomainEvent>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO orders (id, order_number, owner_id, items, total, currency, status, payment_status, payment_method, is_paid, paid_at, payment_result, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)")
            .bind(order.id()).bind(order.order_number()).bind(order.owner_id()).bind(Json(order.items().to_vec()))
            .bind(order.total().amount()).bind(order.total().currency()).bind(order.status().as_str())
            .bind(order.payment_status().as_str()).bind(order.payment_method().as_str()).bind(order.is_paid())
            .bind(order.paid_at()).bind(order.payment_result().cloned().map(Json)).bind(order.created_at()).bind(order.updated_at())
            .execute(&mut *tx).await?;
        insert_history(&mut tx, order.id(), order.status_history()).await?;
        for line in order.items() {
            sqlx::query("UPDATE reservations SET order_id = $4, expires_at = GREATEST(expires_at, $5) \
                         WHERE product_id = $1 AND variant_id = $2 AND shopper_id = $3 AND is_active AND order_id IS NULL")
                .bind(line.key.product_id).bind(line.key.variant_column()).bind(order.owner_id()).bind(order.id()).bind(hold_until)
                .execute(&mut *tx).await?;
        }
        let events = apply_stock_effect(&mut tx, order, effect).await?;
        tx.commit().await?;
        Ok(events)
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, id, false).await
    }

    async fn apply_order_event(&self, request: OrderEventRequest) -> Result<ApplyOutcome> {
        let mut tx = self.pool.begin().await?;
        let mut order = fetch_order(&mut tx, request.order_id, true).await?.ok_or(EcommerceError::OrderNotFound(request.order_id))?;

        let mut callback_row = None;
        if let Some(key) = &request.callback {
            let inserted = sqlx::query_scalar::<_, i64>("INSERT INTO payment_callbacks (provider, order_id, txn_key, outcome) VALUES ($1, $2, $3, $4) \
                                                        ON CONFLICT (provider, order_id, txn_key) DO NOTHING RETURNING id")
                .bind(key.provider.as_str()).bind(key.order_id).bind(&key.txn_key).bind(CallbackOutcome::Applied.as_str())
                .fetch_optional(&mut *tx).await?;
            let Some(id) = inserted else {
                let prior = sqlx::query_scalar::<_, String>("SELECT outcome FROM payment_callbacks WHERE provider = $1 AND order_id = $2 AND txn_key = $3")
                    .bind(key.provider.as_str()).bind(key.order_id).bind(&key.txn_key).fetch_one(&mut *tx).await?;
                return Ok(ApplyOutcome::Duplicate { order, prior: parse("payment_callbacks.outcome", &prior)? });
            };
            callback_row = Some(id);
        }

        let recorded = order.status_history().len();
        match order.apply(request.event, request.note, request.now) {
            Ok(transition) => {
                sqlx::query("UPDATE orders SET status = $2, payment_status = $3, is_paid = $4, paid_at = $5, payment_result = $6, updated_at = $7 WHERE id = $1")
                    .bind(order.id()).bind(order.status().as_str()).bind(order.payment_status().as_str()).bind(order.is_paid())
                    .bind(order.paid_at()).bind(order.payment_result().cloned().map(Json)).bind(order.updated_at())
                    .execute(&mut *tx).await?;
                insert_history(&mut tx, order.id(), &order.status_history()[recorded..]).await?;
                let mut events = order.take_events();
                events.extend(apply_stock_effect(&mut tx, &order, transition.stock_effect).await?);
                tx.commit().await?;
                Ok(ApplyOutcome::Applied { order, transition, events })
            }
            Err(OrderError::InvalidTransition(error)) => {
                if let Some(id) = callback_row {
                    sqlx::query("UPDATE payment_callbacks SET outcome = $2 WHERE id = $1")
                        .bind(id).bind(CallbackOutcome::Ignored.as_str()).execute(&mut *tx).await?;
                }
                tx.commit().await?;
                Ok(ApplyOutcome::Rejected { order, error })
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn unpaid_orders_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
        Ok(sqlx::query_scalar::<_, Uuid>("SELECT id FROM orders WHERE status IN ('draft', 'awaiting_payment') AND created_at < $1")
            .bind(cutoff).fetch_all(&self.pool).await?)
    }
}
