//! In-process store. One lock around all state makes every method linearizable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;
use crate::domain::aggregates::{
    Availability, Cart, Order, OrderError, OrderStatus, Reservation, ReservationTotals, StockEffect, StockItem,
};
use crate::domain::events::{DomainEvent, StockEvent};
use crate::domain::value_objects::StockKey;
use crate::store::{ApplyOutcome, CallbackKey, CallbackOutcome, OrderEventRequest, ReservationClaim, Store};
use crate::{EcommerceError, Result};

/// `(key, shopper, order)`; `None` is the shopper's open claim.
type ClaimSlot = (StockKey, Uuid, Option<Uuid>);

fn open_slot(key: StockKey, shopper_id: Uuid) -> ClaimSlot { (key, shopper_id, None) }

#[derive(Default)]
struct Inner {
    stock: HashMap<StockKey, StockItem>,
    reservations: HashMap<ClaimSlot, Reservation>,
    carts: HashMap<Uuid, Cart>,
    orders: HashMap<Uuid, Order>,
    callbacks: HashMap<CallbackKey, CallbackOutcome>,
}

impl Inner {
    fn availability(&self, key: &StockKey, shopper_id: Uuid) -> Option<Availability> {
        let item = self.stock.get(key)?;
        let rows = self.reservations.values().filter(|r| r.key == *key);
        Some(Availability::compute(item.total_stock.value(), rows, shopper_id))
    }

    fn retire_order_reservations(&mut self, order_id: Uuid) {
        self.reservations.values_mut()
            .filter(|r| r.is_active && r.order_id == Some(order_id))
            .for_each(Reservation::deactivate);
    }

    fn apply_stock_effect(&mut self, order: &Order, effect: StockEffect) -> Vec<DomainEvent> {
        let mut events = vec![];
        match effect {
            StockEffect::None => {}
            StockEffect::Release => self.retire_order_reservations(order.id()),
            StockEffect::CommitSale => {
                for line in order.items() {
                    let Some(item) = self.stock.get_mut(&line.key) else {
                        events.push(DomainEvent::Stock(StockEvent::Oversold { key: line.key, order_id: order.id(), shortfall: line.quantity }));
                        continue;
                    };
                    let sale = item.commit_sale(line.quantity);
                    events.push(DomainEvent::Stock(StockEvent::SaleCommitted { key: line.key, quantity: sale.sold, remaining: sale.remaining }));
                    if sale.shortfall > 0 {
                        events.push(DomainEvent::Stock(StockEvent::Oversold { key: line.key, order_id: order.id(), shortfall: sale.shortfall }));
                    }
                }
                self.retire_order_reservations(order.id());
            }
        }
        events
    }
}

#[derive(Default)]
pub struct MemoryStore { inner: Mutex<Inner> }

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_stock_item(&self, item: StockItem) -> Result<()> {
        self.inner.lock().await.stock.insert(item.key, item);
        Ok(())
    }

    async fn stock_item(&self, key: &StockKey) -> Result<Option<StockItem>> {
        Ok(self.inner.lock().await.stock.get(key).cloned())
    }

    async fn reserve(&self, claim: ReservationClaim) -> Result<ReservationTotals> {
        let mut inner = self.inner.lock().await;
        let av = inner.availability(&claim.key, claim.shopper_id).ok_or(EcommerceError::ProductNotFound(claim.key))?;
        if !av.can_claim(claim.quantity) {
            return Err(EcommerceError::CapacityExceeded { key: claim.key, requested: claim.quantity, available: av.claimable() });
        }
        let ttl = claim.expires_at - claim.now;
        match inner.reservations.entry(open_slot(claim.key, claim.shopper_id)) {
            Entry::Occupied(mut e) => e.get_mut().replace_quantity(claim.quantity, claim.now, ttl),
            Entry::Vacant(e) => { e.insert(Reservation::new(claim.key, claim.shopper_id, claim.quantity, claim.now, ttl)); }
        }
        Ok(av.totals_with(claim.quantity))
    }

    async fn release(&self, key: &StockKey, shopper_id: Uuid, quantity: u32) -> Result<ReservationTotals> {
        let mut inner = self.inner.lock().await;
        if !inner.stock.contains_key(key) { return Err(EcommerceError::ProductNotFound(*key)); }
        if let Some(r) = inner.reservations.get_mut(&open_slot(*key, shopper_id)).filter(|r| r.is_open()) {
            r.release(quantity);
        }
        let av = inner.availability(key, shopper_id).ok_or(EcommerceError::ProductNotFound(*key))?;
        Ok(av.totals_with(av.own_reserved))
    }

    async fn availability(&self, key: &StockKey, shopper_id: Uuid) -> Result<Option<Availability>> {
        Ok(self.inner.lock().await.availability(key, shopper_id))
    }

    async fn active_reservation(&self, key: &StockKey, shopper_id: Uuid) -> Result<Option<Reservation>> {
        Ok(self.inner.lock().await.reservations.get(&open_slot(*key, shopper_id)).filter(|r| r.is_open()).cloned())
    }

    async fn expire_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>> {
        let mut inner = self.inner.lock().await;
        let mut expired = vec![];
        for r in inner.reservations.values_mut().filter(|r| r.is_open() && r.is_expired(now)) {
            r.deactivate();
            expired.push(r.clone());
        }
        Ok(expired)
    }

    async fn cart(&self, owner_id: Uuid) -> Result<Option<Cart>> {
        Ok(self.inner.lock().await.carts.get(&owner_id).cloned())
    }

    async fn save_cart(&self, cart: &Cart) -> Result<()> {
        self.inner.lock().await.carts.insert(cart.owner_id(), cart.clone());
        Ok(())
    }

    async fn delete_cart(&self, owner_id: Uuid) -> Result<bool> {
        Ok(self.inner.lock().await.carts.remove(&owner_id).is_some())
    }

    async fn abandoned_carts(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let inner = self.inner.lock().await;
        Ok(inner.carts.values().filter(|c| c.is_abandoned(cutoff)).map(Cart::owner_id).collect())
    }

    async fn purge_cart(&self, owner_id: Uuid, cutoff: DateTime<Utc>) -> Result<Option<Cart>> {
        let mut inner = self.inner.lock().await;
        if !inner.carts.get(&owner_id).is_some_and(|c| c.is_abandoned(cutoff)) { return Ok(None); }
        let Some(cart) = inner.carts.remove(&owner_id) else { return Ok(None) };
        for line in cart.items() {
            if let Some(r) = inner.reservations.get_mut(&open_slot(line.key, owner_id)).filter(|r| r.is_open()) {
                r.deactivate();
            }
        }
        Ok(Some(cart))
    }

    async fn insert_order(&self, order: &Order, effect: StockEffect, hold_until: DateTime<Utc>) -> Result<Vec<DomainEvent>> {
        let mut inner = self.inner.lock().await;
        if inner.orders.contains_key(&order.id()) {
            return Err(EcommerceError::StorageError(format!("order {} already exists", order.id())));
        }
        for line in order.items() {
            if let Some(mut r) = inner.reservations.remove(&open_slot(line.key, order.owner_id())).filter(Reservation::is_open) {
                r.bind_to_order(order.id(), hold_until);
                inner.reservations.insert((line.key, order.owner_id(), Some(order.id())), r);
            }
        }
        let events = inner.apply_stock_effect(order, effect);
        let mut stored = order.clone();
        stored.take_events();
        inner.orders.insert(order.id(), stored);
        Ok(events)
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.inner.lock().await.orders.get(&id).cloned())
    }

    async fn apply_order_event(&self, request: OrderEventRequest) -> Result<ApplyOutcome> {
        let mut inner = self.inner.lock().await;
        let mut order = inner.orders.get(&request.order_id).cloned().ok_or(EcommerceError::OrderNotFound(request.order_id))?;
        if let Some(prior) = request.callback.as_ref().and_then(|k| inner.callbacks.get(k)) {
            return Ok(ApplyOutcome::Duplicate { order, prior: *prior });
        }
        match order.apply(request.event, request.note, request.now) {
            Ok(transition) => {
                let mut events = order.take_events();
                events.extend(inner.apply_stock_effect(&order, transition.stock_effect));
                if let Some(key) = request.callback { inner.callbacks.insert(key, CallbackOutcome::Applied); }
                inner.orders.insert(order.id(), order.clone());
                Ok(ApplyOutcome::Applied { order, transition, events })
            }
            Err(OrderError::InvalidTransition(error)) => {
                if let Some(key) = request.callback { inner.callbacks.insert(key, CallbackOutcome::Ignored); }
                Ok(ApplyOutcome::Rejected { order, error })
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn unpaid_orders_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let inner = self.inner.lock().await;
        Ok(inner.orders.values()
            .filter(|o| matches!(o.status(), OrderStatus::Draft | OrderStatus::AwaitingPayment) && o.created_at() < cutoff)
            .map(Order::id)
            .collect())
    }
}
