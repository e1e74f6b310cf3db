//! Datastore seam.
//!
//! Every operation that must not interleave with another (claiming stock,
//! applying an order event together with its stock effect and callback dedup
//! record) is a single method here so each backend can make it atomic:
//! [`MemoryStore`] behind one lock, [`PgStore`] inside one transaction with row locks.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use crate::domain::aggregates::{
    Availability, Cart, InvalidTransition, LifecycleEvent, Order, Reservation, ReservationTotals, StockEffect,
    StockItem, Transition,
};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::{PaymentProvider, StockKey, UnknownVariant};
use crate::Result;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A request to set the shopper's claim on `key` to exactly `quantity`.
#[derive(Clone, Debug)]
pub struct ReservationClaim {
    pub key: StockKey,
    pub shopper_id: Uuid,
    pub quantity: u32,
    pub now: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Identity of one gateway notification, used to apply it at most once.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallbackKey {
    pub provider: PaymentProvider,
    pub order_id: Uuid,
    /// Provider transaction id, or `code:<result code>` when the provider sent none.
    pub txn_key: String,
}

impl CallbackKey {
    pub fn new(provider: PaymentProvider, order_id: Uuid, provider_txn_id: Option<&str>, result_code: &str) -> Self {
        let txn_key = match provider_txn_id {
            Some(id) => id.to_string(),
            None => format!("code:{result_code}"),
        };
        Self { provider, order_id, txn_key }
    }
}

/// What happened the first time a callback was applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    Applied,
    /// Verified but not reachable from the order's state at the time.
    Ignored,
}

impl CallbackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Applied => "applied", Self::Ignored => "ignored" }
    }
}

impl fmt::Display for CallbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl std::str::FromStr for CallbackOutcome {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "applied" => Ok(Self::Applied),
            "ignored" => Ok(Self::Ignored),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A lifecycle event plus the bookkeeping that must commit with it.
#[derive(Clone, Debug)]
pub struct OrderEventRequest {
    pub order_id: Uuid,
    pub event: LifecycleEvent,
    pub note: String,
    pub callback: Option<CallbackKey>,
    pub now: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub enum ApplyOutcome {
    Applied { order: Order, transition: Transition, events: Vec<DomainEvent> },
    /// The callback key was seen before; nothing was changed.
    Duplicate { order: Order, prior: CallbackOutcome },
    /// The state machine refused the event; nothing but the dedup record was written.
    Rejected { order: Order, error: InvalidTransition },
}

impl ApplyOutcome {
    pub fn order(&self) -> &Order {
        match self {
            Self::Applied { order, .. } | Self::Duplicate { order, .. } | Self::Rejected { order, .. } => order,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    // Stock ledger
    async fn put_stock_item(&self, item: StockItem) -> Result<()>;
    async fn stock_item(&self, key: &StockKey) -> Result<Option<StockItem>>;

    // Reservations
    /// Claims stock iff `total_stock - reserved_by_others >= quantity`, replacing
    /// the caller's open claim. Claims bound to an order are never touched here
    /// and count as `reserved_by_others`, even for their owner. Fails with
    /// `CapacityExceeded` without writing.
    async fn reserve(&self, claim: ReservationClaim) -> Result<ReservationTotals>;
    /// Shrinks the caller's open claim, clamping at zero.
    async fn release(&self, key: &StockKey, shopper_id: Uuid, quantity: u32) -> Result<ReservationTotals>;
    async fn availability(&self, key: &StockKey, shopper_id: Uuid) -> Result<Option<Availability>>;
    /// The caller's open claim, if any.
    async fn active_reservation(&self, key: &StockKey, shopper_id: Uuid) -> Result<Option<Reservation>>;
    /// Deactivates every open claim whose lease ended at or before `now`. Claims
    /// bound to an order live until the order is paid, fails or is cancelled.
    async fn expire_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>>;

    // Carts
    async fn cart(&self, owner_id: Uuid) -> Result<Option<Cart>>;
    async fn save_cart(&self, cart: &Cart) -> Result<()>;
    async fn delete_cart(&self, owner_id: Uuid) -> Result<bool>;
    async fn abandoned_carts(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>>;
    /// Deletes the cart if it is still older than `cutoff`, deactivating the
    /// owner's unbound reservations for its lines first.
    async fn purge_cart(&self, owner_id: Uuid, cutoff: DateTime<Utc>) -> Result<Option<Cart>>;

    // Orders
    /// Stores a new order, binds the owner's open claims for its lines to it
    /// with a lease ending at `hold_until`, and applies `effect` in the same unit of work.
    async fn insert_order(&self, order: &Order, effect: StockEffect, hold_until: DateTime<Utc>) -> Result<Vec<DomainEvent>>;
    async fn order(&self, id: Uuid) -> Result<Option<Order>>;
    async fn apply_order_event(&self, request: OrderEventRequest) -> Result<ApplyOutcome>;
    /// Orders still waiting for a gateway that were created before `cutoff`.
    async fn unpaid_orders_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_key_falls_back_to_result_code() {
        let order = Uuid::new_v4();
        let with_txn = CallbackKey::new(PaymentProvider::Bank, order, Some("123"), "00");
        assert_eq!(with_txn.txn_key, "123");
        let without = CallbackKey::new(PaymentProvider::Bank, order, None, "24");
        assert_eq!(without.txn_key, "code:24");
        assert_ne!(without, CallbackKey::new(PaymentProvider::Bank, order, None, "00"));
    }
}
