//! Reservation Aggregate and availability arithmetic

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::StockKey;

/// A time-boxed claim by one shopper against one stock position.
///
/// A shopper has at most one open claim per key; claiming again replaces its
/// quantity instead of adding to it. Checkout binds the open claim to an order,
/// after which only the order's lifecycle may retire it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Uuid,
    pub key: StockKey,
    pub shopper_id: Uuid,
    /// Set once checkout binds the claim to an order awaiting payment.
    pub order_id: Option<Uuid>,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Reservation {
    pub fn new(key: StockKey, shopper_id: Uuid, quantity: u32, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self { id: Uuid::now_v7(), key, shopper_id, order_id: None, quantity, created_at: now, expires_at: now + ttl, is_active: true }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { self.expires_at <= now }

    /// Active and not yet bound to an order.
    pub fn is_open(&self) -> bool { self.is_active && self.order_id.is_none() }

    /// Upsert semantics: the claim becomes exactly `quantity` and its lease restarts.
    pub fn replace_quantity(&mut self, quantity: u32, now: DateTime<Utc>, ttl: Duration) {
        if !self.is_active { self.created_at = now; }
        self.quantity = quantity;
        self.expires_at = now + ttl;
        self.is_active = true;
    }

    /// Gives back up to `quantity` units. Releasing more than held clamps at zero
    /// and deactivates the row.
    pub fn release(&mut self, quantity: u32) {
        self.quantity = self.quantity.saturating_sub(quantity);
        if self.quantity == 0 { self.is_active = false; }
    }

    pub fn bind_to_order(&mut self, order_id: Uuid, expires_at: DateTime<Utc>) {
        self.order_id = Some(order_id);
        if expires_at > self.expires_at { self.expires_at = expires_at; }
    }

    pub fn deactivate(&mut self) { self.is_active = false; }
}

/// Totals reported back to the shopper after a claim changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationTotals {
    /// Stock not held by any active reservation, the caller's included.
    pub available_stock: u32,
    pub reserved_quantity: u32,
}

/// Snapshot of one stock position from the point of view of one shopper.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Availability {
    pub total_stock: u32,
    pub reserved_by_others: u32,
    pub own_reserved: u32,
}

impl Availability {
    /// Only the requester's open claim counts as theirs. Claims bound to one of
    /// their orders are held against them like anyone else's.
    pub fn compute<'a>(total_stock: u32, reservations: impl IntoIterator<Item = &'a Reservation>, requester: Uuid) -> Self {
        let (mut others, mut own) = (0u32, 0u32);
        for r in reservations.into_iter().filter(|r| r.is_active) {
            if r.shopper_id == requester && r.order_id.is_none() { own = own.saturating_add(r.quantity); }
            else { others = others.saturating_add(r.quantity); }
        }
        Self { total_stock, reserved_by_others: others, own_reserved: own }
    }

    /// What the requester may claim in total: stock minus everyone else's claims.
    pub fn claimable(&self) -> u32 { self.total_stock.saturating_sub(self.reserved_by_others) }

    pub fn can_claim(&self, quantity: u32) -> bool { self.claimable() >= quantity }

    /// Totals after the requester's claim is set to `reserved`.
    pub fn totals_with(&self, reserved: u32) -> ReservationTotals {
        ReservationTotals {
            available_stock: self.total_stock.saturating_sub(self.reserved_by_others).saturating_sub(reserved),
            reserved_quantity: reserved,
        }
    }
}

/// One line that a batch stock check could not satisfy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shortfall {
    pub product_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<Uuid>,
    pub requested: u32,
    pub available: u32,
}

impl Shortfall {
    pub fn new(key: StockKey, requested: u32, available: u32) -> Self {
        Self { product_id: key.product_id, variant_id: key.variant_id, requested, available }
    }
}
