//! Reservation Store and Availability Calculator operations.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;
use crate::bus::EventBus;
use crate::domain::aggregates::{ReservationTotals, Shortfall};
use crate::domain::events::{DomainEvent, ReservationEvent};
use crate::domain::value_objects::StockKey;
use crate::services::Policy;
use crate::store::{ReservationClaim, Store};
use crate::{EcommerceError, Result};

/// Outcome of a batch availability check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockCheck {
    pub all_available: bool,
    pub shortfalls: Vec<Shortfall>,
}

#[derive(Clone)]
pub struct ReservationService {
    store: Arc<dyn Store>,
    bus: EventBus,
    policy: Policy,
}

impl ReservationService {
    pub fn new(store: Arc<dyn Store>, bus: EventBus, policy: Policy) -> Self { Self { store, bus, policy } }

    /// Sets the shopper's claim on `key` to exactly `quantity` and restarts its lease.
    pub async fn reserve(&self, key: StockKey, shopper_id: Uuid, quantity: u32) -> Result<ReservationTotals> {
        if quantity == 0 { return Err(EcommerceError::InvalidQuantity); }
        let now = Utc::now();
        let expires_at = now + self.policy.reservation_ttl;
        let totals = match self.store.reserve(ReservationClaim { key, shopper_id, quantity, now, expires_at }).await {
            Ok(t) => t,
            Err(e @ EcommerceError::CapacityExceeded { .. }) => {
                tracing::info!(%key, %shopper_id, quantity, "reservation rejected: {e}");
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.bus.publish(&[DomainEvent::Reservation(ReservationEvent::Claimed { key, shopper_id, quantity, expires_at })]).await;
        Ok(totals)
    }

    /// Gives back up to `quantity` units of the shopper's claim.
    pub async fn release(&self, key: StockKey, shopper_id: Uuid, quantity: u32) -> Result<ReservationTotals> {
        if quantity == 0 { return Err(EcommerceError::InvalidQuantity); }
        let totals = self.store.release(&key, shopper_id, quantity).await?;
        self.bus.publish(&[DomainEvent::Reservation(ReservationEvent::Released { key, shopper_id, remaining: totals.reserved_quantity })]).await;
        Ok(totals)
    }

    /// Read-only gate: would the shopper be able to hold every line right now?
    /// Repeated keys are summed; unknown products count as zero stock.
    pub async fn check_stock(&self, shopper_id: Uuid, items: &[(StockKey, u32)]) -> Result<StockCheck> {
        let mut wanted: BTreeMap<StockKey, u32> = BTreeMap::new();
        for (key, quantity) in items {
            if *quantity == 0 { return Err(EcommerceError::InvalidQuantity); }
            let entry = wanted.entry(*key).or_default();
            *entry = entry.saturating_add(*quantity);
        }
        let mut shortfalls = vec![];
        for (key, requested) in wanted {
            let available = self.store.availability(&key, shopper_id).await?.map(|a| a.claimable()).unwrap_or(0);
            if available < requested { shortfalls.push(Shortfall::new(key, requested, available)); }
        }
        Ok(StockCheck { all_available: shortfalls.is_empty(), shortfalls })
    }
}
