//! Cleanup Scheduler: periodic sweep of lapsed reservations, abandoned carts and
//! orders whose payment never arrived.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use crate::bus::EventBus;
use crate::domain::aggregates::LifecycleEvent;
use crate::domain::events::{DomainEvent, ReservationEvent};
use crate::services::Policy;
use crate::store::{ApplyOutcome, OrderEventRequest, Store};
use crate::Result;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub expired_reservations: usize,
    pub purged_carts: usize,
    pub timed_out_orders: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool { *self == Self::default() }
}

#[derive(Clone)]
pub struct CleanupScheduler {
    store: Arc<dyn Store>,
    bus: EventBus,
    policy: Policy,
}

impl CleanupScheduler {
    pub fn new(store: Arc<dyn Store>, bus: EventBus, policy: Policy) -> Self { Self { store, bus, policy } }

    /// One pass of every sweep. Each step is idempotent; re-running with the same
    /// `now` finds nothing left to do.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut events = vec![];

        report.expired_reservations = self.store.expire_reservations(now).await?.len();
        if report.expired_reservations > 0 {
            events.push(DomainEvent::Reservation(ReservationEvent::Expired { count: report.expired_reservations }));
        }

        let cart_cutoff = now - self.policy.cart_retention;
        for owner_id in self.store.abandoned_carts(cart_cutoff).await? {
            // The shopper may have touched the cart since it was listed.
            if self.store.purge_cart(owner_id, cart_cutoff).await?.is_some() {
                report.purged_carts += 1;
            }
        }

        let payment_cutoff = now - self.policy.payment_timeout - self.policy.payment_grace;
        for order_id in self.store.unpaid_orders_before(payment_cutoff).await? {
            let request = OrderEventRequest {
                order_id,
                event: LifecycleEvent::PaymentFailed { result: None, reason: "payment timed out".into() },
                note: "Payment window elapsed".into(),
                callback: None,
                now,
            };
            match self.store.apply_order_event(request).await? {
                ApplyOutcome::Applied { events: more, .. } => {
                    report.timed_out_orders += 1;
                    events.extend(more);
                }
                // A callback got there first.
                ApplyOutcome::Rejected { .. } | ApplyOutcome::Duplicate { .. } => {}
            }
        }

        if report.is_empty() {
            tracing::debug!("cleanup sweep found nothing");
        } else {
            tracing::info!(
                expired_reservations = report.expired_reservations,
                purged_carts = report.purged_carts,
                timed_out_orders = report.timed_out_orders,
                "cleanup sweep"
            );
        }
        self.bus.publish(&events).await;
        Ok(report)
    }

    /// Runs [`Self::run_once`] every `period` until the task is aborted.
    pub fn spawn(self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(err) = self.run_once(Utc::now()).await {
                    tracing::error!(error = %err, "cleanup sweep failed");
                }
            }
        })
    }
}
