//! Application services: the operations the HTTP layer and the background
//! sweep call, each composed from one or more atomic [`Store`](crate::store::Store) methods.

pub mod cart;
pub mod checkout;
pub mod cleanup;
pub mod reconciler;
pub mod reservations;

use chrono::Duration;
use crate::config::Config;

pub use cart::CartService;
pub use checkout::{CheckoutReceipt, CheckoutService};
pub use cleanup::{CleanupScheduler, SweepReport};
pub use reconciler::{CallbackResolution, Reconciler};
pub use reservations::{ReservationService, StockCheck};

/// Currency of a cart that has never held a line.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Lease lengths and retention windows shared by the services.
#[derive(Clone, Copy, Debug)]
pub struct Policy {
    pub reservation_ttl: Duration,
    pub cart_retention: Duration,
    pub payment_timeout: Duration,
    /// Extra time an unpaid order gets past its payment lease before the sweep fails it.
    pub payment_grace: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::minutes(15),
            cart_retention: Duration::days(7),
            payment_timeout: Duration::minutes(15),
            payment_grace: Duration::minutes(1),
        }
    }
}

impl From<&Config> for Policy {
    fn from(c: &Config) -> Self {
        Self { reservation_ttl: c.reservation_ttl, cart_retention: c.cart_retention, payment_timeout: c.payment_timeout, ..Self::default() }
    }
}

#[cfg(test)]
pub(crate) mod testkit {
    use rust_decimal::Decimal;
    use std::sync::Arc;
    use uuid::Uuid;
    use crate::bus::EventBus;
    use crate::domain::aggregates::StockItem;
    use crate::domain::value_objects::{Money, StockKey};
    use crate::payments::{bank, ewallet, wallet, Gateways};
    use crate::store::{MemoryStore, Store};
    use super::*;

    pub(crate) struct Kit {
        pub store: Arc<dyn Store>,
        pub reservations: ReservationService,
        pub carts: CartService,
        pub checkout: CheckoutService,
        pub reconciler: Reconciler,
        pub cleanup: CleanupScheduler,
    }

    pub(crate) fn kit() -> Kit {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let gateways = Arc::new(Gateways::new(
            Some(wallet::tests::gateway()), Some(bank::tests::gateway()), Some(ewallet::tests::gateway()),
        ));
        let bus = EventBus::default();
        let policy = Policy::default();
        let reservations = ReservationService::new(store.clone(), bus.clone(), policy);
        Kit {
            carts: CartService::new(store.clone(), reservations.clone()),
            checkout: CheckoutService::new(store.clone(), reservations.clone(), gateways.clone(), bus.clone(), policy, "https://api.example".into()),
            reconciler: Reconciler::new(store.clone(), gateways, bus.clone()),
            cleanup: CleanupScheduler::new(store.clone(), bus, policy),
            reservations,
            store,
        }
    }

    /// Seeds a product priced at 10 units of `currency`.
    pub(crate) async fn seed(store: &Arc<dyn Store>, stock: u32, currency: &str) -> StockKey {
        seed_priced(store, stock, Decimal::new(10, 0), currency).await
    }

    pub(crate) async fn seed_priced(store: &Arc<dyn Store>, stock: u32, price: Decimal, currency: &str) -> StockKey {
        let key = StockKey::product(Uuid::new_v4());
        store.put_stock_item(StockItem::create(key, "Widget", Money::new(price, currency), stock)).await.unwrap();
        key
    }
}
