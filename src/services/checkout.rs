//! Checkout: turns the shopper's cart into an order.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;
use crate::bus::EventBus;
use crate::domain::aggregates::{LifecycleEvent, LineItem, Order, StockEffect};
use crate::domain::value_objects::PaymentMethod;
use crate::payments::{Gateways, PaymentRequest};
use crate::services::{Policy, ReservationService};
use crate::store::{ApplyOutcome, OrderEventRequest, Store};
use crate::{EcommerceError, Result};

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutReceipt {
    pub order: Order,
    /// Where to send the shopper for online methods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pay_url: Option<String>,
}

#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn Store>,
    reservations: ReservationService,
    gateways: Arc<Gateways>,
    bus: EventBus,
    policy: Policy,
    public_base_url: String,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn Store>, reservations: ReservationService, gateways: Arc<Gateways>, bus: EventBus,
        policy: Policy, public_base_url: String,
    ) -> Self {
        Self { store, reservations, gateways, bus, policy, public_base_url: public_base_url.trim_end_matches('/').to_string() }
    }

    pub fn callback_url(&self, method: PaymentMethod) -> String {
        format!("{}/payments/{}/callback", self.public_base_url, method.as_str())
    }

    /// Places an order for everything in the shopper's cart.
    ///
    /// Stock is checked and re-claimed first, so a cart whose reservations lapsed
    /// either gets them back or fails with `OutOfStock` before anything is written.
    /// Cash on delivery commits the sale immediately; online methods hold the
    /// reservations for the payment window and return the gateway URL.
    pub async fn place_order(&self, owner_id: Uuid, method: PaymentMethod, return_url: Option<String>) -> Result<CheckoutReceipt> {
        let adapter = method.provider().map(|p| self.gateways.get(p)).transpose()?;
        let cart = self.store.cart(owner_id).await?.filter(|c| !c.is_empty()).ok_or(EcommerceError::EmptyCart)?;

        let wanted: Vec<_> = cart.items().iter().map(|i| (i.key, i.quantity)).collect();
        let check = self.reservations.check_stock(owner_id, &wanted).await?;
        if !check.all_available {
            tracing::info!(%owner_id, shortfalls = check.shortfalls.len(), "checkout blocked by stock");
            return Err(EcommerceError::OutOfStock { shortfalls: check.shortfalls });
        }
        for (key, quantity) in &wanted {
            self.reservations.reserve(*key, owner_id, *quantity).await?;
        }

        let lines = cart.items().iter()
            .map(|i| LineItem { key: i.key, name: i.name.clone(), quantity: i.quantity, unit_price: i.unit_price.clone(), total: i.line_total() })
            .collect();
        let now = Utc::now();
        let mut order = Order::create(owner_id, lines, method, now)?;
        let hold_until = now + self.policy.payment_timeout;

        // Sign before persisting so a gateway misconfiguration leaves no half-placed order.
        let signed = match adapter {
            Some(adapter) => Some(adapter.build_request(&PaymentRequest {
                order_id: order.id(),
                amount: order.total().clone(),
                description: format!("Payment for order {}", order.order_number()),
                return_url: return_url.unwrap_or_else(|| format!("{}/orders/{}", self.public_base_url, order.id())),
                callback_url: self.callback_url(method),
                created_at: now,
                expires_at: hold_until,
            })?),
            None => None,
        };

        let effect = if method.is_online() { StockEffect::None } else { StockEffect::CommitSale };
        let mut events = order.take_events();
        events.extend(self.store.insert_order(&order, effect, hold_until).await?);
        self.store.delete_cart(owner_id).await?;

        if let Some(signed) = &signed {
            let outcome = self.store.apply_order_event(OrderEventRequest {
                order_id: order.id(),
                event: LifecycleEvent::GatewayRequested { provider: signed.provider },
                note: format!("Redirected to {}", signed.provider),
                callback: None,
                now,
            }).await?;
            if let ApplyOutcome::Applied { order: updated, events: more, .. } = outcome {
                order = updated;
                events.extend(more);
            }
        }

        tracing::info!(order_id = %order.id(), %owner_id, method = %method, total = %order.total().amount(), "order placed");
        self.bus.publish(&events).await;
        Ok(CheckoutReceipt { order, pay_url: signed.map(|s| s.pay_url) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use crate::domain::aggregates::{OrderStatus, PaymentStatus};
    use crate::domain::value_objects::{PaymentProvider, StockKey};
    use crate::services::testkit::{kit, seed, seed_priced};

    #[tokio::test]
    async fn test_cod_commits_sale_at_checkout() {
        let k = kit();
        let key = seed(&k.store, 3, "USD").await;
        let owner = Uuid::new_v4();
        k.carts.set_item(owner, key, 2).await.unwrap();
        let receipt = k.checkout.place_order(owner, PaymentMethod::Cod, None).await.unwrap();
        assert!(receipt.pay_url.is_none());
        assert_eq!(receipt.order.status(), OrderStatus::Pending);
        assert!(!receipt.order.is_paid());
        assert_eq!(k.store.stock_item(&key).await.unwrap().unwrap().total_stock.value(), 1);
        assert!(k.store.active_reservation(&key, owner).await.unwrap().is_none());
        assert!(k.store.cart(owner).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_online_order_awaits_payment_and_binds_claims() {
        let k = kit();
        let key = seed(&k.store, 3, "USD").await;
        let owner = Uuid::new_v4();
        k.carts.set_item(owner, key, 2).await.unwrap();
        let receipt = k.checkout.place_order(owner, PaymentMethod::Bank, Some("https://shop.example/thanks".into())).await.unwrap();
        let order = &receipt.order;
        assert_eq!(order.status(), OrderStatus::AwaitingPayment);
        assert_eq!(order.payment_status(), PaymentStatus::AwaitingPayment);
        assert_eq!(order.status_history().len(), 2);
        let pay_url = receipt.pay_url.unwrap();
        assert!(pay_url.contains("bk_TxnRef="));
        assert!(pay_url.contains("bk_Amount=2000"));

        assert!(k.store.active_reservation(&key, owner).await.unwrap().is_none());
        let av = k.store.availability(&key, owner).await.unwrap().unwrap();
        assert_eq!((av.reserved_by_others, av.own_reserved), (2, 0));
        assert_eq!(k.store.stock_item(&key).await.unwrap().unwrap().total_stock.value(), 3);
    }

    #[tokio::test]
    async fn test_second_checkout_blocked_while_first_is_unpaid() {
        let k = kit();
        let key = seed(&k.store, 2, "USD").await;
        let owner = Uuid::new_v4();
        k.carts.set_item(owner, key, 2).await.unwrap();
        let first = k.checkout.place_order(owner, PaymentMethod::Wallet, None).await.unwrap().order;

        // The unpaid order holds both units against its own shopper too.
        let err = k.carts.set_item(owner, key, 2).await.unwrap_err();
        assert!(matches!(err, EcommerceError::CapacityExceeded { available: 0, .. }));
        assert!(matches!(k.reservations.reserve(key, owner, 1).await, Err(EcommerceError::CapacityExceeded { .. })));
        assert!(matches!(k.checkout.place_order(owner, PaymentMethod::Wallet, None).await, Err(EcommerceError::EmptyCart)));

        // Giving back an open claim that does not exist leaves the order's hold alone.
        k.reservations.release(key, owner, 2).await.unwrap();
        assert!(matches!(k.reservations.reserve(key, Uuid::new_v4(), 1).await, Err(EcommerceError::CapacityExceeded { .. })));
        assert_eq!(k.store.order(first.id()).await.unwrap().unwrap().status(), OrderStatus::AwaitingPayment);
    }

    #[tokio::test]
    async fn test_stale_cart_cannot_oversell_a_pending_order() {
        let k = kit();
        let key = seed(&k.store, 2, "USD").await;
        let owner = Uuid::new_v4();
        k.carts.set_item(owner, key, 2).await.unwrap();
        let cart = k.store.cart(owner).await.unwrap().unwrap();
        k.checkout.place_order(owner, PaymentMethod::Wallet, None).await.unwrap();

        // A second tab resubmits the same cart.
        k.store.save_cart(&cart).await.unwrap();
        let err = k.checkout.place_order(owner, PaymentMethod::Wallet, None).await.unwrap_err();
        let EcommerceError::OutOfStock { shortfalls } = err else { panic!("expected OutOfStock, got {err}") };
        assert_eq!((shortfalls[0].requested, shortfalls[0].available), (2, 0));
    }

    #[tokio::test]
    async fn test_wallet_rejects_fractional_totals() {
        let k = kit();
        let key = seed_priced(&k.store, 1, Decimal::new(1099, 2), "USD").await;
        let owner = Uuid::new_v4();
        k.carts.set_item(owner, key, 1).await.unwrap();
        let err = k.checkout.place_order(owner, PaymentMethod::Wallet, None).await.unwrap_err();
        assert!(matches!(err, EcommerceError::UnchargeableAmount { provider: PaymentProvider::Wallet, .. }));
        assert!(k.store.cart(owner).await.unwrap().is_some());

        // Two decimal places are exact for the bank.
        let receipt = k.checkout.place_order(owner, PaymentMethod::Bank, None).await.unwrap();
        assert!(receipt.pay_url.unwrap().contains("bk_Amount=1099"));
    }

    #[tokio::test]
    async fn test_empty_cart() {
        let k = kit();
        assert!(matches!(k.checkout.place_order(Uuid::new_v4(), PaymentMethod::Cod, None).await, Err(EcommerceError::EmptyCart)));
    }

    #[tokio::test]
    async fn test_lapsed_claim_taken_by_someone_else() {
        let k = kit();
        let key = seed(&k.store, 1, "USD").await;
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        k.carts.set_item(a, key, 1).await.unwrap();
        k.store.expire_reservations(Utc::now() + chrono::Duration::hours(1)).await.unwrap();
        k.reservations.reserve(key, b, 1).await.unwrap();

        let err = k.checkout.place_order(a, PaymentMethod::Cod, None).await.unwrap_err();
        let EcommerceError::OutOfStock { shortfalls } = err else { panic!("expected OutOfStock, got {err}") };
        assert_eq!(shortfalls[0].available, 0);
        assert!(k.store.cart(a).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_disabled_provider() {
        let mut k = kit();
        k.checkout.gateways = Arc::new(Gateways::default());
        let key: StockKey = seed(&k.store, 1, "USD").await;
        let owner = Uuid::new_v4();
        k.carts.set_item(owner, key, 1).await.unwrap();
        let err = k.checkout.place_order(owner, PaymentMethod::Wallet, None).await.unwrap_err();
        assert!(matches!(err, EcommerceError::UnsupportedPaymentMethod(_)));
        assert!(k.store.cart(owner).await.unwrap().is_some());
    }
}
