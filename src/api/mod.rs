//! HTTP surface: the storefront's cart and checkout calls plus one callback
//! endpoint per payment provider.

pub mod callbacks;
pub mod error;
pub mod handlers;
pub mod identity;

use axum::{routing::{delete, get, post, put}, Json, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use crate::bus::EventBus;
use crate::payments::Gateways;
use crate::services::{CartService, CheckoutService, Policy, Reconciler, ReservationService};
use crate::store::Store;

pub use error::{ApiError, ApiResult};
pub use identity::ShopperId;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub reservations: ReservationService,
    pub carts: CartService,
    pub checkout: CheckoutService,
    pub reconciler: Reconciler,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, gateways: Arc<Gateways>, bus: EventBus, policy: Policy, public_base_url: String) -> Self {
        let reservations = ReservationService::new(store.clone(), bus.clone(), policy);
        Self {
            carts: CartService::new(store.clone(), reservations.clone()),
            checkout: CheckoutService::new(store.clone(), reservations.clone(), gateways.clone(), bus.clone(), policy, public_base_url),
            reconciler: Reconciler::new(store.clone(), gateways, bus),
            reservations,
            store,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-checkout"})) }))
        .route("/reservations", post(handlers::reserve).delete(handlers::release))
        .route("/stock/check", post(handlers::check_stock))
        .route("/cart", get(handlers::get_cart).delete(handlers::clear_cart))
        .route("/cart/items", put(handlers::set_cart_item))
        .route("/cart/items/:product_id", delete(handlers::remove_cart_item))
        .route("/orders", post(handlers::place_order))
        .route("/orders/:id", get(handlers::get_order))
        .route("/orders/:id/transitions", post(handlers::transition_order))
        .route("/orders/:id/confirm/:provider", post(handlers::confirm_payment))
        .route("/payments/wallet/callback", post(callbacks::wallet_callback))
        .route("/payments/bank/callback", get(callbacks::bank_ipn).post(callbacks::bank_callback))
        .route("/payments/ewallet/callback", post(callbacks::ewallet_callback))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state)
}
