use axum::{extract::{Path, Query, State}, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;
use crate::api::{error::{ApiError, ApiResult}, identity::ShopperId, AppState};
use crate::domain::aggregates::{Cart, LifecycleEvent, Order, ReservationTotals};
use crate::domain::value_objects::{PaymentMethod, PaymentProvider, StockKey};
use crate::payments::CallbackPayload;
use crate::services::{CheckoutReceipt, StockCheck};
use crate::EcommerceError;

fn stock_key(product_id: Uuid, variant_id: Option<Uuid>) -> StockKey { StockKey { product_id, variant_id } }

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1))]
    pub quantity: u32,
}

/// Sets the shopper's claim to exactly `quantity`; it does not add to an existing claim.
pub async fn reserve(State(s): State<AppState>, ShopperId(shopper): ShopperId, Json(r): Json<ReservationRequest>) -> ApiResult<Json<ReservationTotals>> {
    r.validate()?;
    Ok(Json(s.reservations.reserve(stock_key(r.product_id, r.variant_id), shopper, r.quantity).await?))
}

pub async fn release(State(s): State<AppState>, ShopperId(shopper): ShopperId, Json(r): Json<ReservationRequest>) -> ApiResult<Json<ReservationTotals>> {
    r.validate()?;
    Ok(Json(s.reservations.release(stock_key(r.product_id, r.variant_id), shopper, r.quantity).await?))
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLine { pub product_id: Uuid, pub variant_id: Option<Uuid>, pub quantity: u32 }

#[derive(Debug, Deserialize, Validate)]
pub struct StockCheckRequest {
    #[validate(length(min = 1))]
    pub items: Vec<StockLine>,
}

pub async fn check_stock(State(s): State<AppState>, ShopperId(shopper): ShopperId, Json(r): Json<StockCheckRequest>) -> ApiResult<Json<StockCheck>> {
    r.validate()?;
    let items: Vec<_> = r.items.iter().map(|i| (stock_key(i.product_id, i.variant_id), i.quantity)).collect();
    Ok(Json(s.reservations.check_stock(shopper, &items).await?))
}

pub async fn get_cart(State(s): State<AppState>, ShopperId(shopper): ShopperId) -> ApiResult<Json<Cart>> {
    Ok(Json(s.carts.get(shopper).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemRequest { pub product_id: Uuid, pub variant_id: Option<Uuid>, pub quantity: u32 }

pub async fn set_cart_item(State(s): State<AppState>, ShopperId(shopper): ShopperId, Json(r): Json<CartItemRequest>) -> ApiResult<Json<Cart>> {
    Ok(Json(s.carts.set_item(shopper, stock_key(r.product_id, r.variant_id), r.quantity).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantParams { pub variant_id: Option<Uuid> }

pub async fn remove_cart_item(
    State(s): State<AppState>, ShopperId(shopper): ShopperId, Path(product_id): Path<Uuid>, Query(p): Query<VariantParams>,
) -> ApiResult<Json<Cart>> {
    Ok(Json(s.carts.remove_item(shopper, stock_key(product_id, p.variant_id)).await?))
}

pub async fn clear_cart(State(s): State<AppState>, ShopperId(shopper): ShopperId) -> ApiResult<StatusCode> {
    s.carts.clear(shopper).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub payment_method: PaymentMethod,
    #[validate(url)]
    pub return_url: Option<String>,
}

pub async fn place_order(State(s): State<AppState>, ShopperId(shopper): ShopperId, Json(r): Json<CheckoutRequest>) -> ApiResult<(StatusCode, Json<CheckoutReceipt>)> {
    r.validate()?;
    let receipt = s.checkout.place_order(shopper, r.payment_method, r.return_url).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// Loads an order the shopper owns; someone else's order reads as missing.
async fn owned_order(s: &AppState, shopper: Uuid, id: Uuid) -> ApiResult<Order> {
    s.store.order(id).await?
        .filter(|o| o.owner_id() == shopper)
        .ok_or_else(|| EcommerceError::OrderNotFound(id).into())
}

/// Status polling for when the gateway callback is slow.
pub async fn get_order(State(s): State<AppState>, ShopperId(shopper): ShopperId, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(owned_order(&s, shopper, id).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct TransitionRequest {
    pub event: String,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

fn staff_event(name: &str) -> ApiResult<LifecycleEvent> {
    match name {
        "process" => Ok(LifecycleEvent::StartProcessing),
        "ship" => Ok(LifecycleEvent::Ship),
        "deliver" => Ok(LifecycleEvent::Deliver),
        "cancel" => Ok(LifecycleEvent::Cancel),
        other => Err(ApiError::bad_request("unknown_event", format!("unknown event {other:?}"))),
    }
}

pub async fn transition_order(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<TransitionRequest>) -> ApiResult<Json<Order>> {
    r.validate()?;
    let event = staff_event(r.event.trim())?;
    Ok(Json(s.reconciler.transition(id, event, r.note).await?))
}

/// Applies the signed parameters the gateway appended to the return URL.
/// Goes through the same reconciliation as the server-to-server callback, so
/// whichever of the two lands first wins and the other is a no-op.
pub async fn confirm_payment(
    State(s): State<AppState>, ShopperId(shopper): ShopperId, Path((id, provider)): Path<(Uuid, String)>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<Order>> {
    let provider: PaymentProvider = provider.parse().map_err(|_| EcommerceError::UnsupportedPaymentMethod(provider.clone()))?;
    owned_order(&s, shopper, id).await?;
    let payload = CallbackPayload::from_json(&body)
        .ok_or_else(|| ApiError::bad_request("malformed_callback", "expected the redirect parameters as an object"))?;
    let resolution = s.reconciler.confirm_return(provider, id, &payload).await?;
    Ok(Json(resolution.order().clone()))
}
