use axum::{body::Body, http::{header, HeaderMap, Request, StatusCode}, Router};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;
use opensase_checkout::api::{self, identity::SHOPPER_HEADER, AppState};
use opensase_checkout::bus::EventBus;
use opensase_checkout::domain::aggregates::StockItem;
use opensase_checkout::domain::value_objects::{Money, StockKey};
use opensase_checkout::payments::{signature, BankConfig, BankGateway, EwalletConfig, EwalletGateway, Gateways};
use opensase_checkout::services::Policy;
use opensase_checkout::store::{MemoryStore, Store};

const BANK_SECRET: &str = "bank-secret";
const EWALLET_KEY2: &str = "ewallet-key2";

struct TestApp {
    app: Router,
    store: Arc<dyn Store>,
}

fn test_app() -> TestApp {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let gateways = Arc::new(Gateways::new(
        None,
        Some(BankGateway::new(BankConfig {
            merchant_id: "MERCH01".into(), hash_secret: BANK_SECRET.into(),
            endpoint: "https://bank.example/pay".into(), locale: "en".into(),
        })),
        Some(EwalletGateway::new(EwalletConfig {
            app_id: "2553".into(), key1: "ewallet-key1".into(), key2: EWALLET_KEY2.into(),
            endpoint: "https://ewallet.example/create".into(),
        })),
    ));
    let state = AppState::new(store.clone(), gateways, EventBus::default(), Policy::default(), "https://api.example".into());
    TestApp { app: api::router(state), store }
}

async fn seed(store: &Arc<dyn Store>, stock: u32) -> StockKey {
    let key = StockKey::product(Uuid::new_v4());
    store.put_stock_item(StockItem::create(key, "Widget", Money::usd(Decimal::new(10, 0)), stock)).await.unwrap();
    key
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let (status, headers) = (resp.status(), resp.headers().clone());
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 64).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, headers, body)
}

fn json_request(method: &str, uri: &str, shopper: Option<Uuid>, body: Value) -> Request<Body> {
    let mut req = Request::builder().method(method).uri(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(s) = shopper { req = req.header(SHOPPER_HEADER, s.to_string()); }
    req.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, shopper: Uuid) -> Request<Body> {
    Request::builder().uri(uri).header(SHOPPER_HEADER, shopper.to_string()).body(Body::empty()).unwrap()
}

/// Bank notification fields in the order the bank signs them.
fn bank_fields(order_id: Uuid, amount_minor: i64, response_code: &str, txn_no: &str) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = [
        ("bk_MerchantId", "MERCH01".to_string()), ("bk_TxnRef", order_id.simple().to_string()),
        ("bk_Amount", amount_minor.to_string()), ("bk_OrderInfo", "Order".to_string()),
        ("bk_BankCode", "NCB".to_string()), ("bk_TransactionNo", txn_no.to_string()),
        ("bk_ResponseCode", response_code.to_string()), ("bk_TransactionStatus", response_code.to_string()),
        ("bk_PayDate", "20240101120000".to_string()),
    ].into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    let canonical = signature::canonical_string(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    fields.push(("bk_SecureHash".into(), signature::sign(BANK_SECRET, &canonical).unwrap()));
    fields
}

fn bank_form(fields: &[(String, String)]) -> Request<Body> {
    let body = url::form_urlencoded::Serializer::new(String::new()).extend_pairs(fields).finish();
    Request::builder().method("POST").uri("/payments/bank/callback")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body)).unwrap()
}

fn ewallet_fields(order_id: Uuid, amount: i64, return_code: &str, trans_id: &str) -> Value {
    let fields = [
        ("app_id", "2553".to_string()), ("app_trans_id", format!("240101_{}", order_id.simple())),
        ("app_time", "1700000000000".to_string()), ("app_user", "shopper".to_string()),
        ("amount", amount.to_string()), ("trans_id", trans_id.to_string()),
        ("server_time", "1700000001000".to_string()), ("channel", "38".to_string()),
        ("return_code", return_code.to_string()),
    ];
    let canonical = signature::canonical_string(fields.iter().map(|(k, v)| (*k, v.as_str())));
    let mut body: serde_json::Map<String, Value> = fields.into_iter().map(|(k, v)| (k.to_string(), Value::String(v))).collect();
    body.insert("mac".into(), Value::String(signature::sign(EWALLET_KEY2, &canonical).unwrap()));
    Value::Object(body)
}

/// Puts `quantity` units in a fresh shopper's cart and checks out with `method`.
async fn checkout(t: &TestApp, key: StockKey, quantity: u32, method: &str) -> (Uuid, Value) {
    let shopper = Uuid::new_v4();
    let (status, _, _) = send(&t.app, json_request("PUT", "/cart/items", Some(shopper), json!({"productId": key.product_id, "quantity": quantity}))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, receipt) = send(&t.app, json_request("POST", "/orders", Some(shopper), json!({"paymentMethod": method}))).await;
    assert_eq!(status, StatusCode::CREATED, "{receipt}");
    (shopper, receipt)
}

#[tokio::test]
async fn health() {
    let t = test_app();
    let (status, _, body) = send(&t.app, Request::builder().uri("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn reservation_capacity_is_a_409() {
    let t = test_app();
    let key = seed(&t.store, 1).await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let (status, _, body) = send(&t.app, json_request("POST", "/reservations", Some(a), json!({"productId": key.product_id, "quantity": 1}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"availableStock": 0, "reservedQuantity": 1}));

    let (status, headers, body) = send(&t.app, json_request("POST", "/reservations", Some(b), json!({"productId": key.product_id, "quantity": 1}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(headers.get("X-Error-Code").unwrap(), "capacity_exceeded");
    assert_eq!(body["shortfalls"][0]["available"], 0);

    let (status, _, body) = send(&t.app, json_request("POST", "/stock/check", Some(b), json!({"items": [{"productId": key.product_id, "quantity": 1}]}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allAvailable"], false);

    let (status, _, body) = send(&t.app, json_request("DELETE", "/reservations", Some(a), json!({"productId": key.product_id, "quantity": 1}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["availableStock"], 1);
}

#[tokio::test]
async fn requests_need_a_shopper_and_valid_bodies() {
    let t = test_app();
    let key = seed(&t.store, 1).await;
    let (status, headers, _) = send(&t.app, json_request("POST", "/reservations", None, json!({"productId": key.product_id, "quantity": 1}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(headers.get("X-Error-Code").unwrap(), "missing_shopper");

    let (status, headers, _) = send(&t.app, json_request("POST", "/reservations", Some(Uuid::new_v4()), json!({"productId": key.product_id, "quantity": 0}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(headers.get("X-Error-Code").unwrap(), "validation_failed");

    let (status, headers, _) = send(&t.app, json_request("POST", "/orders", Some(Uuid::new_v4()), json!({"paymentMethod": "cod"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(headers.get("X-Error-Code").unwrap(), "empty_cart");

    let (status, headers, _) = send(&t.app, json_request("POST", "/orders", Some(Uuid::new_v4()), json!({"paymentMethod": "wallet"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(headers.get("X-Error-Code").unwrap(), "unsupported_payment_method");
}

#[tokio::test]
async fn bank_checkout_callback_and_duplicate() {
    let t = test_app();
    let key = seed(&t.store, 1).await;
    let (shopper, receipt) = checkout(&t, key, 1, "bank").await;
    let order_id: Uuid = receipt["order"]["id"].as_str().unwrap().parse().unwrap();
    assert_eq!(receipt["order"]["status"], "awaiting_payment");
    assert!(receipt["payUrl"].as_str().unwrap().contains("bk_Amount=1000"));

    let fields = bank_fields(order_id, 1000, "00", "14000001");
    let (status, _, ack) = send(&t.app, bank_form(&fields)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, json!({"RspCode": "00", "Message": "Confirm Success"}));

    let (_, _, order) = send(&t.app, get(&format!("/orders/{order_id}"), shopper)).await;
    assert_eq!(order["isPaid"], true);
    assert_eq!(order["paymentStatus"], "paid");
    assert_eq!(order["status"], "pending");
    let history = order["statusHistory"].as_array().unwrap().len();
    assert_eq!(t.store.stock_item(&key).await.unwrap().unwrap().total_stock.value(), 0);

    let (_, _, ack) = send(&t.app, bank_form(&fields)).await;
    assert_eq!(ack["RspCode"], "00");
    let (_, _, again) = send(&t.app, get(&format!("/orders/{order_id}"), shopper)).await;
    assert_eq!(again["statusHistory"].as_array().unwrap().len(), history);
    assert_eq!(t.store.stock_item(&key).await.unwrap().unwrap().total_stock.value(), 0);

    // Someone else's order reads as missing.
    let (status, _, _) = send(&t.app, get(&format!("/orders/{order_id}"), Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unpaid_order_keeps_its_stock_from_its_own_shopper() {
    let t = test_app();
    let key = seed(&t.store, 2).await;
    let (shopper, receipt) = checkout(&t, key, 2, "bank").await;
    let order_id: Uuid = receipt["order"]["id"].as_str().unwrap().parse().unwrap();

    let (status, headers, _) = send(&t.app, json_request("PUT", "/cart/items", Some(shopper), json!({"productId": key.product_id, "quantity": 2}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(headers.get("X-Error-Code").unwrap(), "capacity_exceeded");
    let (status, _, body) = send(&t.app, json_request("DELETE", "/reservations", Some(shopper), json!({"productId": key.product_id, "quantity": 2}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"availableStock": 0, "reservedQuantity": 0}));

    let (_, _, ack) = send(&t.app, bank_form(&bank_fields(order_id, 2000, "00", "14000010"))).await;
    assert_eq!(ack["RspCode"], "00");
    assert_eq!(t.store.stock_item(&key).await.unwrap().unwrap().total_stock.value(), 0);
}

#[tokio::test]
async fn tampered_bank_callback_is_not_acknowledged() {
    let t = test_app();
    let key = seed(&t.store, 1).await;
    let (shopper, receipt) = checkout(&t, key, 1, "bank").await;
    let order_id: Uuid = receipt["order"]["id"].as_str().unwrap().parse().unwrap();

    let mut fields = bank_fields(order_id, 1000, "24", "0");
    for (k, v) in fields.iter_mut() {
        if k == "bk_ResponseCode" { *v = "00".into(); }
    }
    let (status, _, ack) = send(&t.app, bank_form(&fields)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["RspCode"], "97");

    let (_, _, order) = send(&t.app, get(&format!("/orders/{order_id}"), shopper)).await;
    assert_eq!(order["isPaid"], false);
    assert_eq!(order["status"], "awaiting_payment");
    assert_eq!(t.store.stock_item(&key).await.unwrap().unwrap().total_stock.value(), 1);

    let (_, _, ack) = send(&t.app, bank_form(&bank_fields(order_id, 999, "00", "14000002"))).await;
    assert_eq!(ack["RspCode"], "04");
    let (_, _, ack) = send(&t.app, bank_form(&bank_fields(Uuid::new_v4(), 1000, "00", "14000003"))).await;
    assert_eq!(ack["RspCode"], "01");
}

#[tokio::test]
async fn return_url_confirmation_then_late_callback() {
    let t = test_app();
    let key = seed(&t.store, 2).await;
    let (shopper, receipt) = checkout(&t, key, 2, "ewallet").await;
    let order_id: Uuid = receipt["order"]["id"].as_str().unwrap().parse().unwrap();
    let params = ewallet_fields(order_id, 20, "1", "240101000123");

    let (status, _, order) = send(&t.app, json_request("POST", &format!("/orders/{order_id}/confirm/ewallet"), Some(shopper), params.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["isPaid"], true);

    let (status, _, ack) = send(&t.app, json_request("POST", "/payments/ewallet/callback", None, params)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, json!({"return_code": 2, "return_message": "duplicate"}));
    assert_eq!(t.store.stock_item(&key).await.unwrap().unwrap().total_stock.value(), 0);

    let mut forged = ewallet_fields(order_id, 20, "1", "240101000124");
    forged["mac"] = Value::String("00".repeat(32));
    let (_, _, ack) = send(&t.app, json_request("POST", "/payments/ewallet/callback", None, forged)).await;
    assert_eq!(ack["return_code"], -1);
}

#[tokio::test]
async fn confirmation_signed_for_another_order_is_refused() {
    let t = test_app();
    let key = seed(&t.store, 2).await;
    let (shopper, mine) = checkout(&t, key, 1, "ewallet").await;
    let (other, theirs) = checkout(&t, key, 1, "ewallet").await;
    let mine: Uuid = mine["order"]["id"].as_str().unwrap().parse().unwrap();
    let theirs: Uuid = theirs["order"]["id"].as_str().unwrap().parse().unwrap();

    let params = ewallet_fields(theirs, 10, "1", "240101000200");
    let (status, headers, _) = send(&t.app, json_request("POST", &format!("/orders/{mine}/confirm/ewallet"), Some(shopper), params)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(headers.get("X-Error-Code").unwrap(), "malformed_callback");

    let (_, _, order) = send(&t.app, get(&format!("/orders/{theirs}"), other)).await;
    assert_eq!(order["status"], "awaiting_payment");
    assert_eq!(order["isPaid"], false);
    assert_eq!(t.store.stock_item(&key).await.unwrap().unwrap().total_stock.value(), 2);
}

#[tokio::test]
async fn staff_lifecycle_over_http() {
    let t = test_app();
    let key = seed(&t.store, 1).await;
    let (shopper, receipt) = checkout(&t, key, 1, "cod").await;
    let order_id = receipt["order"]["id"].as_str().unwrap().to_string();
    assert_eq!(receipt["order"]["status"], "pending");
    assert!(receipt.get("payUrl").is_none());

    for event in ["process", "ship", "deliver"] {
        let (status, _, order) = send(&t.app, json_request("POST", &format!("/orders/{order_id}/transitions"), None, json!({"event": event}))).await;
        assert_eq!(status, StatusCode::OK, "{event}: {order}");
    }
    let (_, _, order) = send(&t.app, get(&format!("/orders/{order_id}"), shopper)).await;
    assert_eq!(order["status"], "delivered");
    assert_eq!(order["isPaid"], true);

    let (status, headers, _) = send(&t.app, json_request("POST", &format!("/orders/{order_id}/transitions"), None, json!({"event": "cancel"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(headers.get("X-Error-Code").unwrap(), "invalid_transition");
}
