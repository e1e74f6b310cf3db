//! OpenSASE Checkout
//!
//! Inventory reservation and payment reconciliation for the OpenSASE storefront.
//!
//! ## Features
//! - Time-boxed stock reservations that can never oversell
//! - Cart sessions that claim stock as lines change
//! - Checkout with cash on delivery or one of three payment gateways
//! - Signed, idempotent gateway callback reconciliation
//! - Order lifecycle state machine with an append-only history
//! - Background sweep of expired reservations, abandoned carts and unpaid orders

use thiserror::Error;
use uuid::Uuid;

pub mod api;
pub mod bus;
pub mod config;
pub mod domain;
pub mod payments;
pub mod services;
pub mod store;

use domain::aggregates::{CartError, InvalidTransition, OrderError, Shortfall};
use domain::value_objects::{PaymentProvider, StockKey};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum EcommerceError {
    #[error("Product not found: {0}")]
    ProductNotFound(StockKey),

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Cart item not found")]
    CartItemNotFound,

    #[error("Insufficient stock for {key}: requested {requested}, available {available}")]
    CapacityExceeded { key: StockKey, requested: u32, available: u32 },

    #[error("Some items are out of stock")]
    OutOfStock { shortfalls: Vec<Shortfall> },

    #[error("Invalid quantity")]
    InvalidQuantity,

    #[error("Currency mismatch")]
    CurrencyMismatch,

    #[error("Payment method not available: {0}")]
    UnsupportedPaymentMethod(String),

    #[error("Payment gateway configuration error: {0}")]
    PaymentConfig(String),

    #[error("Invalid {provider} callback signature")]
    SignatureInvalid { provider: PaymentProvider },

    #[error("Malformed {provider} callback: {reason}")]
    MalformedCallback { provider: PaymentProvider, reason: String },

    #[error("{provider} cannot charge exactly {amount} {currency}")]
    UnchargeableAmount { provider: PaymentProvider, amount: rust_decimal::Decimal, currency: String },

    #[error("Amount mismatch on order {order_id}: expected {expected}, received {received}")]
    AmountMismatch { order_id: Uuid, expected: i64, received: i64 },

    #[error("Invalid transition: {0}")]
    InvalidTransition(InvalidTransition),

    #[error("Invalid order: {0}")]
    InvalidOrder(OrderError),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl From<OrderError> for EcommerceError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::InvalidTransition(t) => Self::InvalidTransition(t),
            other => Self::InvalidOrder(other),
        }
    }
}

impl From<CartError> for EcommerceError {
    fn from(e: CartError) -> Self {
        match e {
            CartError::ItemNotFound => Self::CartItemNotFound,
            CartError::InvalidQuantity => Self::InvalidQuantity,
            CartError::CurrencyMismatch => Self::CurrencyMismatch,
        }
    }
}

impl From<sqlx::Error> for EcommerceError {
    fn from(e: sqlx::Error) -> Self { Self::StorageError(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, EcommerceError>;
