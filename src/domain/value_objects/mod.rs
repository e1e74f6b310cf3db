//! Value Objects for inventory and checkout

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// SKU (Stock Keeping Unit) value object
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sku(String);

impl Sku {
    pub fn new(value: impl Into<String>) -> Result<Self, SkuError> {
        let value = value.into().trim().to_uppercase();
        if value.is_empty() { return Err(SkuError::Empty); }
        if value.len() > 50 { return Err(SkuError::TooLong); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone)] pub enum SkuError { Empty, TooLong }
impl std::error::Error for SkuError {}
impl fmt::Display for SkuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::Empty => write!(f, "SKU empty"), Self::TooLong => write!(f, "SKU too long") }
    }
}

/// Identifies one stock-keeping position: a product, or one variant of it.
///
/// Products without variants use `variant_id = None`. Persisted rows store the
/// nil UUID in that case so the composite key stays NOT NULL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockKey {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
}

impl StockKey {
    pub fn product(product_id: Uuid) -> Self { Self { product_id, variant_id: None } }
    pub fn variant(product_id: Uuid, variant_id: Uuid) -> Self { Self { product_id, variant_id: Some(variant_id) } }

    /// Column value for `variant_id`.
    pub fn variant_column(&self) -> Uuid { self.variant_id.unwrap_or(Uuid::nil()) }

    pub fn from_columns(product_id: Uuid, variant_id: Uuid) -> Self {
        Self { product_id, variant_id: (!variant_id.is_nil()).then_some(variant_id) }
    }
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_id {
            Some(v) => write!(f, "{}/{}", self.product_id, v),
            None => write!(f, "{}", self.product_id),
        }
    }
}

/// Money value object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money { amount: Decimal, currency: String }

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self { Self { amount, currency: currency.to_string() } }
    pub fn usd(amount: Decimal) -> Self { Self::new(amount, "USD") }
    pub fn zero(currency: &str) -> Self { Self::new(Decimal::ZERO, currency) }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        if self.currency != other.currency { return Err(MoneyError::CurrencyMismatch); }
        Ok(Money::new(self.amount + other.amount, &self.currency))
    }
    pub fn multiply(&self, qty: u32) -> Money { Money::new(self.amount * Decimal::from(qty), &self.currency) }

    /// Amount expressed in the smallest unit after shifting `scale` decimal places,
    /// e.g. `scale = 2` turns `12.34` into `1234`. `None` when a fraction would be
    /// left over or the result does not fit.
    pub fn minor_units(&self, scale: u32) -> Option<i64> {
        let shifted = self.amount.checked_mul(Decimal::from(10_i64.checked_pow(scale)?))?;
        if !shifted.fract().is_zero() { return None; }
        shifted.to_i64()
    }
}

impl Default for Money { fn default() -> Self { Self::zero("USD") } }

#[derive(Debug, Clone)] pub enum MoneyError { CurrencyMismatch }
impl std::error::Error for MoneyError {}
impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Currency mismatch") }
}

/// Quantity value object
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: u32) -> Self { Self(value) }
    pub fn value(&self) -> u32 { self.0 }
    pub fn saturating_subtract(&self, other: u32) -> Self { Self(self.0.saturating_sub(other)) }
}

impl Default for Quantity { fn default() -> Self { Self(0) } }

/// Payment gateways this service integrates with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    /// Wallet-style provider A.
    Wallet,
    /// Bank card gateway B.
    Bank,
    /// Wallet provider C.
    Ewallet,
}

impl PaymentProvider {
    pub const ALL: [PaymentProvider; 3] = [Self::Wallet, Self::Bank, Self::Ewallet];

    pub fn as_str(&self) -> &'static str {
        match self { Self::Wallet => "wallet", Self::Bank => "bank", Self::Ewallet => "ewallet" }
    }
}

impl fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl std::str::FromStr for PaymentProvider {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|p| p.as_str() == s).ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

/// How the shopper pays for an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cod,
    Wallet,
    Bank,
    Ewallet,
}

impl PaymentMethod {
    /// Gateway that collects the money, `None` for cash on delivery.
    pub fn provider(&self) -> Option<PaymentProvider> {
        match self {
            Self::Cod => None,
            Self::Wallet => Some(PaymentProvider::Wallet),
            Self::Bank => Some(PaymentProvider::Bank),
            Self::Ewallet => Some(PaymentProvider::Ewallet),
        }
    }

    pub fn is_online(&self) -> bool { self.provider().is_some() }

    pub fn as_str(&self) -> &'static str {
        match self.provider() { Some(p) => p.as_str(), None => "cod" }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl std::str::FromStr for PaymentMethod {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cod" => Ok(Self::Cod),
            "wallet" => Ok(Self::Wallet),
            "bank" => Ok(Self::Bank),
            "ewallet" => Ok(Self::Ewallet),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A persisted or user-supplied tag that matches no known variant.
#[derive(Debug, Clone, PartialEq, Eq)] pub struct UnknownVariant(pub String);
impl std::error::Error for UnknownVariant {}
impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Unknown variant: {}", self.0) }
}
