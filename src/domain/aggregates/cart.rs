//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::{Money, StockKey};

/// A shopper's working cart. One per owner; the owner id doubles as the cart id.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    owner_id: Uuid,
    items: Vec<CartItem>,
    subtotal: Money,
    currency: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub key: StockKey,
    pub name: String,
    pub quantity: u32,
    /// Price captured when the line was last changed.
    pub unit_price: Money,
}

impl CartItem {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
}

impl Cart {
    pub fn new(owner_id: Uuid, currency: &str) -> Self {
        let now = Utc::now();
        Self { owner_id, items: vec![], subtotal: Money::zero(currency), currency: currency.to_string(), created_at: now, updated_at: now }
    }

    /// Rebuilds a cart from persisted parts without bumping `updated_at`.
    pub fn restore(owner_id: Uuid, currency: &str, items: Vec<CartItem>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        let mut cart = Self { owner_id, items, subtotal: Money::zero(currency), currency: currency.to_string(), created_at, updated_at };
        cart.subtotal = cart.compute_subtotal();
        cart
    }

    pub fn owner_id(&self) -> Uuid { self.owner_id }
    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn subtotal(&self) -> &Money { &self.subtotal }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn item(&self, key: &StockKey) -> Option<&CartItem> { self.items.iter().find(|i| i.key == *key) }

    /// Sets the line for `item.key` to exactly `item.quantity`, matching reservation semantics.
    pub fn set_item(&mut self, item: CartItem) -> Result<(), CartError> {
        if item.quantity == 0 { return Err(CartError::InvalidQuantity); }
        if item.unit_price.currency() != self.currency { return Err(CartError::CurrencyMismatch); }
        match self.items.iter_mut().find(|i| i.key == item.key) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
        self.recalculate();
        Ok(())
    }

    pub fn remove_item(&mut self, key: &StockKey) -> Result<CartItem, CartError> {
        let pos = self.items.iter().position(|i| i.key == *key).ok_or(CartError::ItemNotFound)?;
        let removed = self.items.remove(pos);
        self.recalculate();
        Ok(removed)
    }


    pub fn is_abandoned(&self, cutoff: DateTime<Utc>) -> bool { self.updated_at < cutoff }

    fn compute_subtotal(&self) -> Money {
        self.items.iter().fold(Money::zero(&self.currency), |acc, i| acc.add(&i.line_total()).unwrap_or(acc))
    }

    fn recalculate(&mut self) {
        self.subtotal = self.compute_subtotal();
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CartError { ItemNotFound, InvalidQuantity, CurrencyMismatch }
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ItemNotFound => write!(f, "Item not found"),
            Self::InvalidQuantity => write!(f, "Invalid quantity"),
            Self::CurrencyMismatch => write!(f, "Currency mismatch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn widget(key: StockKey, quantity: u32) -> CartItem {
        CartItem { key, name: "Widget".into(), quantity, unit_price: Money::usd(Decimal::new(10, 0)) }
    }

    #[test]
    fn test_cart_operations() {
        let key = StockKey::product(Uuid::new_v4());
        let mut cart = Cart::new(Uuid::new_v4(), "USD");
        cart.set_item(widget(key, 2)).unwrap();
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.subtotal().amount(), Decimal::new(20, 0));
        cart.set_item(widget(key, 1)).unwrap();
        assert_eq!(cart.items()[0].quantity, 1); // Replaced
        assert_eq!(cart.subtotal().amount(), Decimal::new(10, 0));
    }

    #[test]
    fn test_remove_item() {
        let (a, b) = (StockKey::product(Uuid::new_v4()), StockKey::product(Uuid::new_v4()));
        let mut cart = Cart::new(Uuid::new_v4(), "USD");
        cart.set_item(widget(a, 1)).unwrap();
        cart.set_item(widget(b, 3)).unwrap();
        assert_eq!(cart.remove_item(&a).unwrap().quantity, 1);
        assert_eq!(cart.remove_item(&a), Err(CartError::ItemNotFound));
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.remove_item(&b).unwrap().quantity, 3);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_rejects_zero_and_foreign_currency() {
        let key = StockKey::product(Uuid::new_v4());
        let mut cart = Cart::new(Uuid::new_v4(), "USD");
        assert_eq!(cart.set_item(widget(key, 0)), Err(CartError::InvalidQuantity));
        let mut item = widget(key, 1);
        item.unit_price = Money::new(Decimal::new(10, 0), "NGN");
        assert_eq!(cart.set_item(item), Err(CartError::CurrencyMismatch));
    }

    #[test]
    fn test_abandoned() {
        let cart = Cart::new(Uuid::new_v4(), "USD");
        assert!(cart.is_abandoned(Utc::now() + chrono::Duration::days(1)));
        assert!(!cart.is_abandoned(Utc::now() - chrono::Duration::days(1)));
    }
}
