//! Stock Ledger entry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{Money, Quantity, Sku, StockKey};

/// Source of truth for how many units of a product (or variant) exist.
///
/// Here `total_stock` only moves through [`StockItem::commit_sale`]; restocking
/// belongs to the catalog. Reservations never touch it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockItem {
    pub key: StockKey,
    pub sku: Option<Sku>,
    pub name: String,
    pub unit_price: Money,
    pub total_stock: Quantity,
    pub updated_at: DateTime<Utc>,
}

/// Result of converting a reservation into a permanent decrement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SaleOutcome {
    pub sold: u32,
    pub remaining: u32,
    /// Units that could not be taken from stock because it was already exhausted.
    pub shortfall: u32,
}

impl StockItem {
    pub fn create(key: StockKey, name: impl Into<String>, unit_price: Money, total_stock: u32) -> Self {
        Self { key, sku: None, name: name.into(), unit_price, total_stock: Quantity::new(total_stock), updated_at: Utc::now() }
    }

    /// Decrements stock by `qty`, clamping at zero.
    pub fn commit_sale(&mut self, qty: u32) -> SaleOutcome {
        let before = self.total_stock.value();
        self.total_stock = self.total_stock.saturating_subtract(qty);
        self.touch();
        let remaining = self.total_stock.value();
        SaleOutcome { sold: before - remaining, remaining, shortfall: qty - (before - remaining) }
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}
