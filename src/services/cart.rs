//! Cart Session: every line change goes through the reservation store first.

use std::sync::Arc;
use uuid::Uuid;
use crate::domain::aggregates::{Cart, CartItem};
use crate::domain::value_objects::StockKey;
use crate::services::{ReservationService, DEFAULT_CURRENCY};
use crate::store::Store;
use crate::{EcommerceError, Result};

#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn Store>,
    reservations: ReservationService,
}

impl CartService {
    pub fn new(store: Arc<dyn Store>, reservations: ReservationService) -> Self { Self { store, reservations } }

    /// The shopper's cart, or an unsaved empty one.
    pub async fn get(&self, owner_id: Uuid) -> Result<Cart> {
        Ok(self.store.cart(owner_id).await?.unwrap_or_else(|| Cart::new(owner_id, DEFAULT_CURRENCY)))
    }

    /// Sets the line for `key` to `quantity`, claiming the stock first. Zero removes the line.
    pub async fn set_item(&self, owner_id: Uuid, key: StockKey, quantity: u32) -> Result<Cart> {
        if quantity == 0 { return self.remove_item(owner_id, key).await; }
        let stock = self.store.stock_item(&key).await?.ok_or(EcommerceError::ProductNotFound(key))?;
        let mut cart = match self.store.cart(owner_id).await? {
            Some(c) if !c.is_empty() => c,
            _ => Cart::new(owner_id, stock.unit_price.currency()),
        };
        cart.set_item(CartItem { key, name: stock.name.clone(), quantity, unit_price: stock.unit_price.clone() })?;
        self.reservations.reserve(key, owner_id, quantity).await?;
        self.store.save_cart(&cart).await?;
        tracing::debug!(%owner_id, %key, quantity, "cart line set");
        Ok(cart)
    }

    pub async fn remove_item(&self, owner_id: Uuid, key: StockKey) -> Result<Cart> {
        let mut cart = self.store.cart(owner_id).await?.ok_or(EcommerceError::CartItemNotFound)?;
        let removed = cart.remove_item(&key)?;
        self.release_line(owner_id, &removed).await?;
        self.store.save_cart(&cart).await?;
        Ok(cart)
    }

    pub async fn clear(&self, owner_id: Uuid) -> Result<()> {
        let Some(cart) = self.store.cart(owner_id).await? else { return Ok(()) };
        for line in cart.items() {
            self.release_line(owner_id, line).await?;
        }
        self.store.delete_cart(owner_id).await?;
        Ok(())
    }

    async fn release_line(&self, owner_id: Uuid, line: &CartItem) -> Result<()> {
        match self.reservations.release(line.key, owner_id, line.quantity).await {
            // The product left the catalog; there is no claim to give back.
            Ok(_) | Err(EcommerceError::ProductNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
