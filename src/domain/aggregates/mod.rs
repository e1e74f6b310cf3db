//! Aggregates module
pub mod stock;
pub mod reservation;
pub mod order;
pub mod cart;

pub use stock::{SaleOutcome, StockItem};
pub use reservation::{Availability, Reservation, ReservationTotals, Shortfall};
pub use order::{
    transition, InvalidTransition, LifecycleEvent, LineItem, Order, OrderError, OrderParts, OrderState,
    OrderStatus, PaymentResult, PaymentStatus, StatusEntry, StockEffect, Transition,
};
pub use cart::{Cart, CartError, CartItem};
