//! Domain events
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;
use crate::domain::aggregates::OrderStatus;
use crate::domain::value_objects::{PaymentMethod, PaymentProvider, StockKey};

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "aggregate", content = "data", rename_all = "snake_case")]
pub enum DomainEvent {
    Reservation(ReservationEvent),
    Stock(StockEvent),
    Order(OrderEvent),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReservationEvent {
    Claimed { key: StockKey, shopper_id: Uuid, quantity: u32, expires_at: DateTime<Utc> },
    Released { key: StockKey, shopper_id: Uuid, remaining: u32 },
    Expired { count: usize },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StockEvent {
    SaleCommitted { key: StockKey, quantity: u32, remaining: u32 },
    /// A paid order asked for more units than the ledger still held.
    Oversold { key: StockKey, order_id: Uuid, shortfall: u32 },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: Uuid, owner_id: Uuid, total: Decimal, currency: String, payment_method: PaymentMethod },
    Paid { order_id: Uuid, owner_id: Uuid, amount: Decimal, provider: Option<PaymentProvider> },
    PaymentFailed { order_id: Uuid, owner_id: Uuid },
    StatusChanged { order_id: Uuid, owner_id: Uuid, from: OrderStatus, to: OrderStatus },
    Cancelled { order_id: Uuid, owner_id: Uuid },
}

impl DomainEvent {
    /// Bus subject, e.g. `ecommerce.order.paid`.
    pub fn subject(&self) -> String {
        let (aggregate, name) = match self {
            Self::Reservation(e) => ("reservation", match e {
                ReservationEvent::Claimed { .. } => "claimed",
                ReservationEvent::Released { .. } => "released",
                ReservationEvent::Expired { .. } => "expired",
            }),
            Self::Stock(e) => ("stock", match e {
                StockEvent::SaleCommitted { .. } => "sale_committed",
                StockEvent::Oversold { .. } => "oversold",
            }),
            Self::Order(e) => ("order", match e {
                OrderEvent::Created { .. } => "created",
                OrderEvent::Paid { .. } => "paid",
                OrderEvent::PaymentFailed { .. } => "payment_failed",
                OrderEvent::StatusChanged { .. } => "status_changed",
                OrderEvent::Cancelled { .. } => "cancelled",
            }),
        };
        format!("ecommerce.{aggregate}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subjects_and_payload_shape() {
        let e = DomainEvent::Order(OrderEvent::Cancelled { order_id: Uuid::nil(), owner_id: Uuid::nil() });
        assert_eq!(e.subject(), "ecommerce.order.cancelled");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["aggregate"], "order");
        assert_eq!(json["data"]["type"], "cancelled");
    }
}
