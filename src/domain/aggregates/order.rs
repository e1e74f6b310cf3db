//! Order Aggregate
//!
//! The lifecycle is a pure table, [`transition`], over `(status, payment_status, event)`.
//! Every writer (gateway callbacks, the return-URL fallback, fulfilment staff and
//! the cleanup sweep) goes through [`Order::apply`], so conflicting requests resolve
//! the same way regardless of which path delivers them first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{Money, PaymentMethod, PaymentProvider, StockKey, UnknownVariant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { Draft, AwaitingPayment, Pending, Processing, Shipped, Delivered, PaymentFailed, Cancelled }

impl OrderStatus {
    pub const ALL: [OrderStatus; 8] = [
        Self::Draft, Self::AwaitingPayment, Self::Pending, Self::Processing,
        Self::Shipped, Self::Delivered, Self::PaymentFailed, Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::AwaitingPayment => "awaiting_payment",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::PaymentFailed => "payment_failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Delivered | Self::PaymentFailed | Self::Cancelled) }

    /// Whether the order's units have already been taken out of the stock ledger.
    pub fn holds_sale(&self) -> bool { matches!(self, Self::Pending | Self::Processing | Self::Shipped | Self::Delivered) }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl std::str::FromStr for OrderStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|v| v.as_str() == s).ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus { AwaitingPayment, Paid, Failed }

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::AwaitingPayment => "awaiting_payment", Self::Paid => "paid", Self::Failed => "failed" }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl std::str::FromStr for PaymentStatus {
    type Err = UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_payment" => Ok(Self::AwaitingPayment),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// The pair the state machine reasons about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderState { pub status: OrderStatus, pub payment: PaymentStatus }

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}/{}", self.status, self.payment) }
}

/// Provider transaction record frozen onto the order once payment settles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub provider: PaymentProvider,
    pub transaction_id: Option<String>,
    pub result_code: String,
    pub amount_minor: i64,
    /// Every field the provider sent, signature included.
    pub raw: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LifecycleEvent {
    GatewayRequested { provider: PaymentProvider },
    PaymentSucceeded(PaymentResult),
    PaymentFailed { result: Option<PaymentResult>, reason: String },
    StartProcessing,
    Ship,
    Deliver,
    Cancel,
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GatewayRequested { .. } => "gateway_requested",
            Self::PaymentSucceeded(_) => "payment_succeeded",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::StartProcessing => "process",
            Self::Ship => "ship",
            Self::Deliver => "deliver",
            Self::Cancel => "cancel",
        }
    }
}

/// What a transition means for the stock ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StockEffect {
    None,
    /// Take the order's units out of `total_stock` and retire its reservations.
    CommitSale,
    /// Retire the order's reservations without touching `total_stock`.
    Release,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition { pub from: OrderState, pub to: OrderState, pub stock_effect: StockEffect }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidTransition { pub from: OrderState, pub event: &'static str }

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot apply {} to order in {}", self.event, self.from)
    }
}

/// The lifecycle table. Anything not listed is rejected.
pub fn transition(current: OrderState, event: &LifecycleEvent) -> Result<Transition, InvalidTransition> {
    use self::OrderStatus as S;
    use self::PaymentStatus as P;
    use self::LifecycleEvent as E;

    let (status, payment, stock_effect) = match (current.status, current.payment, event) {
        (S::Draft, P::AwaitingPayment, E::GatewayRequested { .. }) => (S::AwaitingPayment, P::AwaitingPayment, StockEffect::None),
        (S::Draft | S::AwaitingPayment, P::AwaitingPayment, E::PaymentSucceeded(_)) => (S::Pending, P::Paid, StockEffect::CommitSale),
        (S::Draft | S::AwaitingPayment, P::AwaitingPayment, E::PaymentFailed { .. }) => (S::PaymentFailed, P::Failed, StockEffect::Release),
        (S::Pending, p, E::StartProcessing) => (S::Processing, p, StockEffect::None),
        (S::Processing, p, E::Ship) => (S::Shipped, p, StockEffect::None),
        // Cash on delivery settles at the door.
        (S::Shipped, _, E::Deliver) => (S::Delivered, P::Paid, StockEffect::None),
        (s @ (S::Draft | S::AwaitingPayment | S::Pending | S::Processing | S::Shipped), p, E::Cancel) => {
            let effect = if s.holds_sale() { StockEffect::None } else { StockEffect::Release };
            (S::Cancelled, p, effect)
        }
        _ => return Err(InvalidTransition { from: current, event: event.name() }),
    };
    Ok(Transition { from: current, to: OrderState { status, payment }, stock_effect })
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem { pub key: StockKey, pub name: String, pub quantity: u32, pub unit_price: Money, pub total: Money }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry { pub status: OrderStatus, pub note: String, pub date: DateTime<Utc> }

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: Uuid,
    order_number: String,
    owner_id: Uuid,
    items: Vec<LineItem>,
    total: Money,
    status: OrderStatus,
    payment_status: PaymentStatus,
    payment_method: PaymentMethod,
    is_paid: bool,
    paid_at: Option<DateTime<Utc>>,
    payment_result: Option<PaymentResult>,
    status_history: Vec<StatusEntry>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

/// Persisted columns of an order, used by stores to rebuild the aggregate.
#[derive(Clone, Debug)]
pub struct OrderParts {
    pub id: Uuid,
    pub order_number: String,
    pub owner_id: Uuid,
    pub items: Vec<LineItem>,
    pub total: Money,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_result: Option<PaymentResult>,
    pub status_history: Vec<StatusEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Opens an order from frozen line items. Online methods start in `draft`,
    /// cash on delivery goes straight to `pending`.
    pub fn create(owner_id: Uuid, items: Vec<LineItem>, payment_method: PaymentMethod, now: DateTime<Utc>) -> Result<Self, OrderError> {
        let first = items.first().ok_or(OrderError::NoItems)?;
        let currency = first.total.currency().to_string();
        let total = items.iter().try_fold(Money::zero(&currency), |acc, i| acc.add(&i.total)).map_err(|_| OrderError::MixedCurrency)?;
        let id = Uuid::now_v7();
        let status = if payment_method.is_online() { OrderStatus::Draft } else { OrderStatus::Pending };
        let order_number = format!("ORD-{}", id.simple().to_string().split_at(24).1.to_uppercase());
        let mut order = Self {
            id, order_number, owner_id, items, total, status,
            payment_status: PaymentStatus::AwaitingPayment, payment_method,
            is_paid: false, paid_at: None, payment_result: None,
            status_history: vec![StatusEntry { status, note: "Order placed".into(), date: now }],
            created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Created {
            order_id: id, owner_id, total: order.total.amount(), currency, payment_method,
        }));
        Ok(order)
    }

    pub fn restore(parts: OrderParts) -> Self {
        Self {
            id: parts.id, order_number: parts.order_number, owner_id: parts.owner_id, items: parts.items,
            total: parts.total, status: parts.status, payment_status: parts.payment_status,
            payment_method: parts.payment_method, is_paid: parts.is_paid, paid_at: parts.paid_at,
            payment_result: parts.payment_result, status_history: parts.status_history,
            created_at: parts.created_at, updated_at: parts.updated_at, events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn owner_id(&self) -> Uuid { self.owner_id }
    pub fn items(&self) -> &[LineItem] { &self.items }
    pub fn total(&self) -> &Money { &self.total }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn payment_method(&self) -> PaymentMethod { self.payment_method }
    pub fn is_paid(&self) -> bool { self.is_paid }
    pub fn paid_at(&self) -> Option<DateTime<Utc>> { self.paid_at }
    pub fn payment_result(&self) -> Option<&PaymentResult> { self.payment_result.as_ref() }
    pub fn status_history(&self) -> &[StatusEntry] { &self.status_history }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn state(&self) -> OrderState { OrderState { status: self.status, payment: self.payment_status } }

    /// Applies `event` if the table allows it from the current state. A rejected
    /// event leaves the order untouched.
    pub fn apply(&mut self, event: LifecycleEvent, note: impl Into<String>, now: DateTime<Utc>) -> Result<Transition, OrderError> {
        let t = transition(self.state(), &event)?;
        self.status = t.to.status;
        self.payment_status = t.to.payment;
        match event {
            LifecycleEvent::PaymentSucceeded(result) => self.payment_result = Some(result),
            LifecycleEvent::PaymentFailed { result: Some(result), .. } => self.payment_result = Some(result),
            _ => {}
        }
        if t.to.payment == PaymentStatus::Paid && !self.is_paid {
            self.is_paid = true;
            self.paid_at = Some(now);
        }
        self.status_history.push(StatusEntry { status: self.status, note: note.into(), date: now });
        self.updated_at = now;
        self.raise_transition_event(&t);
        Ok(t)
    }

    fn raise_transition_event(&mut self, t: &Transition) {
        let (order_id, owner_id) = (self.id, self.owner_id);
        let event = match t.to.status {
            OrderStatus::Pending if t.to.payment == PaymentStatus::Paid && t.from.payment != PaymentStatus::Paid => OrderEvent::Paid {
                order_id, owner_id, amount: self.total.amount(), provider: self.payment_result.as_ref().map(|r| r.provider),
            },
            OrderStatus::PaymentFailed => OrderEvent::PaymentFailed { order_id, owner_id },
            OrderStatus::Cancelled => OrderEvent::Cancelled { order_id, owner_id },
            to => OrderEvent::StatusChanged { order_id, owner_id, from: t.from.status, to },
        };
        self.raise_event(DomainEvent::Order(event));
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum OrderError { NoItems, MixedCurrency, InvalidTransition(InvalidTransition) }
impl std::error::Error for OrderError {}
impl fmt::Display for OrderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoItems => write!(f, "No items"),
            Self::MixedCurrency => write!(f, "Line items use different currencies"),
            Self::InvalidTransition(t) => write!(f, "{t}"),
        }
    }
}

impl From<InvalidTransition> for OrderError {
    fn from(t: InvalidTransition) -> Self { Self::InvalidTransition(t) }
}
