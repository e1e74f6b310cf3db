//! Webhook Reconciler.
//!
//! Gateway notifications, the shopper's signed return redirect and fulfilment
//! staff all change orders here, through the same state machine guard.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use crate::bus::EventBus;
use crate::domain::aggregates::{InvalidTransition, LifecycleEvent, Order};
use crate::domain::value_objects::PaymentProvider;
use crate::payments::{CallbackPayload, Gateways, VerifiedCallback};
use crate::store::{ApplyOutcome, CallbackKey, CallbackOutcome, OrderEventRequest, Store};
use crate::{EcommerceError, Result};

/// What a verified callback did. Every variant is acknowledged to the provider.
#[derive(Clone, Debug)]
pub enum CallbackResolution {
    Applied { order: Order, success: bool },
    Duplicate { order: Order, prior: CallbackOutcome },
    /// Verified, but the order had already moved on (e.g. a failure after a success).
    Conflict { order: Order, error: InvalidTransition },
}

impl CallbackResolution {
    pub fn order(&self) -> &Order {
        match self {
            Self::Applied { order, .. } | Self::Duplicate { order, .. } | Self::Conflict { order, .. } => order,
        }
    }
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn Store>,
    gateways: Arc<Gateways>,
    bus: EventBus,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, gateways: Arc<Gateways>, bus: EventBus) -> Self { Self { store, gateways, bus } }

    /// Verifies and applies one provider notification at most once.
    ///
    /// Nothing is read or written before the signature checks out. Errors are
    /// `SignatureInvalid`, `MalformedCallback`, `OrderNotFound` and `AmountMismatch`;
    /// none of them change state.
    pub async fn apply_callback(&self, provider: PaymentProvider, payload: &CallbackPayload) -> Result<CallbackResolution> {
        let verified = self.verify(provider, payload)?;
        self.apply_verified(provider, verified).await
    }

    /// The signed parameters a gateway appended to the shopper's return URL for
    /// `order_id`. Parameters signed for any other order are refused before
    /// anything is read or written.
    pub async fn confirm_return(&self, provider: PaymentProvider, order_id: Uuid, payload: &CallbackPayload) -> Result<CallbackResolution> {
        let verified = self.verify(provider, payload)?;
        if verified.order_id != order_id {
            tracing::warn!(%provider, %order_id, signed_for = %verified.order_id, "confirmation signed for another order");
            return Err(EcommerceError::MalformedCallback { provider, reason: format!("parameters belong to order {}", verified.order_id) });
        }
        self.apply_verified(provider, verified).await
    }

    fn verify(&self, provider: PaymentProvider, payload: &CallbackPayload) -> Result<VerifiedCallback> {
        self.gateways.get(provider)?.verify_callback(payload).map_err(|e| {
            tracing::warn!(%provider, error = %e, "callback rejected");
            e
        })
    }

    async fn apply_verified(&self, provider: PaymentProvider, verified: VerifiedCallback) -> Result<CallbackResolution> {
        let adapter = self.gateways.get(provider)?;
        let order_id = verified.order_id;

        let order = self.store.order(order_id).await?.ok_or_else(|| {
            tracing::warn!(%provider, %order_id, "callback for unknown order");
            EcommerceError::OrderNotFound(order_id)
        })?;
        if order.payment_method().provider() != Some(provider) {
            tracing::warn!(%provider, %order_id, method = %order.payment_method(), "callback from a provider the order does not use");
            return Err(EcommerceError::MalformedCallback { provider, reason: format!("order {order_id} is not paid via {provider}") });
        }
        let expected = adapter.charge_amount(order.total()).map_err(|e| {
            tracing::warn!(%provider, %order_id, error = %e, "callback for an amount the provider cannot carry");
            e
        })?;
        if verified.amount_minor != expected {
            tracing::warn!(%provider, %order_id, expected, received = verified.amount_minor, "callback amount mismatch");
            return Err(EcommerceError::AmountMismatch { order_id, expected, received: verified.amount_minor });
        }

        let result = verified.payment_result();
        let event = if verified.success {
            LifecycleEvent::PaymentSucceeded(result)
        } else {
            LifecycleEvent::PaymentFailed { reason: format!("{provider} result code {}", verified.result_code), result: Some(result) }
        };
        let note = if verified.success { format!("Paid via {provider}") } else { format!("Payment failed via {provider} ({})", verified.result_code) };
        let key = CallbackKey::new(provider, order_id, verified.provider_txn_id.as_deref(), &verified.result_code);

        let outcome = self.store.apply_order_event(OrderEventRequest { order_id, event, note, callback: Some(key), now: Utc::now() }).await?;
        Ok(match outcome {
            ApplyOutcome::Applied { order, transition, events } => {
                tracing::info!(%provider, %order_id, from = %transition.from, to = %transition.to, "callback applied");
                self.bus.publish(&events).await;
                CallbackResolution::Applied { order, success: verified.success }
            }
            ApplyOutcome::Duplicate { order, prior } => {
                tracing::info!(%provider, %order_id, %prior, "duplicate callback");
                CallbackResolution::Duplicate { order, prior }
            }
            ApplyOutcome::Rejected { order, error } => {
                tracing::warn!(%provider, %order_id, %error, "callback conflicts with order state");
                CallbackResolution::Conflict { order, error }
            }
        })
    }

    /// Staff-driven lifecycle change (`process`, `ship`, `deliver`, `cancel`).
    pub async fn transition(&self, order_id: Uuid, event: LifecycleEvent, note: Option<String>) -> Result<Order> {
        let note = note.unwrap_or_else(|| format!("Order {}", event.name()));
        let request = OrderEventRequest { order_id, event, note, callback: None, now: Utc::now() };
        match self.store.apply_order_event(request).await? {
            ApplyOutcome::Applied { order, transition, events } => {
                tracing::info!(%order_id, from = %transition.from, to = %transition.to, "order transitioned");
                self.bus.publish(&events).await;
                Ok(order)
            }
            ApplyOutcome::Duplicate { order, .. } => Ok(order),
            ApplyOutcome::Rejected { error, .. } => {
                tracing::warn!(%order_id, %error, "transition rejected");
                Err(EcommerceError::InvalidTransition(error))
            }
        }
    }
}
