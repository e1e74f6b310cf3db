//! Best-effort domain event publishing over NATS.

use crate::domain::events::DomainEvent;

#[derive(Clone, Default)]
pub struct EventBus { nats: Option<async_nats::Client> }

impl EventBus {
    pub fn new(nats: Option<async_nats::Client>) -> Self { Self { nats } }

    /// Connects if `url` is set. A failed connection is logged and the bus
    /// degrades to logging only.
    pub async fn connect(url: Option<&str>) -> Self {
        let Some(url) = url else { return Self::default() };
        match async_nats::connect(url).await {
            Ok(client) => { tracing::info!(%url, "connected to NATS"); Self::new(Some(client)) }
            Err(e) => { tracing::warn!(%url, error = %e, "NATS unavailable, events will only be logged"); Self::default() }
        }
    }

    pub async fn publish(&self, events: &[DomainEvent]) {
        for event in events {
            let subject = event.subject();
            tracing::debug!(%subject, "domain event");
            let Some(client) = &self.nats else { continue };
            let payload = match serde_json::to_vec(event) {
                Ok(p) => p,
                Err(e) => { tracing::warn!(%subject, error = %e, "event serialization failed"); continue }
            };
            if let Err(e) = client.publish(subject.clone(), payload.into()).await {
                tracing::warn!(%subject, error = %e, "event publish failed");
            }
        }
    }
}
