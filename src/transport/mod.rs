//! Transport port: the boundary to the message broker
//!
//! The bus never speaks a broker protocol. Broker adapters implement
//! [`Transport`] to send messages, manage routing rules and settle
//! deliveries, and push inbound messages to the registered
//! [`DeliveryHandler`]. Connection lifecycle, retry policy and
//! redelivery belong to the adapter and the broker.

use crate::error::TransportError;
use crate::types::{Delivery, Message, RoutingRule};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod memory;

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Core trait for broker adapters
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to the topic
    async fn send(&self, message: Message) -> TransportResult<()>;

    /// Register the callback that receives inbound deliveries
    ///
    /// Adapters invoke it with at most their configured number of
    /// concurrent calls.
    async fn register_delivery_handler(
        &self,
        handler: Arc<dyn DeliveryHandler>,
    ) -> TransportResult<()>;

    /// Add a routing rule to this bus's subscription
    ///
    /// Returns [`TransportError::RuleAlreadyExists`] if the name is taken.
    async fn add_rule(&self, rule: RoutingRule) -> TransportResult<()>;

    /// Remove a routing rule by name
    ///
    /// Returns [`TransportError::RuleNotFound`] if no such rule exists.
    async fn remove_rule(&self, name: &str) -> TransportResult<()>;

    /// Complete a delivered message so it is not redelivered
    async fn complete(&self, lock_token: &str) -> TransportResult<()>;

    /// Give up a delivered message so the broker redelivers it
    ///
    /// Default implementation does nothing and lets the lock expire.
    async fn abandon(&self, _lock_token: &str) -> TransportResult<()> {
        Ok(())
    }

    /// Transport name (e.g., "memory", "servicebus")
    fn name(&self) -> &str;
}

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Completed; the broker must not redeliver
    Completed,
    /// Left unacknowledged for broker redelivery
    Abandoned,
}

/// Receiver of inbound deliveries
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Process one delivery and settle it with the transport
    ///
    /// `cancel` carries the host's cancellation signal; a cancelled
    /// delivery is abandoned.
    async fn on_delivery(&self, delivery: Delivery, cancel: CancellationToken) -> Settlement;
}
