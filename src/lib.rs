//! # a3s-bus
//!
//! Transport-agnostic integration event bus for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-bus` lets services publish strongly-typed integration events and
//! subscribe handlers to them, without binding the application to a
//! particular broker. It owns the subscription registry, logical event
//! naming, broker rule synchronization and inbound dispatch; the broker
//! itself sits behind the [`Transport`] trait.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_bus::{
//!     EventBus, EventMetadata, HandlerContainer, IntegrationEvent, IntegrationEventHandler,
//!     MemoryTransport,
//! };
//! use async_trait::async_trait;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Serialize, Deserialize)]
//! struct OrderPaidIntegrationEvent {
//!     #[serde(flatten)]
//!     meta: EventMetadata,
//!     order_id: u64,
//! }
//!
//! impl IntegrationEvent for OrderPaidIntegrationEvent {
//!     fn metadata(&self) -> &EventMetadata {
//!         &self.meta
//!     }
//! }
//!
//! struct ShipOrder;
//!
//! #[async_trait]
//! impl IntegrationEventHandler<OrderPaidIntegrationEvent> for ShipOrder {
//!     async fn handle(&self, event: OrderPaidIntegrationEvent) -> anyhow::Result<()> {
//!         println!("shipping order {}", event.order_id);
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> a3s_bus::Result<()> {
//! let container = HandlerContainer::new();
//! container.register_instance(Arc::new(ShipOrder))?;
//!
//! let bus = EventBus::new(MemoryTransport::default(), container);
//! bus.start().await?;
//! bus.subscribe::<OrderPaidIntegrationEvent, ShipOrder>().await?;
//!
//! // Published under the logical name "OrderPaid"
//! let event = OrderPaidIntegrationEvent { meta: EventMetadata::new(), order_id: 42 };
//! let message_id = bus.publish(&event).await?;
//! println!("Published: {}", message_id);
//! # Ok(())
//! # }
//! ```
//!
//! ## Transports
//!
//! - **memory**: In-memory transport for testing and single-process use
//!
//! Broker adapters (Service Bus, RabbitMQ, ...) implement [`Transport`].
//!
//! ## Architecture
//!
//! - **EventNameResolver**: maps event types to logical names by suffix stripping
//! - **SubscriptionRegistry**: concurrent, copy-on-write map of event name to handlers
//! - **HandlerResolver**: scoped handler instantiation (see [`HandlerContainer`])
//! - **Dispatcher**: sequential, failure-isolated handler invocation per message
//! - **Transport** trait: the broker boundary (send, rules, settlement)
//! - **EventBus**: publish/subscribe façade keeping broker rules in step

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod failure;
pub mod handler;
pub mod naming;
pub mod registry;
pub mod resolver;
pub mod transport;
pub mod types;

// Re-export core types
pub use bus::EventBus;
pub use config::BusConfig;
pub use dispatch::{DispatchReport, Dispatcher};
pub use error::{BusError, Result, TransportError};
pub use failure::{FailureKind, FailureSink, HandlerFailure, MemoryFailureSink};
pub use handler::{
    DynamicCapability, DynamicIntegrationEventHandler, HandlerInstance, HandlerKey,
    IntegrationEventHandler, TypedCapability,
};
pub use naming::EventNameResolver;
pub use registry::{
    AddOutcome, RemovalOutcome, SubscriptionInfo, SubscriptionRegistry, SubscriptionRemoved,
};
pub use resolver::{HandlerContainer, HandlerResolver, HandlerScope};
pub use transport::{DeliveryHandler, Settlement, Transport, TransportResult};
pub use types::{
    Delivery, EventMetadata, EventTypeDescriptor, IntegrationEvent, Message, RoutingRule,
    RuleFilter,
};

// Re-export transports for convenience
pub use transport::memory::MemoryTransport;
