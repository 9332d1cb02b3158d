//! High-level integration event bus
//!
//! `EventBus` ties the subscription registry and dispatcher to a broker
//! [`Transport`]: it publishes events under their logical names, keeps
//! broker routing rules in step with local subscriptions, and settles
//! every inbound delivery once all of its handlers have run.

use crate::config::BusConfig;
use crate::dispatch::{DispatchReport, Dispatcher};
use crate::error::{BusError, Result};
use crate::failure::{FailureSink, MemoryFailureSink};
use crate::handler::{DynamicIntegrationEventHandler, HandlerKey, IntegrationEventHandler};
use crate::naming::EventNameResolver;
use crate::registry::{AddOutcome, RemovalOutcome, SubscriptionInfo, SubscriptionRegistry};
use crate::resolver::HandlerResolver;
use crate::transport::{DeliveryHandler, Settlement, Transport};
use crate::types::{Delivery, IntegrationEvent, Message, RoutingRule, DEFAULT_RULE_NAME};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

struct BusCore {
    config: BusConfig,
    transport: Arc<dyn Transport>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Dispatcher,
    failures: Arc<dyn FailureSink>,
    started: AtomicBool,
    rule_sync: Mutex<()>,
}

/// Integration event bus backed by a pluggable transport
///
/// Cheap to clone; clones share the registry and transport.
#[derive(Clone)]
pub struct EventBus {
    core: Arc<BusCore>,
}

impl EventBus {
    /// Create a bus with default configuration
    pub fn new(
        transport: impl Transport + 'static,
        resolver: impl HandlerResolver + 'static,
    ) -> Self {
        let config = BusConfig::default();
        let failures = Arc::new(MemoryFailureSink::new(config.failure_capacity));
        Self::build(config, Arc::new(transport), Arc::new(resolver), failures)
    }

    /// Create a bus with explicit configuration
    pub fn with_config(
        transport: impl Transport + 'static,
        resolver: impl HandlerResolver + 'static,
        config: BusConfig,
    ) -> Result<Self> {
        config.validate()?;
        let failures = Arc::new(MemoryFailureSink::new(config.failure_capacity));
        Ok(Self::build(
            config,
            Arc::new(transport),
            Arc::new(resolver),
            failures,
        ))
    }

    /// Create a bus reporting handler failures to a custom sink
    pub fn with_failure_sink(
        transport: impl Transport + 'static,
        resolver: impl HandlerResolver + 'static,
        config: BusConfig,
        failures: Arc<dyn FailureSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(
            config,
            Arc::new(transport),
            Arc::new(resolver),
            failures,
        ))
    }

    fn build(
        config: BusConfig,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn HandlerResolver>,
        failures: Arc<dyn FailureSink>,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new(EventNameResolver::new(
            config.event_name_suffix.clone(),
        )));
        let dispatcher = Dispatcher::new(
            registry.clone(),
            resolver,
            failures.clone(),
            config.scope_name.clone(),
        );

        Self {
            core: Arc::new(BusCore {
                config,
                transport,
                registry,
                dispatcher,
                failures,
                started: AtomicBool::new(false),
                rule_sync: Mutex::new(()),
            }),
        }
    }

    /// Attach to the transport and begin receiving deliveries
    ///
    /// Retracts the broker's `$Default` rule first when configured, so
    /// only subscribed event names are delivered. Calling twice is a no-op.
    pub async fn start(&self) -> Result<()> {
        if self.core.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if self.core.config.remove_default_rule {
            if let Err(e) = self.retract_rule(DEFAULT_RULE_NAME).await {
                self.core.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        let handler = Arc::new(BusDelivery {
            core: Arc::downgrade(&self.core),
        });
        if let Err(e) = self.core.transport.register_delivery_handler(handler).await {
            self.core.started.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        tracing::info!(
            transport = self.core.transport.name(),
            subscription = %self.core.config.subscription_name,
            max_concurrent_calls = self.core.config.max_concurrent_calls,
            "Event bus started"
        );
        Ok(())
    }

    /// Publish an integration event, returning the message id
    pub async fn publish<E: IntegrationEvent>(&self, event: &E) -> Result<String> {
        let event_name = self.core.registry.event_key::<E>()?;
        let body = serde_json::to_vec(event)?;
        let message = Message::json(event_name, body);
        let message_id = message.message_id.clone();

        tracing::debug!(
            event_name = %message.label,
            event_id = %event.id(),
            message_id = %message_id,
            "Publishing event"
        );

        self.core.transport.send(message).await?;
        Ok(message_id)
    }

    /// Publish a schema-less JSON event under an explicit logical name
    pub async fn publish_dynamic(
        &self,
        event_name: &str,
        payload: &serde_json::Value,
    ) -> Result<String> {
        let body = serde_json::to_vec(payload)?;
        let message = Message::json(event_name, body);
        let message_id = message.message_id.clone();

        tracing::debug!(event_name, message_id = %message_id, "Publishing dynamic event");

        self.core.transport.send(message).await?;
        Ok(message_id)
    }

    /// Subscribe handler `H` to event type `E`
    ///
    /// Adds a broker routing rule when this is the first subscription for
    /// the event name. Fails with [`BusError::Conflict`] if a different
    /// event type already owns the name.
    pub async fn subscribe<E, H>(&self) -> Result<()>
    where
        E: IntegrationEvent,
        H: IntegrationEventHandler<E>,
    {
        let event_name = self.core.registry.event_key::<E>()?;
        if self
            .subscribe_info(&event_name, SubscriptionInfo::typed::<E, H>())
            .await?
        {
            tracing::info!(
                event_name = %event_name,
                event_type = E::type_name(),
                handler = HandlerKey::of::<H>().name(),
                "Subscribed"
            );
        }
        Ok(())
    }

    /// Subscribe dynamic handler `H` to a logical event name
    pub async fn subscribe_dynamic<H: DynamicIntegrationEventHandler>(
        &self,
        event_name: &str,
    ) -> Result<()> {
        if self
            .subscribe_info(event_name, SubscriptionInfo::dynamic::<H>())
            .await?
        {
            tracing::info!(
                event_name,
                handler = HandlerKey::of::<H>().name(),
                "Subscribed dynamic handler"
            );
        }
        Ok(())
    }

    /// Remove handler `H` from event type `E`
    ///
    /// Retracts the routing rule once no subscription is left for the name.
    pub async fn unsubscribe<E, H>(&self) -> Result<()>
    where
        E: IntegrationEvent,
        H: IntegrationEventHandler<E>,
    {
        let event_name = self.core.registry.event_key::<E>()?;
        self.unsubscribe_info(&event_name, &SubscriptionInfo::typed::<E, H>())
            .await
    }

    /// Remove dynamic handler `H` from a logical event name
    pub async fn unsubscribe_dynamic<H: DynamicIntegrationEventHandler>(
        &self,
        event_name: &str,
    ) -> Result<()> {
        self.unsubscribe_info(event_name, &SubscriptionInfo::dynamic::<H>())
            .await
    }

    /// Dispatch a payload directly, bypassing the transport
    pub async fn process_event(&self, event_name: &str, body: &[u8]) -> Result<DispatchReport> {
        let message_id = format!("local-{}", uuid::Uuid::new_v4());
        self.core
            .dispatcher
            .process_event(event_name, &message_id, body, &CancellationToken::new())
            .await
    }

    /// Drop every local subscription
    ///
    /// In-flight dispatches finish with the handlers they already captured.
    /// Broker-side rules are left in place.
    pub fn shutdown(&self) -> Result<()> {
        self.core.registry.clear()?;
        tracing::info!("Event bus subscriptions cleared");
        Ok(())
    }

    /// The subscription registry
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.core.registry
    }

    /// The failure sink handler failures are reported to
    pub fn failures(&self) -> &dyn FailureSink {
        self.core.failures.as_ref()
    }

    /// Active configuration
    pub fn config(&self) -> &BusConfig {
        &self.core.config
    }

    /// Transport name
    pub fn transport_name(&self) -> &str {
        self.core.transport.name()
    }

    // Registry change and matching rule call run together under `rule_sync`
    async fn subscribe_info(&self, event_name: &str, info: SubscriptionInfo) -> Result<bool> {
        let _sync = self.core.rule_sync.lock().await;
        let registry = &self.core.registry;

        let outcome = registry.add_subscription_info(event_name, info.clone())?;
        if outcome == AddOutcome::FirstForName {
            if let Err(e) = self.ensure_rule(event_name).await {
                registry.discard_subscription_info(event_name, &info)?;
                return Err(e);
            }
        }
        Ok(outcome.is_added())
    }

    async fn unsubscribe_info(&self, event_name: &str, info: &SubscriptionInfo) -> Result<()> {
        let _sync = self.core.rule_sync.lock().await;
        let outcome = self.core.registry.remove_subscription_info(event_name, info)?;
        self.after_removal(event_name, outcome).await
    }

    async fn after_removal(&self, event_name: &str, outcome: RemovalOutcome) -> Result<()> {
        match outcome {
            RemovalOutcome::NotSubscribed => {
                tracing::debug!(event_name, "Unsubscribe ignored, handler was not subscribed");
                Ok(())
            }
            RemovalOutcome::Removed => {
                tracing::info!(event_name, "Unsubscribed");
                Ok(())
            }
            RemovalOutcome::LastRemoved => {
                tracing::info!(event_name, "Unsubscribed last handler");
                self.retract_rule(event_name).await
            }
        }
    }

    async fn ensure_rule(&self, event_name: &str) -> Result<()> {
        match self
            .core
            .transport
            .add_rule(RoutingRule::for_event(event_name))
            .await
        {
            Ok(()) => {
                tracing::info!(rule = event_name, "Routing rule added");
                Ok(())
            }
            Err(e) if e.is_benign_rule_error() => {
                tracing::warn!(rule = event_name, "Routing rule already present");
                Ok(())
            }
            Err(e) => Err(BusError::Transport(e)),
        }
    }

    async fn retract_rule(&self, rule: &str) -> Result<()> {
        match self.core.transport.remove_rule(rule).await {
            Ok(()) => {
                tracing::info!(rule, "Routing rule removed");
                Ok(())
            }
            Err(e) if e.is_benign_rule_error() => {
                tracing::warn!(rule, "Routing rule already absent");
                Ok(())
            }
            Err(e) => Err(BusError::Transport(e)),
        }
    }
}

/// Delivery callback registered with the transport
///
/// Holds the bus weakly so the transport does not keep it alive.
struct BusDelivery {
    core: Weak<BusCore>,
}

#[async_trait]
impl DeliveryHandler for BusDelivery {
    async fn on_delivery(&self, delivery: Delivery, cancel: CancellationToken) -> Settlement {
        let Some(core) = self.core.upgrade() else {
            tracing::warn!(
                message_id = %delivery.message.message_id,
                "Event bus dropped, leaving message for redelivery"
            );
            return Settlement::Abandoned;
        };

        let message = &delivery.message;
        tracing::trace!(
            event_name = %message.label,
            event_type = %core.registry.resolver().reconstruct_event_name(&message.label),
            message_id = %message.message_id,
            delivery_count = delivery.delivery_count,
            "Message received"
        );

        let dispatched = core
            .dispatcher
            .process_event(&message.label, &message.message_id, &message.body, &cancel)
            .await;

        match dispatched {
            Ok(report) => {
                if let Err(e) = core.transport.complete(&delivery.lock_token).await {
                    tracing::warn!(
                        message_id = %message.message_id,
                        error = %e,
                        "Failed to complete message"
                    );
                    return Settlement::Abandoned;
                }
                tracing::debug!(
                    event_name = %report.event_name,
                    message_id = %report.message_id,
                    processed = report.processed,
                    failures = report.failures.len(),
                    "Message completed"
                );
                Settlement::Completed
            }
            Err(e) => {
                tracing::warn!(
                    event_name = %message.label,
                    message_id = %message.message_id,
                    error = %e,
                    "Message abandoned"
                );
                if let Err(abandon_err) = core.transport.abandon(&delivery.lock_token).await {
                    tracing::warn!(error = %abandon_err, "Failed to abandon message");
                }
                Settlement::Abandoned
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::HandlerContainer;
    use crate::transport::memory::MemoryTransport;
    use crate::error::TransportError;
    use crate::types::EventMetadata;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct PriceChangedIntegrationEvent {
        #[serde(flatten)]
        meta: EventMetadata,
        price: f64,
    }

    impl IntegrationEvent for PriceChangedIntegrationEvent {
        fn metadata(&self) -> &EventMetadata {
            &self.meta
        }
    }

    struct Noop;

    #[async_trait]
    impl IntegrationEventHandler<PriceChangedIntegrationEvent> for Noop {
        async fn handle(&self, _event: PriceChangedIntegrationEvent) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn bus(transport: &MemoryTransport) -> EventBus {
        EventBus::new(transport.clone(), HandlerContainer::new())
    }

    #[tokio::test]
    async fn test_start_removes_default_rule_once() {
        let transport = MemoryTransport::default();
        let bus = bus(&transport);

        bus.start().await.unwrap();
        bus.start().await.unwrap();
        assert!(transport.rule_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_keeps_default_rule_when_configured() {
        let transport = MemoryTransport::default();
        let bus = EventBus::with_config(
            transport.clone(),
            HandlerContainer::new(),
            BusConfig::default().with_remove_default_rule(false),
        )
        .unwrap();

        bus.start().await.unwrap();
        assert_eq!(transport.rule_names().await, vec![DEFAULT_RULE_NAME]);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = EventBus::with_config(
            MemoryTransport::default(),
            HandlerContainer::new(),
            BusConfig::default().with_max_concurrent_calls(0),
        );
        assert!(matches!(result, Err(BusError::Config(_))));
    }

    #[tokio::test]
    async fn test_subscribe_rolls_back_when_rule_fails() {
        struct BrokenRules;

        #[async_trait]
        impl Transport for BrokenRules {
            async fn send(&self, _message: Message) -> crate::transport::TransportResult<()> {
                Ok(())
            }
            async fn register_delivery_handler(
                &self,
                _handler: Arc<dyn DeliveryHandler>,
            ) -> crate::transport::TransportResult<()> {
                Ok(())
            }
            async fn add_rule(&self, _rule: RoutingRule) -> crate::transport::TransportResult<()> {
                Err(TransportError::Unavailable("rules offline".into()))
            }
            async fn remove_rule(&self, _name: &str) -> crate::transport::TransportResult<()> {
                Ok(())
            }
            async fn complete(&self, _lock_token: &str) -> crate::transport::TransportResult<()> {
                Ok(())
            }
            fn name(&self) -> &str {
                "broken"
            }
        }

        let bus = EventBus::new(BrokenRules, HandlerContainer::new());
        let mut removals = bus.registry().watch_removals();
        let err = bus
            .subscribe::<PriceChangedIntegrationEvent, Noop>()
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Transport(TransportError::Unavailable(_))));
        assert!(bus.registry().is_empty().unwrap());
        assert!(removals.try_recv().is_err());
        assert_eq!(bus.transport_name(), "broken");
    }

    #[tokio::test]
    async fn test_publish_transport_error_propagates() {
        let transport = MemoryTransport::default();
        let bus = bus(&transport);
        transport.set_offline(true);

        let event = PriceChangedIntegrationEvent {
            meta: EventMetadata::new(),
            price: 1.5,
        };
        let err = bus.publish(&event).await.unwrap_err();
        assert!(matches!(err, BusError::Transport(TransportError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_dropped_bus_abandons_deliveries() {
        let transport = MemoryTransport::new(1, false);
        {
            let bus = bus(&transport);
            bus.start().await.unwrap();
        }
        let settlement = transport
            .deliver(Message::json("PriceChanged", "{}"))
            .await
            .unwrap();
        assert_eq!(settlement, Settlement::Abandoned);
    }
}
