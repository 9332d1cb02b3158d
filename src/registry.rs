//! In-memory subscription registry
//!
//! Maps logical event names to ordered handler subscriptions and to the
//! event type bound to each name. Shared by the subscribe path and every
//! in-flight dispatch: reads take a shared lock and return an immutable
//! snapshot, writes are exclusive and copy-on-write, so a dispatch keeps
//! iterating the set it captured even if the registry changes underneath.
//!
//! Removal notifications from [`SubscriptionRegistry::watch_removals`] are
//! for external observers only; the bus drives rule retraction from the
//! [`RemovalOutcome`] returned by the remove calls.

use crate::error::{BusError, Result};
use crate::handler::{
    DynamicCapability, DynamicIntegrationEventHandler, HandlerKey, IntegrationEventHandler,
    TypedCapability,
};
use crate::naming::EventNameResolver;
use crate::types::{EventTypeDescriptor, IntegrationEvent};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

const REMOVAL_CHANNEL_CAPACITY: usize = 64;

/// One registered handler for one logical event name
#[derive(Clone)]
pub enum SubscriptionInfo {
    /// Handler bound to a concrete event type
    Typed {
        descriptor: EventTypeDescriptor,
        handler: HandlerKey,
        capability: TypedCapability,
    },
    /// Handler bound only by name, receiving a JSON document
    Dynamic {
        handler: HandlerKey,
        capability: DynamicCapability,
    },
}

impl SubscriptionInfo {
    /// Typed subscription of handler `H` to event `E`
    pub fn typed<E, H>() -> Self
    where
        E: IntegrationEvent,
        H: IntegrationEventHandler<E>,
    {
        Self::Typed {
            descriptor: EventTypeDescriptor::of::<E>(),
            handler: HandlerKey::of::<H>(),
            capability: TypedCapability::new::<E, H>(),
        }
    }

    /// Dynamic subscription of handler `H`
    pub fn dynamic<H: DynamicIntegrationEventHandler>() -> Self {
        Self::Dynamic {
            handler: HandlerKey::of::<H>(),
            capability: DynamicCapability::new::<H>(),
        }
    }

    /// The subscribed handler type
    pub fn handler(&self) -> HandlerKey {
        match self {
            Self::Typed { handler, .. } | Self::Dynamic { handler, .. } => *handler,
        }
    }

    /// Whether this is a dynamic subscription
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic { .. })
    }

    /// Bound event type, for typed subscriptions
    pub fn descriptor(&self) -> Option<EventTypeDescriptor> {
        match self {
            Self::Typed { descriptor, .. } => Some(*descriptor),
            Self::Dynamic { .. } => None,
        }
    }

    fn same_as(&self, other: &SubscriptionInfo) -> bool {
        self.is_dynamic() == other.is_dynamic() && self.handler() == other.handler()
    }
}

impl fmt::Debug for SubscriptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Typed {
                descriptor,
                handler,
                ..
            } => f
                .debug_struct("Typed")
                .field("event_type", &descriptor.type_name())
                .field("handler", &handler.name())
                .finish(),
            Self::Dynamic { handler, .. } => f
                .debug_struct("Dynamic")
                .field("handler", &handler.name())
                .finish(),
        }
    }
}

/// Emitted when the last subscription for a name is removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRemoved {
    pub event_name: String,
}

/// Result of an add call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The pair was already registered; nothing changed
    AlreadySubscribed,
    /// Added next to existing subscriptions for the name
    Added,
    /// Added as the first subscription for the name
    FirstForName,
}

impl AddOutcome {
    /// Whether the registry changed
    pub fn is_added(self) -> bool {
        !matches!(self, AddOutcome::AlreadySubscribed)
    }
}

/// Result of a remove call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// No matching subscription existed
    NotSubscribed,
    /// Removed; other subscriptions for the name remain
    Removed,
    /// Removed the last subscription for the name
    LastRemoved,
}

#[derive(Default)]
struct RegistryState {
    handlers: HashMap<String, Arc<[SubscriptionInfo]>>,
    event_types: HashMap<String, EventTypeDescriptor>,
}

/// Thread-safe subscription registry
pub struct SubscriptionRegistry {
    resolver: EventNameResolver,
    state: RwLock<RegistryState>,
    removals: broadcast::Sender<SubscriptionRemoved>,
}

impl SubscriptionRegistry {
    /// Create an empty registry using `resolver` for logical names
    pub fn new(resolver: EventNameResolver) -> Self {
        let (removals, _) = broadcast::channel(REMOVAL_CHANNEL_CAPACITY);
        Self {
            resolver,
            state: RwLock::new(RegistryState::default()),
            removals,
        }
    }

    /// The name resolver
    pub fn resolver(&self) -> &EventNameResolver {
        &self.resolver
    }

    /// Logical name for event type `E`
    pub fn event_key<E: IntegrationEvent>(&self) -> Result<String> {
        self.resolver.resolve(&EventTypeDescriptor::of::<E>())
    }

    /// Subscribe to removal notifications (for external observers)
    pub fn watch_removals(&self) -> broadcast::Receiver<SubscriptionRemoved> {
        self.removals.subscribe()
    }

    /// Register typed handler `H` for event `E`
    ///
    /// Returns `Ok(false)` when the pair is already registered. Fails with
    /// [`BusError::Conflict`] if another event type owns the logical name;
    /// the registry is left untouched in that case.
    pub fn add_subscription<E, H>(&self) -> Result<bool>
    where
        E: IntegrationEvent,
        H: IntegrationEventHandler<E>,
    {
        let event_name = self.event_key::<E>()?;
        Ok(self
            .add(&event_name, SubscriptionInfo::typed::<E, H>())?
            .is_added())
    }

    /// Register dynamic handler `H` under `event_name`
    pub fn add_dynamic_subscription<H: DynamicIntegrationEventHandler>(
        &self,
        event_name: &str,
    ) -> Result<bool> {
        Ok(self
            .add(event_name, SubscriptionInfo::dynamic::<H>())?
            .is_added())
    }

    /// Register a subscription, reporting whether it opened the name
    ///
    /// The outcome is decided under the same write lock as the insert.
    pub fn add_subscription_info(
        &self,
        event_name: &str,
        info: SubscriptionInfo,
    ) -> Result<AddOutcome> {
        self.add(event_name, info)
    }

    /// Undo a just-made registration without emitting a notification
    pub(crate) fn discard_subscription_info(
        &self,
        event_name: &str,
        info: &SubscriptionInfo,
    ) -> Result<RemovalOutcome> {
        self.remove(event_name, info, false)
    }

    /// Remove a subscription by value
    pub fn remove_subscription_info(
        &self,
        event_name: &str,
        info: &SubscriptionInfo,
    ) -> Result<RemovalOutcome> {
        self.remove(event_name, info, true)
    }

    /// Remove typed handler `H` for event `E`
    pub fn remove_subscription<E, H>(&self) -> Result<RemovalOutcome>
    where
        E: IntegrationEvent,
        H: IntegrationEventHandler<E>,
    {
        let event_name = self.event_key::<E>()?;
        self.remove(&event_name, &SubscriptionInfo::typed::<E, H>(), true)
    }

    /// Remove dynamic handler `H` from `event_name`
    pub fn remove_dynamic_subscription<H: DynamicIntegrationEventHandler>(
        &self,
        event_name: &str,
    ) -> Result<RemovalOutcome> {
        self.remove(event_name, &SubscriptionInfo::dynamic::<H>(), true)
    }

    /// Check whether the name is known to the registry
    pub fn has_subscriptions_for_event(&self, event_name: &str) -> Result<bool> {
        Ok(self.read()?.handlers.contains_key(event_name))
    }

    /// Check whether event type `E` has any subscription
    pub fn has_subscriptions_for<E: IntegrationEvent>(&self) -> Result<bool> {
        let event_name = self.event_key::<E>()?;
        self.has_subscriptions_for_event(&event_name)
    }

    /// Snapshot of the subscriptions for a name, in registration order
    ///
    /// Empty when nothing is registered.
    pub fn get_handlers_for_event(&self, event_name: &str) -> Result<Arc<[SubscriptionInfo]>> {
        Ok(self
            .read()?
            .handlers
            .get(event_name)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new())))
    }

    /// Event type bound to a name by a typed subscription
    pub fn get_event_type_by_name(&self, event_name: &str) -> Result<EventTypeDescriptor> {
        self.read()?
            .event_types
            .get(event_name)
            .copied()
            .ok_or_else(|| BusError::NotFound(format!("No event type bound to '{}'", event_name)))
    }

    /// Logical names that currently have subscriptions
    pub fn event_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.read()?.handlers.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Whether no subscription is registered
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.handlers.is_empty())
    }

    /// Reset to the initial empty state
    ///
    /// Does not emit removal notifications: broker-side rules outlive the
    /// process-local registry.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.write()?;
        state.handlers.clear();
        state.event_types.clear();
        tracing::debug!("Subscription registry cleared");
        Ok(())
    }

    fn add(&self, event_name: &str, info: SubscriptionInfo) -> Result<AddOutcome> {
        let mut state = self.write()?;

        if let Some(requested) = info.descriptor() {
            if let Some(existing) = state.event_types.get(event_name) {
                if *existing != requested {
                    return Err(BusError::Conflict {
                        event_name: event_name.to_string(),
                        existing: existing.type_name().to_string(),
                        requested: requested.type_name().to_string(),
                    });
                }
            }
        }

        let current = state.handlers.get(event_name).cloned();
        if let Some(ref subs) = current {
            if subs.iter().any(|s| s.same_as(&info)) {
                tracing::debug!(
                    event_name,
                    handler = info.handler().name(),
                    "Handler already subscribed"
                );
                return Ok(AddOutcome::AlreadySubscribed);
            }
        }

        if let Some(descriptor) = info.descriptor() {
            state
                .event_types
                .entry(event_name.to_string())
                .or_insert(descriptor);
        }

        let outcome = if current.is_some() {
            AddOutcome::Added
        } else {
            AddOutcome::FirstForName
        };
        let mut subs: Vec<SubscriptionInfo> = current.map(|s| s.to_vec()).unwrap_or_default();
        subs.push(info);
        state.handlers.insert(event_name.to_string(), Arc::from(subs));
        Ok(outcome)
    }

    fn remove(
        &self,
        event_name: &str,
        info: &SubscriptionInfo,
        notify: bool,
    ) -> Result<RemovalOutcome> {
        let outcome = {
            let mut state = self.write()?;

            let Some(current) = state.handlers.get(event_name) else {
                return Ok(RemovalOutcome::NotSubscribed);
            };
            let Some(index) = current.iter().position(|s| s.same_as(info)) else {
                return Ok(RemovalOutcome::NotSubscribed);
            };

            let mut subs = current.to_vec();
            subs.remove(index);

            if subs.is_empty() {
                state.handlers.remove(event_name);
                state.event_types.remove(event_name);
                RemovalOutcome::LastRemoved
            } else {
                if !subs.iter().any(|s| !s.is_dynamic()) {
                    state.event_types.remove(event_name);
                }
                state.handlers.insert(event_name.to_string(), Arc::from(subs));
                RemovalOutcome::Removed
            }
        };

        if notify && outcome == RemovalOutcome::LastRemoved {
            // No receivers is fine
            let _ = self.removals.send(SubscriptionRemoved {
                event_name: event_name.to_string(),
            });
        }

        Ok(outcome)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RegistryState>> {
        self.state
            .read()
            .map_err(|e| BusError::Lock(format!("Subscription registry lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RegistryState>> {
        self.state
            .write()
            .map_err(|e| BusError::Lock(format!("Subscription registry lock poisoned: {}", e)))
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new(EventNameResolver::default())
    }
}
