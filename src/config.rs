//! Event bus configuration

use crate::error::{BusError, Result};
use serde::{Deserialize, Serialize};

/// Suffix stripped from event type names by default
pub const DEFAULT_EVENT_NAME_SUFFIX: &str = "IntegrationEvent";

/// Default number of simultaneously in-flight messages
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 10;

/// Default capacity of the built-in failure sink
pub const DEFAULT_FAILURE_CAPACITY: usize = 10_000;

/// Event bus configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusConfig {
    /// Suffix stripped from event type names to form logical names
    #[serde(default = "default_suffix")]
    pub event_name_suffix: String,

    /// Broker subscription this bus consumes from
    ///
    /// Read by broker adapters when they bind their receiver; the bus
    /// itself only reports it in its start log.
    #[serde(default = "default_subscription_name")]
    pub subscription_name: String,

    /// Name passed to the handler resolver for every per-message scope
    #[serde(default = "default_scope_name")]
    pub scope_name: String,

    /// Maximum number of messages dispatched concurrently
    ///
    /// Enforced by the transport, which owns the delivery loop
    /// (see [`MemoryTransport::from_config`](crate::transport::memory::MemoryTransport::from_config)).
    /// The bus validates it but does not throttle dispatch itself.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Retract the broker's catch-all `$Default` rule on start
    #[serde(default = "default_true")]
    pub remove_default_rule: bool,

    /// Capacity of the built-in failure sink (0 = unbounded)
    #[serde(default = "default_failure_capacity")]
    pub failure_capacity: usize,
}

fn default_suffix() -> String {
    DEFAULT_EVENT_NAME_SUFFIX.to_string()
}

fn default_subscription_name() -> String {
    "a3s-bus".to_string()
}

fn default_scope_name() -> String {
    "a3s_event_bus".to_string()
}

fn default_max_concurrent_calls() -> usize {
    DEFAULT_MAX_CONCURRENT_CALLS
}

fn default_true() -> bool {
    true
}

fn default_failure_capacity() -> usize {
    DEFAULT_FAILURE_CAPACITY
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            event_name_suffix: default_suffix(),
            subscription_name: default_subscription_name(),
            scope_name: default_scope_name(),
            max_concurrent_calls: default_max_concurrent_calls(),
            remove_default_rule: true,
            failure_capacity: default_failure_capacity(),
        }
    }
}

impl BusConfig {
    /// Parse a JSON configuration document, filling in defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BusError::Config(format!("Invalid bus configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_calls == 0 {
            return Err(BusError::Config(
                "maxConcurrentCalls must be >= 1".to_string(),
            ));
        }
        if self.subscription_name.trim().is_empty() {
            return Err(BusError::Config(
                "subscriptionName cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_event_name_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.event_name_suffix = suffix.into();
        self
    }

    pub fn with_subscription_name(mut self, name: impl Into<String>) -> Self {
        self.subscription_name = name.into();
        self
    }

    pub fn with_scope_name(mut self, name: impl Into<String>) -> Self {
        self.scope_name = name.into();
        self
    }

    pub fn with_max_concurrent_calls(mut self, max: usize) -> Self {
        self.max_concurrent_calls = max;
        self
    }

    pub fn with_remove_default_rule(mut self, remove: bool) -> Self {
        self.remove_default_rule = remove;
        self
    }

    pub fn with_failure_capacity(mut self, capacity: usize) -> Self {
        self.failure_capacity = capacity;
        self
    }
}
