//! Error types for a3s-bus

use thiserror::Error;

/// Errors that can occur in the event bus
#[derive(Debug, Error)]
pub enum BusError {
    /// A different event type is already registered under the logical name
    #[error("Event name '{event_name}' is already bound to '{existing}', cannot bind '{requested}'")]
    Conflict {
        event_name: String,
        existing: String,
        requested: String,
    },

    /// Query for an unregistered name or descriptor
    #[error("Not found: {0}")]
    NotFound(String),

    /// Inbound payload could not be decoded for one handler
    #[error("Payload for event '{event_name}' could not be decoded as '{target}': {reason}")]
    Payload {
        event_name: String,
        target: String,
        reason: String,
    },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Broker transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A handler body returned an error or panicked
    #[error("Handler '{handler}' failed for event '{event_name}': {reason}")]
    Handler {
        handler: String,
        event_name: String,
        reason: String,
    },

    /// Type name does not follow the configured naming convention
    #[error("Naming error: {0}")]
    Naming(String),

    /// Handler resolution scope could not be opened
    #[error("Handler resolution failed: {0}")]
    Resolution(String),

    /// Dispatch was cancelled by the hosting process
    #[error("Dispatch cancelled for event '{0}'")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal lock was poisoned by a panicking writer
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

/// Errors reported by a broker transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Broker connection is unavailable
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// Message could not be sent
    #[error("Failed to send message '{label}': {reason}")]
    Send { label: String, reason: String },

    /// Completion/abandon of a delivered message failed
    #[error("Failed to settle message '{0}'")]
    Ack(String),

    /// A routing rule with this name already exists
    #[error("Routing rule already exists: {0}")]
    RuleAlreadyExists(String),

    /// No routing rule with this name exists
    #[error("Routing rule not found: {0}")]
    RuleNotFound(String),

    /// The delivery callback was registered twice
    #[error("Delivery handler already registered")]
    HandlerAlreadyRegistered,
}

impl TransportError {
    /// Rule responses that mean the broker is already in the desired state
    pub fn is_benign_rule_error(&self) -> bool {
        matches!(
            self,
            TransportError::RuleAlreadyExists(_) | TransportError::RuleNotFound(_)
        )
    }
}

/// Result type alias for bus operations
pub type Result<T> = std::result::Result<T, BusError>;
