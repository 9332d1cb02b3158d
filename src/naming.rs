//! Logical event name resolution
//!
//! Maps structural event type names to wire-level logical names by
//! stripping a configured suffix, and back by appending it. With suffix
//! `IntegrationEvent`, `ItemCreatedIntegrationEvent` travels as `ItemCreated`.

use crate::error::{BusError, Result};
use crate::types::EventTypeDescriptor;

/// Suffix-stripping name resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNameResolver {
    suffix: String,
}

impl EventNameResolver {
    /// Create a resolver stripping `suffix` (empty suffix = identity)
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    /// The configured suffix
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Logical name for an event type descriptor
    pub fn resolve(&self, descriptor: &EventTypeDescriptor) -> Result<String> {
        self.resolve_type_name(descriptor.type_name())
    }

    /// Logical name for a structural type name
    ///
    /// Fails with [`BusError::Naming`] when the name lacks the suffix or
    /// strips to nothing, since neither could be reconstructed.
    pub fn resolve_type_name(&self, type_name: &str) -> Result<String> {
        let logical = type_name.strip_suffix(self.suffix.as_str()).ok_or_else(|| {
            BusError::Naming(format!(
                "Type '{}' does not end with suffix '{}'",
                type_name, self.suffix
            ))
        })?;

        if logical.is_empty() {
            return Err(BusError::Naming(format!(
                "Type '{}' has an empty logical name",
                type_name
            )));
        }

        Ok(logical.to_string())
    }

    /// Structural type name for a logical name (inverse of `resolve`)
    pub fn reconstruct_event_name(&self, logical_name: &str) -> String {
        format!("{}{}", logical_name, self.suffix)
    }
}

impl Default for EventNameResolver {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_NAME_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_default_suffix() {
        let resolver = EventNameResolver::default();
        assert_eq!(
            resolver
                .resolve_type_name("ItemCreatedIntegrationEvent")
                .unwrap(),
            "ItemCreated"
        );
    }

    #[test]
    fn test_reconstruct_is_inverse() {
        let resolver = EventNameResolver::new("Event");
        let logical = resolver.resolve_type_name("OrderPlacedEvent").unwrap();
        assert_eq!(logical, "OrderPlaced");
        assert_eq!(resolver.reconstruct_event_name(&logical), "OrderPlacedEvent");
    }

    #[test]
    fn test_only_trailing_suffix_is_stripped() {
        let resolver = EventNameResolver::new("Event");
        assert_eq!(
            resolver.resolve_type_name("EventLogEvent").unwrap(),
            "EventLog"
        );
    }

    #[test]
    fn test_missing_suffix_rejected() {
        let resolver = EventNameResolver::default();
        let err = resolver.resolve_type_name("ItemCreated").unwrap_err();
        assert!(matches!(err, BusError::Naming(_)));
    }

    #[test]
    fn test_suffix_only_name_rejected() {
        let resolver = EventNameResolver::default();
        assert!(resolver.resolve_type_name("IntegrationEvent").is_err());
    }

    #[test]
    fn test_empty_suffix_is_identity() {
        let resolver = EventNameResolver::new("");
        assert_eq!(resolver.resolve_type_name("Item").unwrap(), "Item");
        assert_eq!(resolver.reconstruct_event_name("Item"), "Item");
    }
}
