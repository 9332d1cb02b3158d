//! Core types for the a3s-bus system
//!
//! Wire-facing types use camelCase JSON serialization.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use uuid::Uuid;

/// Content type of every message body produced by the bus
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Name of the catch-all rule brokers create for a fresh subscription
pub const DEFAULT_RULE_NAME: &str = "$Default";

/// Identity and creation time carried by every integration event
///
/// Assigned once at creation. The id is for deduplication and tracing;
/// two events with equal payloads are still distinct records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// Unique event identifier
    pub id: Uuid,

    /// UTC creation timestamp
    pub creation_date: DateTime<Utc>,
}

impl EventMetadata {
    /// Fresh metadata with a random id and the current time
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            creation_date: Utc::now(),
        }
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// An event published across service boundaries
///
/// Implementors usually embed [`EventMetadata`] with `#[serde(flatten)]`:
///
/// ```rust
/// use a3s_bus::{EventMetadata, IntegrationEvent};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct ItemCreatedIntegrationEvent {
///     #[serde(flatten)]
///     meta: EventMetadata,
///     title: String,
/// }
///
/// impl IntegrationEvent for ItemCreatedIntegrationEvent {
///     fn metadata(&self) -> &EventMetadata {
///         &self.meta
///     }
/// }
///
/// assert_eq!(
///     ItemCreatedIntegrationEvent::type_name(),
///     "ItemCreatedIntegrationEvent"
/// );
/// ```
pub trait IntegrationEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Identity and creation time of this event
    fn metadata(&self) -> &EventMetadata;

    /// Structural type name used for logical name derivation
    ///
    /// Defaults to the unqualified Rust type name.
    fn type_name() -> &'static str
    where
        Self: Sized,
    {
        short_type_name::<Self>()
    }

    /// Unique event identifier
    fn id(&self) -> Uuid {
        self.metadata().id
    }

    /// UTC creation timestamp
    fn created_at(&self) -> DateTime<Utc> {
        self.metadata().creation_date
    }
}

/// Structural descriptor of a concrete event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventTypeDescriptor {
    type_id: TypeId,
    type_name: &'static str,
}

impl EventTypeDescriptor {
    /// Descriptor for an integration event type
    pub fn of<E: IntegrationEvent>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            type_name: E::type_name(),
        }
    }

    /// Structural type name (e.g., `ItemCreatedIntegrationEvent`)
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Rust type identity
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

/// A message on the wire
///
/// The logical event name travels out-of-band in `label`; the body is
/// the UTF-8 JSON serialization of the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Unique message identifier (uuid v4)
    pub message_id: String,

    /// Logical event name
    pub label: String,

    /// Body encoding
    pub content_type: String,

    /// Serialized event
    pub body: Bytes,
}

impl Message {
    /// Build a JSON message with a fresh message id
    pub fn json(label: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            label: label.into(),
            content_type: JSON_CONTENT_TYPE.to_string(),
            body: body.into(),
        }
    }

    /// Body as UTF-8 text
    pub fn body_str(&self) -> std::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }
}

/// A message handed to the bus by the transport, pending settlement
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The delivered message
    pub message: Message,

    /// Broker lock token used to complete or abandon the message
    pub lock_token: String,

    /// Number of delivery attempts so far (1 on first delivery)
    pub delivery_count: u32,
}

/// Broker-side filter selecting which messages reach this subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum RuleFilter {
    /// Match messages whose label equals the given value
    CorrelationLabel { label: String },
    /// Match every message
    MatchAll,
}

/// A named routing rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    /// Rule name (the logical event name for bus-managed rules)
    pub name: String,

    /// Filter expression
    pub filter: RuleFilter,
}

impl RoutingRule {
    /// Rule delivering messages labelled with `event_name`, named after it
    pub fn for_event(event_name: impl Into<String>) -> Self {
        let name = event_name.into();
        Self {
            filter: RuleFilter::CorrelationLabel {
                label: name.clone(),
            },
            name,
        }
    }

    /// Whether a message passes this rule's filter
    pub fn matches(&self, message: &Message) -> bool {
        match &self.filter {
            RuleFilter::CorrelationLabel { label } => *label == message.label,
            RuleFilter::MatchAll => true,
        }
    }
}

/// Unqualified type name: module path and generic arguments removed
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct OrderShippedIntegrationEvent {
        #[serde(flatten)]
        meta: EventMetadata,
        order_id: u64,
    }

    impl IntegrationEvent for OrderShippedIntegrationEvent {
        fn metadata(&self) -> &EventMetadata {
            &self.meta
        }
    }

    #[test]
    fn test_metadata_unique_ids() {
        let a = EventMetadata::new();
        let b = EventMetadata::new();
        assert_ne!(a.id, b.id);
        assert!(b.creation_date >= a.creation_date);
    }

    #[test]
    fn test_metadata_serializes_camel_case() {
        let event = OrderShippedIntegrationEvent {
            meta: EventMetadata::new(),
            order_id: 7,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("id").is_some());
        assert!(json.get("creationDate").is_some());
        assert_eq!(json["order_id"], 7);

        let parsed: OrderShippedIntegrationEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.id(), event.id());
        assert_eq!(parsed.created_at(), event.created_at());
    }

    #[test]
    fn test_default_type_name_is_unqualified() {
        assert_eq!(
            OrderShippedIntegrationEvent::type_name(),
            "OrderShippedIntegrationEvent"
        );
        assert_eq!(short_type_name::<Vec<String>>(), "Vec");
    }

    #[test]
    fn test_descriptor_identity() {
        let a = EventTypeDescriptor::of::<OrderShippedIntegrationEvent>();
        let b = EventTypeDescriptor::of::<OrderShippedIntegrationEvent>();
        assert_eq!(a, b);
        assert_eq!(a.type_name(), "OrderShippedIntegrationEvent");
    }

    #[test]
    fn test_message_json() {
        let msg = Message::json("OrderShipped", r#"{"a":1}"#.as_bytes().to_vec());
        assert_eq!(msg.label, "OrderShipped");
        assert_eq!(msg.content_type, JSON_CONTENT_TYPE);
        assert_eq!(msg.body_str().unwrap(), r#"{"a":1}"#);
        assert!(Uuid::parse_str(&msg.message_id).is_ok());
    }

    #[test]
    fn test_rule_matching() {
        let rule = RoutingRule::for_event("OrderShipped");
        assert_eq!(rule.name, "OrderShipped");
        assert!(rule.matches(&Message::json("OrderShipped", Vec::new())));
        assert!(!rule.matches(&Message::json("OrderPlaced", Vec::new())));

        let all = RoutingRule {
            name: DEFAULT_RULE_NAME.to_string(),
            filter: RuleFilter::MatchAll,
        };
        assert!(all.matches(&Message::json("Anything", Vec::new())));
    }

    #[test]
    fn test_rule_filter_serialization() {
        let rule = RoutingRule::for_event("OrderShipped");
        let json = serde_json::to_string(&rule).unwrap();
        assert!(json.contains("\"type\":\"CorrelationLabel\""));
        assert!(json.contains("\"label\":\"OrderShipped\""));
    }
}
