//! Event handler capabilities
//!
//! Application code implements [`IntegrationEventHandler`] for strongly
//! typed events or [`DynamicIntegrationEventHandler`] for schema-less JSON.
//! At subscribe time the concrete `(event, handler)` pair is captured in a
//! type-erased capability, so dispatch never needs runtime method lookup.

use crate::error::{BusError, Result};
use crate::types::{short_type_name, IntegrationEvent};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::any::{Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

/// Handler for a concrete integration event type
#[async_trait]
pub trait IntegrationEventHandler<E: IntegrationEvent>: Send + Sync + 'static {
    /// Handle one event
    async fn handle(&self, event: E) -> anyhow::Result<()>;
}

/// Handler for events whose schema is not known at compile time
#[async_trait]
pub trait DynamicIntegrationEventHandler: Send + Sync + 'static {
    /// Handle one event, parsed as a generic JSON document
    async fn handle(&self, event: serde_json::Value) -> anyhow::Result<()>;
}

/// A resolved handler instance, as produced by a resolution scope
pub type HandlerInstance = Arc<dyn Any + Send + Sync>;

/// Identity of a handler type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl HandlerKey {
    /// Key for handler type `H`
    pub fn of<H: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<H>(),
            type_name: short_type_name::<H>(),
        }
    }

    /// Unqualified handler type name, for logs
    pub fn name(&self) -> &'static str {
        self.type_name
    }

    /// Rust type identity
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

trait TypedInvoke: Send + Sync {
    fn invoke(
        &self,
        event_name: &str,
        instance: HandlerInstance,
        body: &[u8],
    ) -> Result<BoxFuture<'static, Result<()>>>;
}

trait DynamicInvoke: Send + Sync {
    fn invoke(
        &self,
        event_name: &str,
        instance: HandlerInstance,
        document: serde_json::Value,
    ) -> Result<BoxFuture<'static, Result<()>>>;
}

struct TypedInvoker<E, H>(PhantomData<fn() -> (E, H)>);

impl<E, H> TypedInvoke for TypedInvoker<E, H>
where
    E: IntegrationEvent,
    H: IntegrationEventHandler<E>,
{
    fn invoke(
        &self,
        event_name: &str,
        instance: HandlerInstance,
        body: &[u8],
    ) -> Result<BoxFuture<'static, Result<()>>> {
        let handler = downcast::<H>(event_name, instance)?;
        let event: E = serde_json::from_slice(body).map_err(|e| BusError::Payload {
            event_name: event_name.to_string(),
            target: E::type_name().to_string(),
            reason: e.to_string(),
        })?;

        let event_name = event_name.to_string();
        Ok(Box::pin(async move {
            handler
                .handle(event)
                .await
                .map_err(|e| handler_error::<H>(&event_name, e))
        }))
    }
}

struct DynamicInvoker<H>(PhantomData<fn() -> H>);

impl<H: DynamicIntegrationEventHandler> DynamicInvoke for DynamicInvoker<H> {
    fn invoke(
        &self,
        event_name: &str,
        instance: HandlerInstance,
        document: serde_json::Value,
    ) -> Result<BoxFuture<'static, Result<()>>> {
        let handler = downcast::<H>(event_name, instance)?;
        let event_name = event_name.to_string();
        Ok(Box::pin(async move {
            handler
                .handle(document)
                .await
                .map_err(|e| handler_error::<H>(&event_name, e))
        }))
    }
}

fn downcast<H: Send + Sync + 'static>(event_name: &str, instance: HandlerInstance) -> Result<Arc<H>> {
    instance.downcast::<H>().map_err(|_| BusError::Handler {
        handler: short_type_name::<H>().to_string(),
        event_name: event_name.to_string(),
        reason: "resolved instance has a different type".to_string(),
    })
}

fn handler_error<H>(event_name: &str, err: anyhow::Error) -> BusError {
    BusError::Handler {
        handler: short_type_name::<H>().to_string(),
        event_name: event_name.to_string(),
        reason: format!("{:#}", err),
    }
}

/// Type-erased capability invoking `H` with a payload decoded as `E`
#[derive(Clone)]
pub struct TypedCapability(Arc<dyn TypedInvoke>);

impl TypedCapability {
    /// Capability for the `(E, H)` pair
    pub fn new<E, H>() -> Self
    where
        E: IntegrationEvent,
        H: IntegrationEventHandler<E>,
    {
        Self(Arc::new(TypedInvoker::<E, H>(PhantomData)))
    }

    /// Decode `body` and start the handler
    ///
    /// Decoding failures surface as [`BusError::Payload`] before any
    /// handler code runs.
    pub(crate) fn invoke(
        &self,
        event_name: &str,
        instance: HandlerInstance,
        body: &[u8],
    ) -> Result<BoxFuture<'static, Result<()>>> {
        self.0.invoke(event_name, instance, body)
    }
}

/// Type-erased capability invoking a dynamic handler `H`
#[derive(Clone)]
pub struct DynamicCapability(Arc<dyn DynamicInvoke>);

impl DynamicCapability {
    /// Capability for handler type `H`
    pub fn new<H: DynamicIntegrationEventHandler>() -> Self {
        Self(Arc::new(DynamicInvoker::<H>(PhantomData)))
    }

    pub(crate) fn invoke(
        &self,
        event_name: &str,
        instance: HandlerInstance,
        document: serde_json::Value,
    ) -> Result<BoxFuture<'static, Result<()>>> {
        self.0.invoke(event_name, instance, document)
    }
}
