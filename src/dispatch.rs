//! Inbound message dispatch
//!
//! Routes one `(event name, payload)` pair to every subscription captured
//! from the registry at routing time. Handlers run one after another in
//! registration order; a failing or panicking handler is recorded and the
//! next one still runs. The returned `Ok` report means the message must be
//! completed; `Err` means it was abandoned before all handlers ran
//! (resolver failure or cancellation) and should be redelivered.

use crate::error::{BusError, Result};
use crate::failure::{FailureSink, HandlerFailure};
use crate::registry::{SubscriptionInfo, SubscriptionRegistry};
use crate::resolver::HandlerResolver;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Outcome of dispatching one message
#[derive(Debug, Clone)]
pub struct DispatchReport {
    /// Logical event name
    pub event_name: String,

    /// Message identifier
    pub message_id: String,

    /// False when no subscription existed for the name
    pub processed: bool,

    /// Handlers that were resolved and invoked
    pub attempted: usize,

    /// Handlers skipped because the resolver had no instance
    pub skipped: usize,

    /// Failures recorded for individual handlers
    pub failures: Vec<HandlerFailure>,
}

impl DispatchReport {
    fn unrouted(event_name: &str, message_id: &str) -> Self {
        Self {
            event_name: event_name.to_string(),
            message_id: message_id.to_string(),
            processed: false,
            attempted: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    /// Handlers that ran to success
    pub fn succeeded(&self) -> usize {
        self.attempted - self.failures.len()
    }
}

/// Dispatch engine
pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    resolver: Arc<dyn HandlerResolver>,
    failure_sink: Arc<dyn FailureSink>,
    scope_name: String,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        resolver: Arc<dyn HandlerResolver>,
        failure_sink: Arc<dyn FailureSink>,
        scope_name: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            resolver,
            failure_sink,
            scope_name: scope_name.into(),
        }
    }

    /// Dispatch a message body to the handlers subscribed to `event_name`
    pub async fn process_event(
        &self,
        event_name: &str,
        message_id: &str,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<DispatchReport> {
        if cancel.is_cancelled() {
            return Err(BusError::Cancelled(event_name.to_string()));
        }

        let subscriptions = self.registry.get_handlers_for_event(event_name)?;
        if subscriptions.is_empty() {
            tracing::debug!(event_name, message_id, "No subscriptions, dropping message");
            return Ok(DispatchReport::unrouted(event_name, message_id));
        }

        tracing::debug!(
            event_name,
            message_id,
            handlers = subscriptions.len(),
            "Dispatching message"
        );

        // Released on every return path below
        let scope = self.resolver.begin_scope(&self.scope_name)?;

        let mut report = DispatchReport {
            processed: true,
            ..DispatchReport::unrouted(event_name, message_id)
        };
        let mut document: Option<std::result::Result<serde_json::Value, String>> = None;

        for subscription in subscriptions.iter() {
            if cancel.is_cancelled() {
                return Err(BusError::Cancelled(event_name.to_string()));
            }

            let handler = subscription.handler();
            let Some(instance) = scope.resolve_optional(&handler)? else {
                tracing::debug!(
                    event_name,
                    handler = handler.name(),
                    "Handler not resolvable in scope, skipping"
                );
                report.skipped += 1;
                continue;
            };

            let started = match subscription {
                SubscriptionInfo::Typed { capability, .. } => {
                    capability.invoke(event_name, instance, body)
                }
                SubscriptionInfo::Dynamic { capability, .. } => {
                    let parsed = document.get_or_insert_with(|| {
                        serde_json::from_slice(body).map_err(|e| e.to_string())
                    });
                    match parsed {
                        Ok(value) => capability.invoke(event_name, instance, value.clone()),
                        Err(reason) => Err(BusError::Payload {
                            event_name: event_name.to_string(),
                            target: "json document".to_string(),
                            reason: reason.clone(),
                        }),
                    }
                }
            };
            report.attempted += 1;

            let outcome = match started {
                Ok(invocation) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(BusError::Cancelled(event_name.to_string()));
                        }
                        result = AssertUnwindSafe(invocation).catch_unwind() => {
                            result.unwrap_or_else(|panic| {
                                Err(BusError::Handler {
                                    handler: handler.name().to_string(),
                                    event_name: event_name.to_string(),
                                    reason: format!("panicked: {}", panic_message(panic.as_ref())),
                                })
                            })
                        }
                    }
                }
                Err(e) => Err(e),
            };

            if let Err(e) = outcome {
                tracing::warn!(
                    event_name,
                    message_id,
                    handler = handler.name(),
                    error = %e,
                    "Handler failed"
                );
                let failure = HandlerFailure::from_error(event_name, message_id, handler.name(), &e);
                if let Err(sink_err) = self.failure_sink.record(failure.clone()).await {
                    tracing::warn!(error = %sink_err, "Failed to record handler failure");
                }
                report.failures.push(failure);
            }
        }

        drop(scope);
        Ok(report)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
