//! Handler failure sink: observe per-handler failures
//!
//! Handler and payload failures never change a message's acknowledgment
//! outcome, so they are surfaced here instead of to the broker. Retrying
//! or alerting on them is an application-level concern.

use crate::error::{BusError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Classification of a handler failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The payload could not be decoded for the handler
    Payload,
    /// The handler returned an error or panicked
    Handler,
}

/// One failed handler invocation
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    /// Logical event name
    pub event_name: String,

    /// Message identifier
    pub message_id: String,

    /// Handler type name
    pub handler: String,

    /// Failure classification
    pub kind: FailureKind,

    /// Human-readable reason
    pub reason: String,

    /// When the failure was recorded
    pub failed_at: DateTime<Utc>,
}

impl HandlerFailure {
    /// Build a failure record from a dispatch error
    pub fn from_error(
        event_name: impl Into<String>,
        message_id: impl Into<String>,
        handler: impl Into<String>,
        error: &BusError,
    ) -> Self {
        let kind = match error {
            BusError::Payload { .. } | BusError::Serialization(_) => FailureKind::Payload,
            _ => FailureKind::Handler,
        };
        Self {
            event_name: event_name.into(),
            message_id: message_id.into(),
            handler: handler.into(),
            kind,
            reason: error.to_string(),
            failed_at: Utc::now(),
        }
    }
}

/// Observability sink for handler failures
#[async_trait]
pub trait FailureSink: Send + Sync {
    /// Record a failure
    async fn record(&self, failure: HandlerFailure) -> Result<()>;

    /// Number of failures currently retained
    async fn count(&self) -> Result<usize>;

    /// Most recent failures, newest first
    async fn list(&self, limit: usize) -> Result<Vec<HandlerFailure>>;
}

/// Bounded in-memory failure sink
///
/// Keeps the newest `max_failures` records; 0 means unbounded.
pub struct MemoryFailureSink {
    failures: Arc<RwLock<VecDeque<HandlerFailure>>>,
    max_failures: usize,
}

impl MemoryFailureSink {
    /// Create a sink retaining at most `max_failures` records
    pub fn new(max_failures: usize) -> Self {
        Self {
            failures: Arc::new(RwLock::new(VecDeque::new())),
            max_failures,
        }
    }
}

impl Default for MemoryFailureSink {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_FAILURE_CAPACITY)
    }
}

#[async_trait]
impl FailureSink for MemoryFailureSink {
    async fn record(&self, failure: HandlerFailure) -> Result<()> {
        let mut failures = self.failures.write().await;
        failures.push_back(failure);

        if self.max_failures > 0 {
            while failures.len() > self.max_failures {
                failures.pop_front();
            }
        }

        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.failures.read().await.len())
    }

    async fn list(&self, limit: usize) -> Result<Vec<HandlerFailure>> {
        let failures = self.failures.read().await;
        Ok(failures.iter().rev().take(limit).cloned().collect())
    }
}
