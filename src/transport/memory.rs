//! In-memory transport for testing and single-process use
//!
//! Behaves like a topic with one subscription: rules filter which sent
//! messages loop back to the delivery handler, deliveries are bounded by
//! a concurrency limit, and every send, rule change and settlement is
//! recorded for inspection. The records grow without bound until
//! [`MemoryTransport::clear_records`] is called.

use super::{DeliveryHandler, Settlement, Transport, TransportResult};
use crate::config::{BusConfig, DEFAULT_MAX_CONCURRENT_CALLS};
use crate::error::TransportError;
use crate::types::{Delivery, Message, RoutingRule, RuleFilter, DEFAULT_RULE_NAME};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

struct MemoryInner {
    sent: RwLock<Vec<Message>>,
    rules: RwLock<Vec<RoutingRule>>,
    completed: RwLock<Vec<String>>,
    abandoned: RwLock<Vec<String>>,
    outstanding: RwLock<HashSet<String>>,
    handler: RwLock<Option<Arc<dyn DeliveryHandler>>>,
    permits: Semaphore,
    tasks: TaskTracker,
    cancel: CancellationToken,
    loopback: bool,
    offline: AtomicBool,
    lock_seq: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// In-memory transport
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<MemoryInner>,
}

impl MemoryTransport {
    /// Create a transport delivering at most `max_concurrent_calls` at once
    ///
    /// With `loopback`, sent messages matching a rule are delivered back
    /// to the registered handler in the background.
    pub fn new(max_concurrent_calls: usize, loopback: bool) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                sent: RwLock::new(Vec::new()),
                rules: RwLock::new(vec![RoutingRule {
                    name: DEFAULT_RULE_NAME.to_string(),
                    filter: RuleFilter::MatchAll,
                }]),
                completed: RwLock::new(Vec::new()),
                abandoned: RwLock::new(Vec::new()),
                outstanding: RwLock::new(HashSet::new()),
                handler: RwLock::new(None),
                permits: Semaphore::new(max_concurrent_calls.max(1)),
                tasks: TaskTracker::new(),
                cancel: CancellationToken::new(),
                loopback,
                offline: AtomicBool::new(false),
                lock_seq: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Loopback transport sized by `maxConcurrentCalls`
    pub fn from_config(config: &BusConfig) -> Self {
        Self::new(config.max_concurrent_calls, true)
    }

    /// Deliver a message to the registered handler and wait for settlement
    ///
    /// Waits for a free delivery slot first, like a broker client would.
    pub async fn deliver(&self, message: Message) -> TransportResult<Settlement> {
        deliver(self.inner.clone(), message).await
    }

    /// Wait until all background loopback deliveries have settled
    pub async fn wait_idle(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    /// Simulate broker outage: sends fail with `Unavailable`
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Signal cancellation to every in-flight and future delivery
    pub fn cancel_deliveries(&self) {
        self.inner.cancel.cancel();
    }

    /// Messages sent so far, oldest first
    pub async fn sent_messages(&self) -> Vec<Message> {
        self.inner.sent.read().await.clone()
    }

    /// Current routing rules
    pub async fn rules(&self) -> Vec<RoutingRule> {
        self.inner.rules.read().await.clone()
    }

    /// Names of current routing rules
    pub async fn rule_names(&self) -> Vec<String> {
        self.inner
            .rules
            .read()
            .await
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    /// Lock tokens of completed deliveries
    pub async fn completed(&self) -> Vec<String> {
        self.inner.completed.read().await.clone()
    }

    /// Lock tokens of abandoned deliveries
    pub async fn abandoned(&self) -> Vec<String> {
        self.inner.abandoned.read().await.clone()
    }

    /// Forget recorded sends and settlements (rules are kept)
    pub async fn clear_records(&self) {
        self.inner.sent.write().await.clear();
        self.inner.completed.write().await.clear();
        self.inner.abandoned.write().await.clear();
    }

    /// Highest number of simultaneous deliveries observed
    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl MemoryTransport {
    /// Each lock token settles exactly once
    async fn settle(&self, lock_token: &str) -> TransportResult<()> {
        if self.inner.outstanding.write().await.remove(lock_token) {
            Ok(())
        } else {
            Err(TransportError::Ack(lock_token.to_string()))
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_CALLS, true)
    }
}

async fn deliver(inner: Arc<MemoryInner>, message: Message) -> TransportResult<Settlement> {
    let handler = inner
        .handler
        .read()
        .await
        .clone()
        .ok_or_else(|| TransportError::Unavailable("No delivery handler registered".to_string()))?;

    let _permit = inner
        .permits
        .acquire()
        .await
        .map_err(|_| TransportError::Unavailable("Transport closed".to_string()))?;

    let current = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    inner.peak_in_flight.fetch_max(current, Ordering::SeqCst);

    let seq = inner.lock_seq.fetch_add(1, Ordering::SeqCst) + 1;
    let lock_token = format!("lock-{}", seq);
    inner.outstanding.write().await.insert(lock_token.clone());
    let delivery = Delivery {
        message,
        lock_token,
        delivery_count: 1,
    };

    let settlement = handler.on_delivery(delivery, inner.cancel.child_token()).await;
    inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    Ok(settlement)
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: Message) -> TransportResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable(
                "Memory transport is offline".to_string(),
            ));
        }
        if message.label.is_empty() {
            return Err(TransportError::Send {
                label: message.label,
                reason: "message has no label".to_string(),
            });
        }

        self.inner.sent.write().await.push(message.clone());
        tracing::trace!(label = %message.label, message_id = %message.message_id, "Message sent");

        if !self.inner.loopback {
            return Ok(());
        }

        let routed = self
            .inner
            .rules
            .read()
            .await
            .iter()
            .any(|r| r.matches(&message));
        let registered = self.inner.handler.read().await.is_some();

        if routed && registered {
            let inner = self.inner.clone();
            self.inner.tasks.spawn(async move {
                if let Err(e) = deliver(inner, message).await {
                    tracing::warn!(error = %e, "Loopback delivery failed");
                }
            });
        }

        Ok(())
    }

    async fn register_delivery_handler(
        &self,
        handler: Arc<dyn DeliveryHandler>,
    ) -> TransportResult<()> {
        let mut slot = self.inner.handler.write().await;
        if slot.is_some() {
            return Err(TransportError::HandlerAlreadyRegistered);
        }
        *slot = Some(handler);
        Ok(())
    }

    async fn add_rule(&self, rule: RoutingRule) -> TransportResult<()> {
        let mut rules = self.inner.rules.write().await;
        if rules.iter().any(|r| r.name == rule.name) {
            return Err(TransportError::RuleAlreadyExists(rule.name));
        }
        rules.push(rule);
        Ok(())
    }

    async fn remove_rule(&self, name: &str) -> TransportResult<()> {
        let mut rules = self.inner.rules.write().await;
        let index = rules
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| TransportError::RuleNotFound(name.to_string()))?;
        rules.remove(index);
        Ok(())
    }

    async fn complete(&self, lock_token: &str) -> TransportResult<()> {
        self.settle(lock_token).await?;
        self.inner.completed.write().await.push(lock_token.to_string());
        Ok(())
    }

    async fn abandon(&self, lock_token: &str) -> TransportResult<()> {
        self.settle(lock_token).await?;
        self.inner.abandoned.write().await.push(lock_token.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
