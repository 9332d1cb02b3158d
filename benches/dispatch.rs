//! Performance benchmarks for a3s-bus
//!
//! Run with: cargo bench

use a3s_bus::{
    EventBus, EventMetadata, EventNameResolver, HandlerContainer, IntegrationEvent,
    IntegrationEventHandler, MemoryTransport, SubscriptionRegistry,
};
use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, Criterion};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Serialize, Deserialize)]
struct RateChangedIntegrationEvent {
    #[serde(flatten)]
    meta: EventMetadata,
    pair: String,
    rate: f64,
}

impl IntegrationEvent for RateChangedIntegrationEvent {
    fn metadata(&self) -> &EventMetadata {
        &self.meta
    }
}

struct Noop;

#[async_trait]
impl IntegrationEventHandler<RateChangedIntegrationEvent> for Noop {
    async fn handle(&self, _event: RateChangedIntegrationEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

struct Ledger;

#[async_trait]
impl IntegrationEventHandler<RateChangedIntegrationEvent> for Ledger {
    async fn handle(&self, event: RateChangedIntegrationEvent) -> anyhow::Result<()> {
        criterion::black_box(event.rate);
        Ok(())
    }
}

fn rate_event() -> RateChangedIntegrationEvent {
    RateChangedIntegrationEvent {
        meta: EventMetadata::new(),
        pair: "USD/CNY".to_string(),
        rate: 7.3521,
    }
}

fn bench_naming(c: &mut Criterion) {
    let resolver = EventNameResolver::default();

    c.bench_function("EventNameResolver::resolve_type_name", |b| {
        b.iter(|| resolver.resolve_type_name("RateChangedIntegrationEvent").unwrap());
    });
}

fn bench_registry_lookup(c: &mut Criterion) {
    let registry = SubscriptionRegistry::default();
    registry
        .add_subscription::<RateChangedIntegrationEvent, Noop>()
        .unwrap();
    registry
        .add_subscription::<RateChangedIntegrationEvent, Ledger>()
        .unwrap();

    c.bench_function("registry get_handlers_for_event", |b| {
        b.iter(|| registry.get_handlers_for_event("RateChanged").unwrap());
    });
}

fn bench_process_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let container = HandlerContainer::new();
    container.register_instance(Arc::new(Noop)).unwrap();
    container.register_instance(Arc::new(Ledger)).unwrap();

    let bus = rt.block_on(async {
        let bus = EventBus::new(MemoryTransport::default(), container);
        bus.subscribe::<RateChangedIntegrationEvent, Noop>()
            .await
            .unwrap();
        bus.subscribe::<RateChangedIntegrationEvent, Ledger>()
            .await
            .unwrap();
        bus
    });
    let body = serde_json::to_vec(&rate_event()).unwrap();

    c.bench_function("process_event (2 handlers)", |b| {
        b.to_async(&rt)
            .iter(|| async { bus.process_event("RateChanged", &body).await.unwrap() });
    });
}

fn bench_publish_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("publish_throughput");
    for count in [10, 100, 1000] {
        group.bench_function(format!("{} events", count), |b| {
            b.to_async(&rt).iter(|| async {
                let transport = MemoryTransport::new(10, false);
                let bus = EventBus::new(transport, HandlerContainer::new());
                for _ in 0..count {
                    bus.publish(&rate_event()).await.unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_naming,
    bench_registry_lookup,
    bench_process_event,
    bench_publish_throughput,
);
criterion_main!(benches);
