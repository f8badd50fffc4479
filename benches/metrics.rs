//! Performance benchmarks for a3s-realtime
//!
//! Run with: cargo bench

use a3s_realtime::{
    backoff_delay, callback, ChangeKind, EventFilter, MemoryTransport, MetricsRecorder,
    PerformanceSample, RealtimeEvent, RealtimeManager, RowFilter,
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::time::Duration;

fn order_event() -> RealtimeEvent {
    RealtimeEvent::table_change(
        "orders",
        ChangeKind::Update,
        "public",
        "orders",
        serde_json::json!({ "new": { "id": 42, "status": "paid", "total": 199.0 } }),
    )
}

fn bench_metrics(c: &mut Criterion) {
    c.bench_function("MetricsRecorder record", |b| {
        let mut recorder = MetricsRecorder::new(100);
        b.iter(|| {
            recorder.record(
                black_box("orders"),
                PerformanceSample::Latency(Duration::from_micros(250)),
            )
        });
    });

    let mut recorder = MetricsRecorder::new(100);
    for channel in ["orders", "products", "customers", "presence"] {
        for i in 0..100 {
            recorder.record(channel, PerformanceSample::Latency(Duration::from_micros(i)));
        }
    }
    c.bench_function("MetricsRecorder report (4 channels)", |b| {
        b.iter(|| recorder.report());
    });
}

fn bench_filters(c: &mut Criterion) {
    let event = order_event();
    let plain = EventFilter::table("public", "orders");
    let filtered = EventFilter::table("public", "orders")
        .with_row_filter(RowFilter::parse("status=in.(paid,shipped)").unwrap());

    c.bench_function("EventFilter match", |b| {
        b.iter(|| plain.matches(black_box(&event)));
    });
    c.bench_function("EventFilter match with row filter", |b| {
        b.iter(|| filtered.matches(black_box(&event)));
    });
    c.bench_function("backoff_delay", |b| {
        b.iter(|| {
            backoff_delay(
                black_box(7),
                Duration::from_millis(1_000),
                Duration::from_millis(30_000),
            )
        });
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let transport = MemoryTransport::new();
    let manager = rt.block_on(async {
        let manager = RealtimeManager::new(transport.clone()).unwrap();
        for _ in 0..10 {
            manager
                .subscribe("orders", EventFilter::table("public", "orders"), callback(|_| Ok(())))
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager
    });

    c.bench_function("deliver to 10 subscriptions", |b| {
        b.iter(|| transport.deliver(order_event()));
    });

    rt.block_on(async { manager.cleanup() });
}

criterion_group!(benches, bench_metrics, bench_filters, bench_dispatch);
criterion_main!(benches);
