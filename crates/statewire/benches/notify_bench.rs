//! Benchmarks for notification fan-out and subscription churn.
//!
//! Run with: cargo bench -p statewire --bench notify_bench

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use statewire::{ObservableValue, SharedObservableValue};
use std::cell::Cell;
use std::hint::black_box;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Update fan-out
// =============================================================================

fn bench_update_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("observable/update");

    for subscribers in [1usize, 16, 256] {
        group.throughput(Throughput::Elements(subscribers as u64));

        let value = ObservableValue::new(0u64);
        let sum = Rc::new(Cell::new(0u64));
        let tokens: Vec<_> = (0..subscribers)
            .map(|_| {
                let sum = Rc::clone(&sum);
                value.subscribe_changes(move |v| sum.set(sum.get().wrapping_add(*v)))
            })
            .collect();

        group.bench_with_input(
            BenchmarkId::new("local", subscribers),
            &value,
            |b, value| {
                let mut n = 0u64;
                b.iter(|| {
                    n += 1;
                    value.update(black_box(n));
                });
            },
        );
        black_box(sum.get());
        drop(tokens);
    }

    for subscribers in [1usize, 16, 256] {
        group.throughput(Throughput::Elements(subscribers as u64));

        let value = SharedObservableValue::new(0u64);
        let sum = Arc::new(AtomicU64::new(0));
        let tokens: Vec<_> = (0..subscribers)
            .map(|_| {
                let sum = Arc::clone(&sum);
                value.subscribe_changes(move |v| {
                    sum.fetch_add(*v, Ordering::Relaxed);
                })
            })
            .collect();

        group.bench_with_input(
            BenchmarkId::new("shared", subscribers),
            &value,
            |b, value| {
                let mut n = 0u64;
                b.iter(|| {
                    n += 1;
                    value.update(black_box(n));
                });
            },
        );
        black_box(sum.load(Ordering::Relaxed));
        drop(tokens);
    }

    group.finish();
}

// =============================================================================
// Subscribe / cancel churn
// =============================================================================

fn bench_subscribe_cancel(c: &mut Criterion) {
    let mut group = c.benchmark_group("observable/churn");

    for existing in [0usize, 64, 1024] {
        let value = ObservableValue::new(0u64);
        let _resident: Vec<_> = (0..existing).map(|_| value.subscribe(|_| {})).collect();

        group.bench_with_input(
            BenchmarkId::new("subscribe_cancel", existing),
            &value,
            |b, value| {
                b.iter(|| {
                    let token = value.subscribe(|v| {
                        black_box(v);
                    });
                    token.cancel();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_update_fanout, bench_subscribe_cancel);
criterion_main!(benches);
