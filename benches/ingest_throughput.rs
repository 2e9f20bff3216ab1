//! Batch ingestion and aggregate read benchmark
//!
//! Measures:
//!
//! 1. `ingest` of a batch over already-materialized keys (the steady state)
//! 2. `ingest` of a batch that creates every key (first sight)
//! 3. An aggregate read over a method with many threads
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench ingest_throughput
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use powergraph::graph::Graph;
use powergraph::query::measurement_report;
use powergraph::reporter::GraphReporter;
use powergraph::sample::RawSample;
use powergraph::store::MemoryStore;
use std::sync::Arc;

fn batch(methods: usize, threads: usize, timestamp: i64) -> Vec<RawSample> {
    let mut samples = Vec::with_capacity(methods * threads + 1);
    for m in 0..methods {
        for t in 0..threads {
            samples.push(RawSample::cpu(
                &format!("bench.Class.method{}", m),
                &t.to_string(),
                &(t % 4).to_string(),
                timestamp,
                1.0 + t as f64,
            ));
        }
    }
    samples.push(RawSample::disk("bench.Class.method0", "0", timestamp, 3.0));
    samples
}

fn reporter(workers: usize) -> GraphReporter {
    let store = MemoryStore::with_workers(workers).expect("store workers");
    let reporter = GraphReporter::new(Graph::new(Arc::new(store)), "bench");
    reporter.connect().expect("connect");
    reporter
}

fn bench_steady_state(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest_existing_keys");
    for workers in [0usize, 2] {
        let reporter = reporter(workers);
        reporter.ingest(&batch(8, 8, 0)).expect("warm up");
        let mut ts = 1;
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, _| {
            b.iter(|| {
                ts += 1;
                black_box(reporter.ingest(&batch(8, 8, ts)).expect("ingest"))
            })
        });
    }
    group.finish();
}

fn bench_first_sight(c: &mut Criterion) {
    c.bench_function("ingest_new_keys", |b| {
        b.iter_with_setup(
            || reporter(0),
            |reporter| black_box(reporter.ingest(&batch(8, 8, 0)).expect("ingest")),
        )
    });
}

fn bench_aggregate_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("report_read");
    for threads in [4usize, 32] {
        let reporter = reporter(0);
        reporter.ingest(&batch(1, threads, 0)).expect("ingest");
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, _| {
            b.iter(|| black_box(measurement_report(reporter.graph(), 0, "bench", 0).expect("report")))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_steady_state, bench_first_sight, bench_aggregate_read);
criterion_main!(benches);
