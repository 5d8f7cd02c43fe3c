//! Aggregation throughput benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use trim_telemetry::aggregate::{DatabaseReducer, DurationHistory};
use trim_telemetry::capture::QueryEvent;

const STATEMENTS: [&str; 4] = [
    "SELECT * FROM users WHERE id = %s",
    "INSERT INTO audit_log (user_id, action) VALUES (%s, %s)",
    "UPDATE sessions SET last_seen = %s WHERE key = %s",
    "SELECT COUNT(*) FROM orders WHERE status = 'open'",
];

fn scope_events(count: usize) -> Vec<QueryEvent> {
    (0..count)
        .map(|i| QueryEvent {
            sql_text: STATEMENTS[i % STATEMENTS.len()].to_string(),
            duration_seconds: (i % 17) as f64 * 0.0005,
        })
        .collect()
}

fn bench_reduce(c: &mut Criterion) {
    let mut group = c.benchmark_group("database_reduce");
    let reducer = DatabaseReducer::default();

    for (name, count) in [("small", 10), ("medium", 200), ("large", 5000)] {
        let events = scope_events(count);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("queries", name), &events, |b, events| {
            b.iter(|| reducer.reduce(black_box(events)))
        });
    }

    group.finish();
}

fn bench_percentiles(c: &mut Criterion) {
    let mut group = c.benchmark_group("duration_percentiles");

    for (name, count) in [("small", 100), ("medium", 2000), ("large", 20000)] {
        let history: DurationHistory = (0..count).map(|i| ((i * 37) % 1009) as f64).collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("tests", name), &history, |b, history| {
            b.iter(|| black_box(history).snapshot())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reduce, bench_percentiles);
criterion_main!(benches);
