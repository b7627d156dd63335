//! Benchmark for inference log parsing
//!
//! Measures line parsing and milestone tracking over screen logs of
//! increasing length, the per-poll work of the log watcher.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use phylogeo_orchestration::watcher::{LogLineParser, ProgressTracker};

fn screen_log(rows: u64) -> Vec<String> {
    (0..rows)
        .map(|i| {
            format!(
                "{}\t-{:.2}\t-{:.2}\t{:.3} hours/million states",
                i * 1_000,
                5400.0 + (i % 17) as f64,
                5380.0 + (i % 11) as f64,
                0.5 + (i % 5) as f64 / 10.0
            )
        })
        .collect()
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_parse");
    let parser = LogLineParser::new("java.lang.RuntimeException");

    for rows in [1_000u64, 10_000] {
        let lines = screen_log(rows);
        group.throughput(Throughput::Elements(rows));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &lines, |b, lines| {
            b.iter(|| {
                let mut tracker = ProgressTracker::new(&[0.1, 0.5], rows * 1_000);
                let mut reports = 0;
                for line in lines {
                    for event in parser.parse(black_box(line)) {
                        if tracker.observe(&event).is_some() {
                            reports += 1;
                        }
                    }
                }
                reports
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse);
criterion_main!(benches);
