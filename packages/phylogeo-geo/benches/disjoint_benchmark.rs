//! Benchmark for disjoint-location resolution
//!
//! Measures resolution time as the number of records grows, with every
//! record overlapping a handful of enclosing regions.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use phylogeo_geo::{DisjointPolicy, GeoLocation, GeonameDisjointer, LocatedRecord};

/// Records spread over `regions` ADM1 regions, a third of them tagged at ADM2
fn generate_records(count: usize, regions: u64) -> Vec<LocatedRecord> {
    (0..count)
        .map(|i| {
            let region = 100 + (i as u64 % regions);
            if i % 3 == 0 {
                LocatedRecord::new(
                    format!("rec-{}", i),
                    Some(GeoLocation::new(10_000 + i as u64, format!("District {}", i), "ADM2")),
                    Some([1, 10, region].into_iter().collect()),
                )
            } else {
                LocatedRecord::new(
                    format!("rec-{}", i),
                    Some(GeoLocation::new(region, format!("Region {}", region), "ADM1")),
                    Some([1, 10].into_iter().collect()),
                )
            }
        })
        .collect()
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("disjoint_resolve");
    let disjointer = GeonameDisjointer::new(DisjointPolicy {
        max_states: 1000,
        ..Default::default()
    });

    for count in [100usize, 1_000, 5_000] {
        let records = generate_records(count, 20);
        group.bench_with_input(BenchmarkId::from_parameter(count), &records, |b, records| {
            b.iter(|| disjointer.resolve(black_box(records)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_resolve);
criterion_main!(benches);
