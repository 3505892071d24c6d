//! Benchmarks for the sorted page cache
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use relcache::model::{row, Record, RecordKey, SortSpec};
use relcache::pager::PageMap;
use relcache::remote::QueryPage;
use std::collections::{HashMap, HashSet};

const RPP: usize = 50;

/// Fully cached map over even ids `0, 2, 4, ...`
fn cached_map(pages: usize) -> (PageMap, HashMap<RecordKey, Record>) {
    let total = pages * RPP;
    let mut records = HashMap::new();
    let mut map = PageMap::new(RPP);
    for page in 0..pages {
        let pks: Vec<RecordKey> = (page * RPP..(page + 1) * RPP)
            .map(|slot| RecordKey::from((slot * 2) as i64))
            .collect();
        for key in &pks {
            records.insert(key.clone(), Record::from_row(row([("id", key.head().clone())])));
        }
        map.store_page(page, QueryPage { pks, total_count: total });
    }
    (map, records)
}

fn bench_insert_placement(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_placement");
    let comparator = SortSpec::default().comparator(&["id".to_string()]);

    for pages in [10, 100, 1000] {
        let (map, mut records) = cached_map(pages);
        // Odd ids land between cached neighbors; the first page cascades furthest
        let inserts: Vec<RecordKey> = (0..10).map(|i| RecordKey::from(i * 2 + 1)).collect();
        for key in &inserts {
            records.insert(key.clone(), Record::from_row(row([("id", key.head().clone())])));
        }
        let lookup = |k: &RecordKey| records.get(k);

        group.throughput(Throughput::Elements(inserts.len() as u64));
        group.bench_function(format!("place_10_into_{}_pages", pages), |b| {
            b.iter_batched(
                || map.clone(),
                |mut map| {
                    for key in &inserts {
                        map.add_pending(key.clone());
                    }
                    black_box(map.place_pendings(&lookup, &comparator))
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_delete_compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("delete_compaction");

    for pages in [10, 100, 1000] {
        let (map, _) = cached_map(pages);
        let deletes: HashSet<RecordKey> = (0..10).map(|i| RecordKey::from(i * 2)).collect();

        group.throughput(Throughput::Elements(deletes.len() as u64));
        group.bench_function(format!("remove_10_from_{}_pages", pages), |b| {
            b.iter_batched(
                || map.clone(),
                |mut map| black_box(map.remove_keys(&deletes)),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert_placement, bench_delete_compaction);
criterion_main!(benches);
