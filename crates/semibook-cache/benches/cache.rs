//! Benchmarks for offer cache operations
//!
//! Run with: cargo bench --bench cache

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use semibook_cache::{OfferBook, OfferCache};
use semibook_types::{BookSide, Market, OfferEntry, RawLog};
use serde_json::json;

/// Create N entries with increasing ask prices
fn create_entries(count: u32) -> Vec<OfferEntry> {
    (1..=count)
        .map(|id| OfferEntry::new(id, dec!(100), Decimal::from(100 + id)).unwrap())
        .collect()
}

fn bench_cache_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_write");

    for size in [10u32, 50, 200] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut cache = OfferCache::new(BookSide::Asks);
                let mut prev = None;
                for entry in create_entries(size) {
                    let id = entry.id;
                    cache.write(black_box(entry), prev);
                    prev = Some(id);
                }
                black_box(cache)
            })
        });
    }

    group.finish();
}

fn bench_cache_queries(c: &mut Criterion) {
    let cache = OfferCache::from_entries(BookSide::Asks, create_entries(200));
    let mut group = c.benchmark_group("cache_queries");

    group.bench_function("iter_all", |b| {
        b.iter(|| black_box(cache.iter().count()))
    });

    group.bench_function("pivot_id", |b| {
        b.iter(|| black_box(cache.pivot_id(black_box(dec!(2.5)))))
    });

    group.finish();
}

fn bench_apply_logs(c: &mut Criterion) {
    let market = Market::new("0xbase", "0xquote");
    let logs: Vec<RawLog> = (0..100u32)
        .map(|i| {
            RawLog::new(
                "0xmgv",
                11 + u64::from(i / 10),
                "OfferWrite",
                json!({
                    "outbound_tkn": "0xbase", "inbound_tkn": "0xquote",
                    "id": 1 + i % 50, "prev": 0,
                    "gives": "100", "wants": "150",
                    "gasprice": 1, "gasreq": 100_000, "maker": "0xmaker"
                }),
            )
        })
        .collect();

    c.bench_function("apply_100_writes", |b| {
        b.iter(|| {
            let mut book = OfferBook::new(market.offer_list(BookSide::Asks), BookSide::Asks, 50);
            book.load_snapshot(10, create_entries(50), 0);
            for log in &logs {
                let _ = black_box(book.apply_log(log));
            }
            black_box(book.size())
        })
    });
}

criterion_group!(benches, bench_cache_write, bench_cache_queries, bench_apply_logs);
criterion_main!(benches);
