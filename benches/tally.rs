//! Tally store and seeding benchmarks
//!
//! Run with: cargo bench -p tally-bench

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tally_bench::{empty, runtime, seeded};
use tally_data::generate::{random_date, random_id};
use tally_data::{seed_with, InvoiceStatus, RandomSource, SeedVolumes};
use tally_idb::{Key, KeyRange};

fn generator_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate");
    let mut rng = StdRng::seed_from_u64(1);
    let now = RandomSource::seeded(1).now();

    group.bench_function("random_id", |b| b.iter(|| random_id(&mut rng)));
    group.bench_function("random_date", |b| b.iter(|| random_date(&mut rng, now)));

    group.finish();
}

fn seeding_benchmarks(c: &mut Criterion) {
    let rt = runtime().expect("runtime");
    let mut group = c.benchmark_group("seed");
    group.sample_size(10);

    for (customers, invoices) in [(10, 1_000), (100, 10_000)] {
        let volumes = SeedVolumes { customers, invoices };
        group.throughput(Throughput::Elements((customers + invoices) as u64));
        group.bench_with_input(
            BenchmarkId::new("in_memory", invoices),
            &volumes,
            |b, &volumes| {
                b.iter_batched(
                    || rt.block_on(empty(volumes)).expect("empty db"),
                    |db| rt.block_on(seed_with(&db, &mut RandomSource::seeded(7))),
                    BatchSize::PerIteration,
                )
            },
        );
    }

    group.finish();
}

fn query_benchmarks(c: &mut Criterion) {
    let rt = runtime().expect("runtime");
    let db = rt
        .block_on(seeded(SeedVolumes::default(), 3))
        .expect("seeded db");
    let customer = rt
        .block_on(db.customers())
        .expect("customers")
        .into_iter()
        .next()
        .expect("at least one customer");

    let mut group = c.benchmark_group("query");

    group.bench_function("invoice_by_reference", |b| {
        b.iter(|| rt.block_on(db.invoice_by_reference("I05000")))
    });

    group.bench_function("invoices_for_customer_by_date", |b| {
        b.iter(|| rt.block_on(db.invoices_for_customer_by_date(&customer.id)))
    });

    group.bench_function("count_by_status", |b| {
        b.iter(|| rt.block_on(db.count_by_status(InvoiceStatus::Paid)))
    });

    group.bench_function("count_customer_prefix", |b| {
        let range = KeyRange::prefix(vec![Key::from(customer.id.as_str())]);
        b.iter(|| {
            rt.block_on(db.count_from_index(
                tally_data::schema::INVOICES,
                tally_data::schema::INVOICES_BY_CUSTOMER_REFERENCE,
                Some(range.clone()),
            ))
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    generator_benchmarks,
    seeding_benchmarks,
    query_benchmarks,
);

criterion_main!(benches);
