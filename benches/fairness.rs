//! Draw path benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use case_battle::catalog::{CaseEntry, CaseItem};
use case_battle::fairness::{client_seed_for, fair_rand, pick_item, ServerSeed};
use case_battle::Money;

fn wide_case(items: u32) -> CaseEntry {
    let span = 1_000_001 / items;
    let items = (0..items)
        .map(|i| CaseItem {
            id: i64::from(i),
            name: format!("item-{i}"),
            price: Money::from_cents(i64::from(i + 1) * 10),
            min_rand: i * span,
            max_rand: if i + 1 == items { 1_000_000 } else { (i + 1) * span - 1 },
            image: None,
        })
        .collect();
    CaseEntry { id: 1, name: "bench".into(), price: Money::from_units(1), image: None, items }
}

fn bench_fair_rand(c: &mut Criterion) {
    let seed = ServerSeed::from_seed("ab".repeat(32));
    let client = client_seed_for(42);
    let mut nonce = 0u64;
    c.bench_function("fair_rand", |b| {
        b.iter(|| {
            nonce += 1;
            fair_rand(black_box(&seed.seed), black_box(&client), nonce)
        })
    });
}

fn bench_pick_item(c: &mut Criterion) {
    let seed = ServerSeed::from_seed("cd".repeat(32));
    let client = client_seed_for(7);
    let case = wide_case(64);
    c.bench_function("pick_item_64", |b| {
        b.iter(|| pick_item(black_box(&case), &seed.seed, &client, black_box(1_001)).map(|d| d.item.id))
    });
}

criterion_group!(benches, bench_fair_rand, bench_pick_item);
criterion_main!(benches);
