use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use cmms_auth::RequestContext;
use cmms_core::{TenantId, UserId};
use cmms_infra::{
    CatalogService, InMemoryAuditSink, InMemoryLedgerStore, LedgerStore, StockLedger,
};
use cmms_inventory::{IdempotencyKey, LocationId, NewLocation, NewPart, PartId, TransactionMetadata};

struct Bench {
    ledger: StockLedger,
    ctx: RequestContext,
    part: PartId,
    bins: Vec<LocationId>,
}

/// A tenant with `parts` registered parts; one of them stocked in two bins.
fn setup(parts: usize) -> Bench {
    let store: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
    let audit = Arc::new(InMemoryAuditSink::new());
    let ctx = RequestContext::system(TenantId::new()).with_user(UserId::new());
    let catalog = CatalogService::new(store.clone(), audit.clone());
    let ledger = StockLedger::new(store, audit);

    let mut ids = Vec::with_capacity(parts);
    for i in 0..parts.max(1) {
        let part = catalog
            .register_part(
                &ctx,
                NewPart {
                    name: format!("Part {i}"),
                    ..NewPart::default()
                },
            )
            .unwrap();
        ids.push(part.id);
    }
    let bins: Vec<LocationId> = ["A", "B"]
        .iter()
        .map(|code| {
            catalog
                .create_location(
                    &ctx,
                    NewLocation {
                        name: format!("Bin {code}"),
                        code: Some(code.to_string()),
                        ..NewLocation::default()
                    },
                )
                .unwrap()
                .id
        })
        .collect();

    let part = ids[0];
    ledger
        .receive(
            &ctx,
            part,
            bins[0],
            1_000_000,
            &IdempotencyKey::parse("bench-seed").unwrap(),
            TransactionMetadata::default(),
        )
        .unwrap();
    Bench {
        ledger,
        ctx,
        part,
        bins,
    }
}

fn bench_mutations(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_mutation");
    group.throughput(Throughput::Elements(1));

    for parts in [10usize, 100, 1_000] {
        let b = setup(parts);
        let mut n = 0u64;
        group.bench_with_input(BenchmarkId::new("issue", parts), &parts, |bench, _| {
            bench.iter(|| {
                n += 1;
                let key = IdempotencyKey::parse(format!("issue-{n}")).unwrap();
                black_box(
                    b.ledger
                        .issue(&b.ctx, b.part, b.bins[0], 1, &key, TransactionMetadata::default())
                        .unwrap(),
                )
            })
        });

        let b = setup(parts);
        let mut n = 0u64;
        group.bench_with_input(BenchmarkId::new("transfer", parts), &parts, |bench, _| {
            bench.iter(|| {
                n += 1;
                let key = IdempotencyKey::parse(format!("move-{n}")).unwrap();
                let (from, to) = if n % 2 == 0 {
                    (b.bins[1], b.bins[0])
                } else {
                    (b.bins[0], b.bins[1])
                };
                black_box(
                    b.ledger
                        .transfer(&b.ctx, b.part, from, to, 1, &key, TransactionMetadata::default())
                        .unwrap(),
                )
            })
        });
    }
    group.finish();
}

fn bench_replay(c: &mut Criterion) {
    let b = setup(100);
    let key = IdempotencyKey::parse("replayed").unwrap();
    b.ledger
        .issue(&b.ctx, b.part, b.bins[0], 1, &key, TransactionMetadata::default())
        .unwrap();

    c.bench_function("ledger_idempotent_replay", |bench| {
        bench.iter(|| {
            black_box(
                b.ledger
                    .issue(&b.ctx, b.part, b.bins[0], 1, &key, TransactionMetadata::default())
                    .unwrap(),
            )
        })
    });
}

criterion_group!(benches, bench_mutations, bench_replay);
criterion_main!(benches);
