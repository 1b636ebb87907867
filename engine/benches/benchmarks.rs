//! Performance benchmarks for bookhold-engine

use bookhold_engine::{Book, Coordinator, CoordinatorConfig, MemoryStore, UpdateRequest};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn catalog(n: usize) -> MemoryStore {
    MemoryStore::new().with_books(
        (0..n).map(|i| Book::new(format!("book-{i}"), format!("Title {i}"), "Anon")),
    )
}

fn open(rt: &Runtime, store: &MemoryStore) -> Coordinator {
    rt.block_on(Coordinator::open(
        Arc::new(store.clone()),
        CoordinatorConfig::default(),
    ))
    .unwrap()
}

fn bench_reservation_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("reservation_cycle");
    let rt = runtime();
    let coordinator = &open(&rt, &catalog(1));

    group.bench_function("make_remove", |b| {
        b.to_async(&rt).iter(|| async move {
            coordinator
                .make_reservation(black_box("book-0"), "42")
                .await
                .unwrap();
            coordinator
                .remove_reservation(black_box("book-0"), "42")
                .await
                .unwrap();
        })
    });

    rt.block_on(coordinator.make_reservation("book-0", "42"))
        .unwrap();
    group.bench_function("refresh_by_book", |b| {
        b.to_async(&rt).iter(|| async move {
            coordinator
                .update_reservation(UpdateRequest::ByBook {
                    book_id: "book-0".into(),
                    user_id: "42".into(),
                })
                .await
                .unwrap()
        })
    });

    group.finish();
}

fn bench_contended_claim(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_claim");
    let rt = runtime();

    for clients in [2usize, 16, 64].iter() {
        group.bench_with_input(
            BenchmarkId::new("same_book", clients),
            clients,
            |b, &clients| {
                let coordinator = open(&rt, &catalog(1));
                b.to_async(&rt).iter(|| {
                    let coordinator = coordinator.clone();
                    async move {
                        let attempts = (0..clients).map(|user| {
                            let c = coordinator.clone();
                            tokio::spawn(async move {
                                c.make_reservation("book-0", &user.to_string()).await
                            })
                        });
                        let mut winner = None;
                        for handle in attempts.collect::<Vec<_>>() {
                            if let Ok(r) = handle.await.unwrap() {
                                winner = Some(r);
                            }
                        }
                        let r = winner.unwrap();
                        coordinator
                            .remove_reservation("book-0", &r.user_id.to_string())
                            .await
                            .unwrap();
                    }
                })
            },
        );
    }

    group.finish();
}

fn bench_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("reads");
    let rt = runtime();

    for size in [100usize, 1000].iter() {
        let coordinator = &open(&rt, &catalog(*size));
        rt.block_on(async {
            for i in (0..*size).step_by(2) {
                coordinator
                    .make_reservation(&format!("book-{i}"), &(i % 10).to_string())
                    .await
                    .unwrap();
            }
        });

        group.bench_with_input(BenchmarkId::new("available_books", size), size, |b, _| {
            b.to_async(&rt)
                .iter(|| async move { coordinator.available_books().await.unwrap() })
        });
        group.bench_with_input(
            BenchmarkId::new("reservations_for_user", size),
            size,
            |b, _| {
                b.to_async(&rt)
                    .iter(|| async move { coordinator.reservations_for_user("3").await.unwrap() })
            },
        );
        group.bench_with_input(BenchmarkId::new("audit", size), size, |b, _| {
            b.to_async(&rt)
                .iter(|| async move { coordinator.audit().await.unwrap() })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_reservation_cycle,
    bench_contended_claim,
    bench_reads,
);
criterion_main!(benches);
