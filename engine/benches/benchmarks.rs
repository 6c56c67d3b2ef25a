//! Performance benchmarks for tandem-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use tandem_engine::{
    resolver::pick_winner,
    store::{Edit, LocalStore},
    Document, MemoryStore, Payload, Revision, StoreSnapshot,
};
use tokio::runtime::Runtime;

fn payload(i: usize) -> Payload {
    json!({"name": format!("Employee {i}"), "title": "Engineer", "grade": i % 7})
        .as_object()
        .cloned()
        .unwrap_or_default()
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn populated(count: usize) -> MemoryStore {
    let store = MemoryStore::new("employees");
    for i in 0..count {
        store
            .put(Edit::create(format!("emp-{i}"), "employee", payload(i)))
            .await
            .unwrap();
    }
    store
}

fn bench_store_operations(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("store_operations");

    group.bench_function("put_create", |b| {
        let store = MemoryStore::new("employees");
        let mut id = 0usize;
        b.to_async(&rt).iter(|| {
            id += 1;
            let edit = Edit::create(format!("emp-{id}"), "employee", payload(id));
            let store = &store;
            async move { store.put(black_box(edit)).await }
        })
    });

    group.bench_function("get", |b| {
        let store = rt.block_on(populated(1000));
        b.to_async(&rt)
            .iter(|| async { store.get(black_box("emp-500")).await })
    });

    for size in [100, 1000] {
        let store = rt.block_on(populated(size));
        group.bench_with_input(BenchmarkId::new("changes_page", size), &size, |b, _| {
            b.to_async(&rt)
                .iter(|| async { store.changes(black_box(0), 25).await })
        });
    }

    group.finish();
}

fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");

    for leaves in [2usize, 8, 32] {
        let docs: Vec<Document> = (0..leaves)
            .map(|i| {
                let mut doc = Document::new("emp-1", "employee", payload(i), 1_000);
                doc.rev = Revision::new(3, format!("{i:04x}"));
                doc.updated_at = Some(1_000 + (i as u64 * 37) % 11);
                doc
            })
            .collect();
        group.bench_with_input(BenchmarkId::new("pick_winner", leaves), &docs, |b, docs| {
            b.iter(|| pick_winner(black_box(docs)))
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("snapshot");

    for size in [100, 1000] {
        let store = rt.block_on(populated(size));
        let snapshot = rt.block_on(store.export_state());
        let json = snapshot.to_json().unwrap();

        group.bench_with_input(BenchmarkId::new("export", size), &size, |b, _| {
            b.to_async(&rt).iter(|| store.export_state())
        });
        group.bench_with_input(BenchmarkId::new("to_json", size), &snapshot, |b, s| {
            b.iter(|| s.to_json())
        });
        group.bench_with_input(BenchmarkId::new("from_json", size), &json, |b, j| {
            b.iter(|| StoreSnapshot::from_json(black_box(j)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_store_operations,
    bench_resolution,
    bench_snapshot
);
criterion_main!(benches);
