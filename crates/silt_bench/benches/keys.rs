//! Structural key comparison and hashing benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use silt_core::Key;

fn composite_key(id: i64) -> Key {
    Key::Object(vec![
        ("tenant".to_string(), Key::Text("accounts-west".into())),
        ("id".to_string(), Key::Int(id)),
        (
            "tags".to_string(),
            Key::Array(vec![Key::Text("hot".into()), Key::Text("indexed".into())]),
        ),
    ])
}

/// Benchmark scalar key comparisons.
fn bench_scalar_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("scalar_compare");

    group.bench_function("int", |b| {
        let left = Key::Int(41);
        let right = Key::Int(42);
        b.iter(|| black_box(left.cmp_structural(black_box(&right))));
    });

    group.bench_function("text", |b| {
        let left = Key::from("users/000000041");
        let right = Key::from("users/000000042");
        b.iter(|| black_box(left.cmp_structural(black_box(&right))));
    });
    group.finish();
}

/// Benchmark nested object comparisons.
fn bench_object_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("object_compare");

    group.bench_function("full_vs_full", |b| {
        let left = composite_key(41);
        let right = composite_key(42);
        b.iter(|| black_box(left.cmp_structural(black_box(&right))));
    });

    group.bench_function("partial_vs_full", |b| {
        let partial = Key::Object(vec![(
            "tenant".to_string(),
            Key::Text("accounts-west".into()),
        )]);
        let full = composite_key(42);
        b.iter(|| black_box(partial.cmp_structural(black_box(&full))));
    });
    group.finish();
}

/// Benchmark structural hashing.
fn bench_structural_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("structural_hash");

    group.bench_function("composite", |b| {
        let key = composite_key(42);
        b.iter(|| black_box(black_box(&key).structural_hash()));
    });
    group.finish();
}

/// Benchmark building keys from JSON values.
fn bench_from_json(c: &mut Criterion) {
    let mut group = c.benchmark_group("from_json");

    group.bench_function("composite", |b| {
        let value = json!({
            "tenant": "accounts-west",
            "id": 42,
            "tags": ["hot", "indexed"],
        });
        b.iter(|| black_box(Key::from(black_box(value.clone()))));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_scalar_compare,
    bench_object_compare,
    bench_structural_hash,
    bench_from_json,
);

criterion_main!(benches);
