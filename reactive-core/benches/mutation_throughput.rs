use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use indexmap::IndexMap;

use reactive_core::reactive::handle::HandleConfig;
use reactive_core::reactive::interceptor::{record, sequence};
use reactive_core::reactive::registry::registry;
use reactive_core::reactive::value::Value;

fn wrap_record(fields: usize) -> reactive_core::reactive::handle::ReactiveHandle {
    let mut map = IndexMap::new();
    for i in 0..fields {
        map.insert(format!("field_{i}"), Value::from(0i64));
    }
    registry()
        .wrap(Value::Record(map), HandleConfig::default())
        .handle()
        .expect("record is linkable")
}

fn wrap_sequence(len: usize) -> reactive_core::reactive::handle::ReactiveHandle {
    let items = (0..len).map(|i| Value::from(i as i64)).collect();
    registry()
        .wrap(Value::Sequence(items), HandleConfig::default())
        .handle()
        .expect("sequence is linkable")
}

fn bench_record_set(c: &mut Criterion) {
    let handle = wrap_record(8);
    c.bench_function("record_set/no_subscribers", |b| {
        let mut n = 0i64;
        b.iter(|| {
            n += 1;
            record::set(handle, "field_0", Value::from(black_box(n))).unwrap();
        });
    });
}

fn bench_record_set_with_subscribers(c: &mut Criterion) {
    let handle = wrap_record(8);
    for _ in 0..8 {
        registry().subscribe(handle, Arc::new(|_| {}));
    }
    c.bench_function("record_set/8_subscribers", |b| {
        let mut n = 0i64;
        b.iter(|| {
            n += 1;
            record::set(handle, "field_0", Value::from(black_box(n))).unwrap();
        });
    });
}

fn bench_sequence_push_pop(c: &mut Criterion) {
    let handle = wrap_sequence(0);
    c.bench_function("sequence/push_pop", |b| {
        b.iter(|| {
            sequence::push(handle, vec![Value::from(1i64)]).unwrap();
            sequence::pop(handle).unwrap();
        });
    });
}

fn bench_nested_relink(c: &mut Criterion) {
    let handle = wrap_sequence(64);
    c.bench_function("sequence/splice_relink", |b| {
        b.iter(|| {
            sequence::splice(handle, 0, 1, vec![Value::from(black_box(99i64))]).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_record_set,
    bench_record_set_with_subscribers,
    bench_sequence_push_pop,
    bench_nested_relink,
);
criterion_main!(benches);
