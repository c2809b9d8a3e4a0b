use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use crdt_doc::list::RgaTreeList;
use crdt_doc::time_ticket::TimeTicket;

fn actor(n: u8) -> crdt_doc::ActorID {
    let mut bytes = [0u8; 12];
    bytes[11] = n;
    crdt_doc::ActorID::from_bytes(bytes)
}

fn build_list(n: u64) -> RgaTreeList<u64> {
    let mut list = RgaTreeList::new();
    let a = actor(1);
    let mut prev = TimeTicket::INITIAL;
    for i in 0..n {
        let t = TimeTicket::new(i + 1, 0, a);
        prev = list.insert_after(prev, t, i);
    }
    list
}

fn insert_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_insert");
    for size in [100u64, 1_000, 10_000] {
        group.bench_function(BenchmarkId::new("insert_after", size), |b| {
            b.iter(|| {
                let list = build_list(size);
                black_box(list.len());
            })
        });
    }
    group.finish();
}

fn index_of_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_index_of");
    for size in [100u64, 1_000, 10_000] {
        let mut list = build_list(size);
        let a = actor(1);
        let mid = TimeTicket::new(size / 2, 0, a);
        group.bench_function(BenchmarkId::new("index_of", size), |b| {
            b.iter(|| black_box(list.index_of(mid)))
        });
    }
    group.finish();
}

fn remove_and_purge_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_remove_purge");
    for size in [100u64, 1_000, 10_000] {
        group.bench_function(BenchmarkId::new("remove_then_purge", size), |b| {
            b.iter(|| {
                let mut list = build_list(size);
                let a = actor(1);
                let exec = TimeTicket::new(size + 1, 0, a);
                for i in 0..size {
                    let t = TimeTicket::new(i + 1, 0, a);
                    list.remove(t, exec);
                }
                for i in 0..size {
                    let t = TimeTicket::new(i + 1, 0, a);
                    list.purge(t);
                }
                black_box(list.len());
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    insert_benchmarks,
    index_of_benchmarks,
    remove_and_purge_benchmarks
);
criterion_main!(benches);
