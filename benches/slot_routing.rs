use criterion::{black_box, criterion_group, criterion_main, Criterion};
use redis_cluster_router::{key_slot, pick_node, ReplicaSet, Server};

fn replica_set_of(n: usize) -> ReplicaSet {
    let master = Server::new("10.0.0.1", 7000, false);
    let replicas = (1..n)
        .map(|i| Server::new(format!("10.0.0.{}", i + 1), 7000 + i as u16, true))
        .collect();
    ReplicaSet::new(master, replicas)
}

fn bench_key_slot(c: &mut Criterion) {
    let keys = [
        "user:1000",
        "{user:1000}:profile",
        "{user:1000}:sessions",
        "a-plain-key-with-no-hashtag-at-all",
    ];
    c.bench_function("key_slot/plain_key", |b| {
        b.iter(|| black_box(key_slot(black_box(keys[0]))))
    });
    c.bench_function("key_slot/hashtag_key", |b| {
        b.iter(|| black_box(key_slot(black_box(keys[1]))))
    });
}

fn bench_pick_node(c: &mut Criterion) {
    let single_master = replica_set_of(1);
    let with_replicas = replica_set_of(4);

    c.bench_function("pick_node/master_only", |b| {
        b.iter(|| black_box(pick_node(black_box(&single_master), false, None).unwrap()))
    });
    c.bench_function("pick_node/seeded_read_replica", |b| {
        b.iter(|| black_box(pick_node(black_box(&with_replicas), true, Some(42)).unwrap()))
    });
    c.bench_function("pick_node/unseeded_read_replica", |b| {
        b.iter(|| black_box(pick_node(black_box(&with_replicas), true, None).unwrap()))
    });
}

criterion_group!(benches, bench_key_slot, bench_pick_node);
criterion_main!(benches);
