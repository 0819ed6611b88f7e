use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};

use zk_ballot::core::{voter_leaf, PoseidonNodeHasher, Sha256NodeHasher};
use zk_ballot::proof::{verify_path, MembershipIndex};

fn leaves(n: usize) -> Vec<zk_ballot::FieldElement> {
    (0..n).map(|i| voter_leaf(&format!("VOTER-{i:08}"))).collect()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_build");
    for size in [16usize, 1_000, 10_000] {
        let input = leaves(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("sha256", size), &input, |b, input| {
            b.iter(|| MembershipIndex::build(black_box(input.clone()), Sha256NodeHasher))
        });
    }
    for size in [16usize, 1_000] {
        let input = leaves(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("poseidon", size), &input, |b, input| {
            b.iter(|| MembershipIndex::build(black_box(input.clone()), PoseidonNodeHasher))
        });
    }
    group.finish();
}

fn bench_paths(c: &mut Criterion) {
    let index = MembershipIndex::build(leaves(10_000), Sha256NodeHasher).expect("index builds");
    let root = index.root();
    let mut rng = StdRng::seed_from_u64(42);
    let leaf_index = rng.gen_range(0..index.leaf_count());
    let leaf = index.leaf(leaf_index).expect("leaf exists");
    let path = index.path(leaf_index).expect("path exists");

    c.bench_function("path_generation", |b| {
        b.iter(|| index.path(black_box(rng.gen_range(0..10_000))))
    });

    c.bench_function("verify_path", |b| {
        b.iter(|| verify_path(&Sha256NodeHasher, black_box(&leaf), black_box(&path), &root))
    });
}

criterion_group!(benches, bench_build, bench_paths);
criterion_main!(benches);
