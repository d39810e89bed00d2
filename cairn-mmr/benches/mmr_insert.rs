#[macro_use]
extern crate criterion;

use cairn_mmr::{MemKvStore, Mmr};
use cairn_primitives::{Hash256, hash_u32_le};
use criterion::{BenchmarkId, Criterion};
use rand::{seq::SliceRandom, thread_rng};

fn leaves(count: u32) -> Vec<(u64, Hash256)> {
    (0..count).map(|i| (i as u64, hash_u32_le(i))).collect()
}

fn prepare_mmr(count: u32) -> Mmr<MemKvStore> {
    let mut mmr = Mmr::open(MemKvStore::new()).expect("open");
    mmr.insert(leaves(count)).expect("insert");
    mmr
}

fn bench(c: &mut Criterion) {
    {
        let mut group = c.benchmark_group("MMR insertion");
        for input in [1_000u32, 10_000, 100_000] {
            group.bench_with_input(BenchmarkId::new("leaves", input), &input, |b, &size| {
                b.iter(|| prepare_mmr(size));
            });
        }
    }

    c.bench_function("MMR remove/re-insert batch", |b| {
        let mut mmr = prepare_mmr(100_000);
        let mut rng = thread_rng();
        let mut indices: Vec<u64> = (0..100_000u64).collect();
        indices.shuffle(&mut rng);
        let batch: Vec<u64> = indices[..1_000].to_vec();
        let replay: Vec<(u64, Hash256)> = batch
            .iter()
            .map(|i| (*i, hash_u32_le(*i as u32)))
            .collect();
        b.iter(|| {
            mmr.remove(batch.clone()).expect("remove");
            mmr.insert(replay.clone()).expect("insert");
        });
    });

    c.bench_function("MMR root hash", |b| {
        let mmr = prepare_mmr(100_000);
        b.iter(|| mmr.root_hash());
    });
}

criterion_group!(benches, bench);
criterion_main!(benches);
