use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::seq::SliceRandom;
use resim_core::{PersistentMap, RngHandle};

fn shuffled_keys(n: u32) -> Vec<u32> {
    let mut keys: Vec<u32> = (0..n).collect();
    let mut rng = RngHandle::from_seed(17);
    keys.shuffle(&mut rng);
    keys
}

fn bench_insert(c: &mut Criterion) {
    let keys = shuffled_keys(4096);
    c.bench_function("wttree_insert_4096", |b| {
        b.iter(|| {
            let mut map = PersistentMap::new();
            for key in &keys {
                map = map.insert(*key, *key);
            }
            black_box(map.len())
        })
    });
}

fn bench_lookup(c: &mut Criterion) {
    let keys = shuffled_keys(4096);
    let map: PersistentMap<u32, u32> = keys.iter().map(|k| (*k, *k)).collect();
    c.bench_function("wttree_lookup_4096", |b| {
        b.iter(|| {
            let mut hits = 0usize;
            for key in &keys {
                if map.lookup(key).is_some() {
                    hits += 1;
                }
            }
            black_box(hits)
        })
    });
}

criterion_group!(benches, bench_insert, bench_lookup);
criterion_main!(benches);
