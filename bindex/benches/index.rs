use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use tempfile::tempdir;

use bindex::{BTree, SECTOR_SIZE};

fn key(i: u32) -> Vec<u8> {
    let mut key = vec![0u8; 32];
    key[..8].copy_from_slice(&format!("{:08}", i).into_bytes());
    key
}

fn bench_find(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("find.idx");
    let mut tree = BTree::create(&path, 8 << 20, 32).unwrap();

    let record = vec![0x5au8; SECTOR_SIZE];
    for i in 0..2000 {
        tree.insert(&key(i), &record).unwrap();
    }

    let mut i = 0;
    c.bench_function("find/2000-keys", |b| {
        b.iter(|| {
            let lba = tree.find(black_box(&key(i % 2000))).unwrap();
            i += 1;
            black_box(lba)
        })
    });
}

fn bench_insert(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let record = vec![0xa5u8; SECTOR_SIZE];

    let mut run = 0;
    c.bench_function("insert/100-keys", |b| {
        b.iter_batched(
            || {
                run += 1;
                let path = dir.path().join(format!("insert-{}.idx", run));
                BTree::create(&path, 1 << 20, 32).unwrap()
            },
            |mut tree| {
                for i in 0..100 {
                    black_box(tree.insert(&key(i), &record).unwrap());
                }
            },
            BatchSize::PerIteration,
        )
    });
}

criterion_group!(benches, bench_find, bench_insert);
criterion_main!(benches);
