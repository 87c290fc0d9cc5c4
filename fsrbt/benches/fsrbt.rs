use fsrbt::codec;
use fsrbt::rbtree::{KeyKind, RbTree};
use fsrbt::record::FileRecord;
use fsrbt::search::{Query, SearchOptions, Searcher, SizeFilter};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{thread_rng, Rng};

// Utility function for creating records to use with benches
fn create_records(len: usize) -> Vec<FileRecord> {
    let mut rng = thread_rng();
    (0..len)
        .map(|i| {
            FileRecord::new(
                format!("/bench/{}/{}/file_{i}.dat", i % 31, i % 7),
                rng.gen_range(0..1_000_000),
                "T_BIN",
            )
            .expect("valid record")
        })
        .collect()
}

fn create_tree(key: KeyKind, len: usize) -> RbTree {
    let mut tree = RbTree::with_capacity(key, len);
    tree.extend(create_records(len));
    tree
}

fn fsrbt_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    for size in [1_024, 8_192, 65_536].iter() {
        let records = create_records(*size);
        for key in [KeyKind::Name, KeyKind::Size, KeyKind::Path] {
            group.bench_with_input(
                BenchmarkId::new(format!("fsrbt insert by {key}"), size),
                &records,
                |b, records| {
                    b.iter(|| {
                        let mut tree = RbTree::with_capacity(key, records.len());
                        tree.extend(records.iter().cloned());
                        tree
                    })
                },
            );
        }
    }
    group.finish();
}

fn fsrbt_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize");
    for size in [1_024, 8_192, 65_536].iter() {
        let tree = create_tree(KeyKind::Path, *size);
        let blob = codec::to_bytes(&tree).expect("serializes");
        group.bench_with_input(BenchmarkId::new("fsrbt encode", size), &tree, |b, tree| {
            b.iter(|| codec::to_bytes(tree).expect("serializes"))
        });
        group.bench_with_input(BenchmarkId::new("fsrbt decode", size), &blob, |b, blob| {
            b.iter(|| codec::deserialize(blob).expect("deserializes"))
        });
    }
    group.finish();
}

fn fsrbt_search(c: &mut Criterion) {
    let tree = create_tree(KeyKind::Name, 65_536);
    let query = Query::new().with_size(SizeFilter::Between(1_000, 50_000));

    let mut group = c.benchmark_group("search");
    for threads in [0, 1, 4, 16].iter() {
        let searcher = Searcher::new(SearchOptions {
            max_threads: *threads,
        });
        group.bench_with_input(
            BenchmarkId::new("fsrbt search threads", threads),
            &query,
            |b, query| b.iter(|| searcher.collect(&tree, query).len()),
        );
    }
    group.finish();
}

criterion_group!(benches, fsrbt_insert, fsrbt_serialize, fsrbt_search);
criterion_main!(benches);
