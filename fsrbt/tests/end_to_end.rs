use fsrbt::codec;
use fsrbt::io::shm::ShmError;
use fsrbt::io::{file, registry, Location, Segment};
use fsrbt::rbtree::{KeyKind, RbTree};
use fsrbt::record::{self, FileRecord, RecordFormat};
use fsrbt::search::{self, Query, SizeFilter};

fn sample_tree() -> RbTree {
    let mut tree = RbTree::new(KeyKind::Name);
    tree.insert(FileRecord::new("/a/x.txt", 10, "T_TEXT").expect("valid"));
    tree.insert(FileRecord::new("/a/y.txt", 20, "T_TEXT").expect("valid"));
    tree.insert(FileRecord::new("/a/z.txt", 5, "T_TEXT").expect("valid"));
    tree
}

fn summary(tree: &RbTree) -> Vec<(String, u64, String, String)> {
    tree.iter()
        .map(|r| {
            (
                r.name().to_string(),
                r.size(),
                r.path().to_string(),
                r.kind().to_string(),
            )
        })
        .collect()
}

#[test]
fn it_orders_records_by_name() {
    let tree = sample_tree();
    tree.verify().expect("valid tree");
    let names: Vec<_> = tree.iter().map(|r| (r.name(), r.size())).collect();
    assert_eq!(names, vec![("x.txt", 10), ("y.txt", 20), ("z.txt", 5)]);
}

#[test]
fn it_round_trips_through_a_blob() {
    let tree = sample_tree();
    let blob = codec::to_bytes(&tree).expect("serializes");
    assert_eq!(codec::size_of(&tree).expect("sizes"), blob.len() as u64);
    let new_tree = codec::deserialize(&blob).expect("deserializes");
    new_tree.verify().expect("valid tree");
    assert_eq!(summary(&tree), summary(&new_tree));
}

#[test_log::test]
fn it_searches_a_shared_memory_segment() {
    let segment = Segment::for_source(KeyKind::Name.segment_prefix(), "test.lst");
    assert_eq!(segment.name(), "rbt_name_test.lst.rbt.mem");
    // Left over from an earlier run
    let _ = segment.unlink();

    segment.write(&sample_tree()).expect("writes");
    let loaded = Location::Segment(segment.clone())
        .load()
        .expect("loads");
    let results = search::search(&loaded, &Query::new().with_names(["y.txt"]));
    assert_eq!(results.len(), 1);
    assert_eq!(results.matches[0].size(), 20);

    segment.unlink().expect("unlinks");
}

#[test]
fn it_scans_by_a_field_other_than_the_key() {
    let tree = sample_tree();
    let results = search::search(&tree, &Query::new().with_size(SizeFilter::Between(8, 15)));
    assert_eq!(results.len(), 1);
    assert_eq!(results.matches[0].name(), "x.txt");
    assert_eq!(results.matches[0].size(), 10);
    assert_eq!(results.stats.visited, 3);
}

#[test_log::test]
fn it_skips_malformed_lines() {
    let input = "/a/broken||T_TEXT\n/a/x.txt|10|T_TEXT\n/a/nosize\n/a/y.txt|20|T_TEXT\n";
    let mut tree = RbTree::new(KeyKind::Size);
    let report = record::ingest(input.as_bytes(), &RecordFormat::default(), &mut tree)
        .expect("ingests");
    assert_eq!(report.inserted, 2);
    assert_eq!(report.skipped, 2);
    assert_eq!(tree.len(), 2);
    assert!(FileRecord::parse("/a/nosize", &RecordFormat::default()).is_err());
}

#[test]
fn it_reports_missing_segments() {
    let name = format!("rbt_name_missing_{}.rbt.mem", std::process::id());
    assert!(matches!(
        registry::remove(&name),
        Err(ShmError::NotFound(missing)) if missing == name
    ));
}

#[test]
fn it_moves_trees_between_files_and_segments() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("moves.lst.rbt");
    let tree = sample_tree();
    let location = Location::File(path.clone());
    let written = location.save(&tree).expect("saves");
    assert_eq!(written, std::fs::metadata(&path).expect("exists").len());
    assert_eq!(location.to_string(), format!("file {}", path.display()));

    let from_file = file::load(&path).expect("loads");
    let segment = Segment::for_source(
        &format!("rbt_e2e_{}_", std::process::id()),
        &path,
    );
    assert!(segment.name().ends_with("moves.lst.rbt.mem"));
    segment.write(&from_file).expect("writes");
    assert_eq!(
        summary(&segment.read().expect("reads")),
        summary(&tree)
    );
    segment.unlink().expect("unlinks");
}
