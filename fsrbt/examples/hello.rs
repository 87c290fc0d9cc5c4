use anyhow::Result;

use fsrbt::io::Segment;
use fsrbt::rbtree::{KeyKind, RbTree};
use fsrbt::record::{self, RecordFormat};
use fsrbt::search::{self, Query};

const RECORDS: &str = "\
/home/hello/x.txt|10|T_TEXT
/home/hello/y.txt|20|T_TEXT
/home/hello/.cache|4096|T_DIR|HIDDEN|CHILDREN|2
/home/hello/broken
";

fn main() -> Result<()> {
    // Build a tree ordered by name. The last line is malformed and gets skipped.
    let mut tree = RbTree::new(KeyKind::Name);
    let report = record::ingest(RECORDS.as_bytes(), &RecordFormat::default(), &mut tree)?;
    assert_eq!(report.inserted, 3);
    assert_eq!(report.skipped, 1);
    tree.verify()?;

    // Publish it in shared memory
    let segment = Segment::for_source(KeyKind::Name.segment_prefix(), "hello.lst");
    segment.write(&tree)?;

    // Another process could do this part
    let loaded = segment.read()?;
    let results = search::search(&loaded, &Query::new().with_names(["y.txt"]));
    assert_eq!(results.len(), 1);
    assert_eq!(results.matches[0].size(), 20);

    segment.unlink()?;
    Ok(())
}
