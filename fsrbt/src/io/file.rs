//! File functions
//!
//! A tree file is nothing more than a blob (see [`crate::codec`]) written in one go. The whole
//! file is read back before decoding.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::codec;
use crate::rbtree::RbTree;

/// Extension given to saved tree files.
pub const TREE_EXTENSION: &str = "rbt";

/// Save `tree` to `path`, returning the number of bytes written.
pub fn save<P: AsRef<Path>>(tree: &RbTree, path: P) -> Result<u64> {
    let path = path.as_ref();
    let size = codec::size_of(tree)?;
    let mut buf = vec![0; size as usize];
    let written = codec::serialize_into(tree, &mut buf)?;
    codec::check_written(size, written)?;

    fs::write(path, &buf).with_context(|| format!("writing tree file {}", path.display()))?;
    tracing::info!(path = %path.display(), bytes = size, "saved tree");
    Ok(size)
}

/// Load a tree saved by [`save`].
pub fn load<P: AsRef<Path>>(path: P) -> Result<RbTree> {
    let path = path.as_ref();
    let buf = fs::read(path).with_context(|| format!("reading tree file {}", path.display()))?;
    let tree = codec::deserialize(&buf)
        .with_context(|| format!("decoding tree file {}", path.display()))?;
    tracing::info!(path = %path.display(), nodes = tree.len(), "loaded tree");
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::codec::CodecError;
    use crate::rbtree::KeyKind;
    use crate::record::FileRecord;

    fn tree() -> RbTree {
        let mut tree = RbTree::new(KeyKind::Path);
        for (path, size) in [("/b", 2), ("/a", 1), ("/c", 3), ("/a", 4)] {
            tree.insert(FileRecord::new(path, size, "T_TEXT").expect("valid"));
        }
        tree
    }

    #[test]
    fn it_saves_and_loads_tree_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("save_load.rbt");
        let tree = tree();
        let size = save(&tree, &path).expect("saves");
        assert_eq!(size, std::fs::metadata(&path).expect("exists").len());
        let new_tree = load(&path).expect("loads");
        new_tree.verify().expect("valid tree");
        assert!(tree.iter().eq(new_tree.iter()));
    }

    #[test]
    fn it_fails_to_load_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = load(dir.path().join("missing.rbt")).expect_err("missing");
        assert!(err.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn it_fails_to_load_truncated_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("truncated.rbt");
        save(&tree(), &path).expect("saves");
        let buf = std::fs::read(&path).expect("reads");
        std::fs::write(&path, &buf[..buf.len() / 2]).expect("writes");
        let err = load(&path).expect_err("truncated");
        assert!(err.downcast_ref::<CodecError>().is_some());
    }
}
