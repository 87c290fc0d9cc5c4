//! Segment registry
//!
//! POSIX has no call to enumerate shared memory objects. On Linux they appear as files under
//! `/dev/shm`, so that directory is scanned instead.

use std::path::Path;

use anyhow::{Context, Result};

use super::shm::{Segment, ShmError};

/// Where the OS exposes shared memory objects.
pub const SHM_DIR: &str = "/dev/shm";

/// A segment found by [`list`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Segment name, without the leading `/`
    pub name: String,
    /// Size in bytes
    pub size: u64,
}

/// List every segment whose name starts with `prefix`, sorted by name.
pub fn list(prefix: &str) -> Result<Vec<SegmentInfo>> {
    list_in(Path::new(SHM_DIR), prefix)
}

fn list_in(dir: &Path, prefix: &str) -> Result<Vec<SegmentInfo>> {
    let mut segments = vec![];
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("listing segments in {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(prefix) {
            continue;
        }
        let metadata = match std::fs::metadata(entry.path()) {
            Ok(metadata) => metadata,
            // Unlinked since the directory was read
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(segment = %name, "vanished while listing");
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("inspecting segment {name}"));
            }
        };
        if !metadata.is_file() {
            continue;
        }
        segments.push(SegmentInfo {
            name,
            size: metadata.len(),
        });
    }
    segments.sort_by(|a, b| a.name.cmp(&b.name));
    tracing::debug!(prefix, count = segments.len(), "listed segments");
    Ok(segments)
}

/// Remove the segment called `name`.
///
/// A missing segment is reported as [`ShmError::NotFound`], which callers may treat as harmless.
pub fn remove(name: &str) -> Result<(), ShmError> {
    Segment::new(name).unlink()
}

/// Remove every segment whose name starts with `prefix`, returning how many went.
pub fn remove_all(prefix: &str) -> Result<usize> {
    let mut removed = 0;
    for info in list(prefix)? {
        match remove(&info.name) {
            Ok(()) => removed += 1,
            // Somebody else got there first
            Err(ShmError::NotFound(name)) => tracing::debug!(segment = %name, "already gone"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::rbtree::{KeyKind, RbTree};
    use crate::record::FileRecord;

    #[test]
    fn it_lists_by_prefix() {
        let dir = tempfile::tempdir().expect("temp dir");
        for name in ["rbt_name_b.rbt.mem", "rbt_name_a.rbt.mem", "rbt_size_a.rbt.mem"] {
            std::fs::write(dir.path().join(name), b"x").expect("writes");
        }
        std::fs::create_dir(dir.path().join("rbt_name_dir")).expect("creates");
        let found = list_in(dir.path(), "rbt_name_").expect("lists");
        let names: Vec<_> = found.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["rbt_name_a.rbt.mem", "rbt_name_b.rbt.mem"]);
        assert_eq!(found[0].size, 1);
    }

    #[cfg(unix)]
    #[test_log::test]
    fn it_skips_entries_which_vanish() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join("rbt_name_kept.rbt.mem"), b"xy").expect("writes");
        // Nothing behind this name by the time it is inspected
        std::os::unix::fs::symlink(
            dir.path().join("gone"),
            dir.path().join("rbt_name_gone.rbt.mem"),
        )
        .expect("links");
        let found = list_in(dir.path(), "rbt_name_").expect("lists");
        assert_eq!(
            found,
            vec![SegmentInfo {
                name: "rbt_name_kept.rbt.mem".to_string(),
                size: 2,
            }]
        );
    }

    #[cfg(target_os = "linux")]
    #[test_log::test]
    fn it_lists_and_removes_live_segments() {
        let prefix = format!("fsrbt_registry_{}_", std::process::id());
        let mut tree = RbTree::new(KeyKind::Name);
        tree.insert(FileRecord::new("/r/one", 1, "T_TEXT").expect("valid"));
        for source in ["first.lst", "second.lst"] {
            Segment::for_source(&prefix, source)
                .write(&tree)
                .expect("writes");
        }
        let found = list(&prefix).expect("lists");
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|s| s.size > 0));

        remove(&found[0].name).expect("removes");
        assert!(matches!(
            remove(&found[0].name),
            Err(ShmError::NotFound(_))
        ));
        assert_eq!(remove_all(&prefix).expect("removes rest"), 1);
        assert!(list(&prefix).expect("lists").is_empty());
    }
}
