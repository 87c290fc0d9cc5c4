//! Persistence
//!
//! A serialized tree lives either in a flat file or in a named shared memory segment.

use std::fmt;
use std::path::PathBuf;

use anyhow::Result;

use crate::rbtree::RbTree;

pub mod file;
pub mod registry;
pub mod shm;

pub use self::shm::Segment;

/// Where a serialized tree is kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    /// A flat file
    File(PathBuf),
    /// A shared memory segment
    Segment(Segment),
}

impl Location {
    /// Persist `tree` here, returning the number of bytes stored.
    pub fn save(&self, tree: &RbTree) -> Result<u64> {
        match self {
            Location::File(path) => file::save(tree, path),
            Location::Segment(segment) => segment.write(tree).map(|size| size as u64),
        }
    }

    /// Load the tree stored here.
    pub fn load(&self) -> Result<RbTree> {
        match self {
            Location::File(path) => file::load(path),
            Location::Segment(segment) => segment.read(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::File(path) => write!(f, "file {}", path.display()),
            Location::Segment(segment) => write!(f, "segment {}", segment.name()),
        }
    }
}
