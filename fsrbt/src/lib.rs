#![warn(missing_docs)]
//! fsrbt: Filesystem Red-Black Tree
//!
//! # Implementation Details
//!
//! Builds a searchable index of filesystem metadata records (name, size, path, type, hash and
//! link/hidden flags) as a red-black tree, persists that tree as a compact binary blob in either
//! a flat file or a POSIX shared memory segment, and later reloads the blob to answer predicate
//! queries.
//!
//! (If you aren't sure what a red-black tree is, you can read more here: <https://en.wikipedia.org/wiki/Red%E2%80%93black_tree>.)
//!
//! The tree is built once and queried many times. Records arrive as delimited text lines (see
//! [`record`]) and are inserted sequentially into an [`rbtree::RbTree`] ordered by one of a fixed
//! set of keys: name, size or path.
//!
//! Nodes live in an arena and reference each other by index, so a parent link is just a number
//! and dropping the tree frees everything at once.
//!
//! At save time, the tree is encoded in preorder by the [`codec`] module. The exact size of the
//! blob is computed before a single byte is written, so the buffer never grows. Each node is
//! encoded using bincode with fixed width integers.
//!
//! The blob can be written to a file or into a named shared memory segment (see [`io`]). A later
//! process maps the segment read-only, decodes a private copy of the tree and runs a [`search`]
//! across every node, fanning out onto additional threads while permits are available.
//!

pub mod codec;
pub mod io;
pub mod rbtree;
pub mod record;
pub mod search;

use bincode::config::AllowTrailing;
use bincode::config::FixintEncoding;
use bincode::config::WithOtherIntEncoding;
use bincode::config::WithOtherTrailing;
use bincode::{DefaultOptions, Options};
use std::sync::LazyLock;

static BINCODER: LazyLock<
    WithOtherIntEncoding<WithOtherTrailing<DefaultOptions, AllowTrailing>, FixintEncoding>,
> = LazyLock::new(|| {
    bincode::DefaultOptions::new()
        .allow_trailing_bytes()
        .with_fixint_encoding()
});
