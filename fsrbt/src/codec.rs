//! Blob encoding
//!
//! A blob has the following structure
//!
//! Header
//!   [Node]
//!
//! The Header identifies the blob, records the key the tree was built with, the node count and
//! the total blob length. A reader uses the length to ignore any page padding after the blob.
//!
//! Nodes follow in preorder. Each one carries its record, its colour and two flags saying whether
//! a left and a right subtree follow it. Strings are length prefixed and integers are fixed
//! width, so the size of every node is known before anything is written.

use std::io;

use anyhow::Result;
use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rbtree::{Color, KeyKind, Node, NodeId, RbTree};
use crate::record::FileRecord;
use crate::BINCODER;

const MAGIC: [u8; 4] = *b"FRBT";

const FORMAT_VERSION_1: u8 = 1;

const SUPPORTED_VERSIONS: &[u8] = &[FORMAT_VERSION_1];

/// Encoded size of [`BlobHeader`]: magic, version, key, count and length.
pub const HEADER_LEN: usize = 4 + 1 + 1 + 8 + 8;

/// No valid tree gets anywhere near this deep.
const MAX_DEPTH: usize = 128;

/// Encoding and decoding errors. All of them mean the blob can't be trusted.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Encoding wrote a different number of bytes than the size pass predicted
    #[error("serialized {written} bytes, expected {expected}")]
    SizeMismatch {
        /// Precomputed size
        expected: u64,
        /// Bytes actually written
        written: u64,
    },

    /// The output buffer can't hold the encoded tree
    #[error("encoded tree does not fit in a buffer of {0} bytes")]
    Overflow(usize),

    /// The input buffer is shorter than its header says
    #[error("blob needs {needed} bytes but only {available} are available")]
    ShortBuffer {
        /// Bytes the header claims
        needed: u64,
        /// Bytes supplied
        available: u64,
    },

    /// The node stream ended early
    #[error("blob truncated at byte: {0}")]
    Truncated(usize),

    /// Not one of our blobs
    #[error("bad blob magic: {0:?}")]
    BadMagic([u8; 4]),

    /// A blob from a format we don't understand
    #[error("blob version not supported: {0}")]
    InvalidVersion(u8),

    /// Structurally invalid content
    #[error("corrupt blob: {0}")]
    Corrupt(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct BlobHeader {
    magic: [u8; 4],
    version: u8,
    key: KeyKind,
    count: u64,
    len: u64,
}

/// What gets written for each node.
#[derive(Serialize)]
struct FrameRef<'a> {
    record: &'a FileRecord,
    color: Color,
    left: bool,
    right: bool,
}

impl<'a> FrameRef<'a> {
    fn of(node: &'a Node) -> Self {
        Self {
            record: node.record(),
            color: node.color(),
            left: node.left().is_some(),
            right: node.right().is_some(),
        }
    }
}

/// What gets read back for each node. Must mirror [`FrameRef`].
#[derive(Deserialize)]
struct Frame {
    record: FileRecord,
    color: Color,
    left: bool,
    right: bool,
}

/// Exact number of bytes [`serialize_into`] will write for `tree`.
pub fn size_of(tree: &RbTree) -> Result<u64> {
    let mut size = HEADER_LEN as u64;
    if let Some(root) = tree.root() {
        size += subtree_size(tree, root)?;
    }
    Ok(size)
}

fn subtree_size(tree: &RbTree, id: NodeId) -> Result<u64> {
    let node = &tree[id];
    let mut size = BINCODER.serialized_size(&FrameRef::of(node))?;
    for child in [node.left(), node.right()].into_iter().flatten() {
        size += subtree_size(tree, child)?;
    }
    Ok(size)
}

/// Encode `tree` into the front of `buf`, returning the number of bytes written.
///
/// `buf` may be larger than the blob (for example, a page rounded mapping). Callers should check
/// the result against [`size_of`] with [`check_written`].
pub fn serialize_into(tree: &RbTree, buf: &mut [u8]) -> Result<usize> {
    let available = buf.len();
    if available < HEADER_LEN {
        return Err(CodecError::Overflow(available).into());
    }
    let (head, body) = buf.split_at_mut(HEADER_LEN);
    let body_len = body.len();

    let mut cursor: &mut [u8] = body;
    if let Some(root) = tree.root() {
        write_subtree(tree, root, &mut cursor).map_err(|e| {
            if is_io_kind(&e, io::ErrorKind::WriteZero) {
                anyhow::Error::new(CodecError::Overflow(available))
            } else {
                anyhow::Error::new(e)
            }
        })?;
    }
    let written = HEADER_LEN + body_len - cursor.len();

    // The header goes in last, once we know how long the blob really is
    let header = BlobHeader {
        magic: MAGIC,
        version: FORMAT_VERSION_1,
        key: tree.key(),
        count: tree.len() as u64,
        len: written as u64,
    };
    let mut head_cursor: &mut [u8] = head;
    BINCODER.serialize_into(&mut head_cursor, &header)?;

    tracing::debug!(bytes = written, nodes = tree.len(), "serialized tree");
    Ok(written)
}

fn write_subtree(tree: &RbTree, id: NodeId, out: &mut &mut [u8]) -> bincode::Result<()> {
    let node = &tree[id];
    BINCODER.serialize_into(&mut *out, &FrameRef::of(node))?;
    if let Some(left) = node.left() {
        write_subtree(tree, left, out)?;
    }
    if let Some(right) = node.right() {
        write_subtree(tree, right, out)?;
    }
    Ok(())
}

fn is_io_kind(err: &bincode::ErrorKind, kind: io::ErrorKind) -> bool {
    matches!(err, bincode::ErrorKind::Io(io_error) if io_error.kind() == kind)
}

/// Fail unless the encoder wrote exactly what the size pass predicted.
pub fn check_written(expected: u64, written: usize) -> Result<()> {
    if expected != written as u64 {
        tracing::error!(expected, written, "serialized size mismatch");
        return Err(CodecError::SizeMismatch {
            expected,
            written: written as u64,
        }
        .into());
    }
    Ok(())
}

/// Encode `tree` into a buffer of exactly the right size.
pub fn to_bytes(tree: &RbTree) -> Result<Vec<u8>> {
    let size = size_of(tree)?;
    let mut buf = vec![0; size as usize];
    let written = serialize_into(tree, &mut buf)?;
    check_written(size, written)?;
    Ok(buf)
}

/// Decode a tree from the front of `buf`. Bytes after the blob are ignored.
pub fn deserialize(buf: &[u8]) -> Result<RbTree> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::ShortBuffer {
            needed: HEADER_LEN as u64,
            available: buf.len() as u64,
        }
        .into());
    }
    let header: BlobHeader = BINCODER
        .deserialize(&buf[..HEADER_LEN])
        .map_err(|e| CodecError::Corrupt(format!("header: {e}")))?;

    if header.magic != MAGIC {
        return Err(CodecError::BadMagic(header.magic).into());
    }
    if !SUPPORTED_VERSIONS.contains(&header.version) {
        return Err(CodecError::InvalidVersion(header.version).into());
    }
    if header.len > buf.len() as u64 {
        return Err(CodecError::ShortBuffer {
            needed: header.len,
            available: buf.len() as u64,
        }
        .into());
    }
    if header.len < HEADER_LEN as u64 {
        return Err(CodecError::Corrupt(format!("blob length {} too small", header.len)).into());
    }

    let blob = &buf[..header.len as usize];
    let mut input = &blob[HEADER_LEN..];
    let mut reader = Reader {
        blob_len: blob.len(),
        nodes: Vec::with_capacity((header.count as usize).min(input.len())),
    };
    let root = if header.count == 0 {
        None
    } else {
        Some(reader.read_subtree(&mut input, 0)?)
    };
    if !input.is_empty() {
        return Err(CodecError::Corrupt(format!("{} trailing bytes", input.len())).into());
    }
    if reader.nodes.len() as u64 != header.count {
        return Err(CodecError::Corrupt(format!(
            "header promised {} nodes, found {}",
            header.count,
            reader.nodes.len()
        ))
        .into());
    }

    tracing::debug!(bytes = blob.len(), nodes = header.count, "deserialized tree");
    Ok(RbTree::from_arena(header.key, reader.nodes, root))
}

struct Reader {
    blob_len: usize,
    nodes: Vec<Node>,
}

impl Reader {
    fn read_subtree(&mut self, input: &mut &[u8], depth: usize) -> Result<NodeId> {
        if depth > MAX_DEPTH {
            return Err(CodecError::Corrupt(format!("tree deeper than {MAX_DEPTH}")).into());
        }
        let offset = self.blob_len - input.len();
        // Bound every read by what's left so a bad length prefix can't trigger a huge allocation
        let frame: Frame = BINCODER
            .with_limit(input.len() as u64)
            .deserialize_from(&mut *input)
            .map_err(|e| {
                if is_io_kind(&e, io::ErrorKind::UnexpectedEof)
                    || matches!(*e, bincode::ErrorKind::SizeLimit)
                {
                    CodecError::Truncated(offset)
                } else {
                    CodecError::Corrupt(format!("at byte {offset}: {e}"))
                }
            })?;
        if !frame.record.is_well_formed() {
            return Err(CodecError::Corrupt(format!("empty record field at byte {offset}")).into());
        }

        let id = NodeId::new(self.nodes.len());
        self.nodes.push(Node::new(frame.record, frame.color, None));
        if frame.left {
            let left = self.read_subtree(input, depth + 1)?;
            self.nodes[id.index()].left = Some(left);
            self.nodes[left.index()].parent = Some(id);
        }
        if frame.right {
            let right = self.read_subtree(input, depth + 1)?;
            self.nodes[id.index()].right = Some(right);
            self.nodes[right.index()].parent = Some(id);
        }
        Ok(id)
    }
}
