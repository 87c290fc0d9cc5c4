//! Red-Black Tree Node Types

use serde::{Deserialize, Serialize};

use crate::record::FileRecord;

/// Stable position of a node within its tree's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Arena index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Node colour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Color {
    /// Red
    Red,
    /// Black
    Black,
}

impl From<Color> for u8 {
    fn from(color: Color) -> u8 {
        match color {
            Color::Red => 0,
            Color::Black => 1,
        }
    }
}

impl TryFrom<u8> for Color {
    type Error = String;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(Color::Red),
            1 => Ok(Color::Black),
            other => Err(format!("invalid color: {other}")),
        }
    }
}

/// A tree node. The parent link is a plain index, it owns nothing.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) record: FileRecord,
    pub(crate) color: Color,
    pub(crate) left: Option<NodeId>,
    pub(crate) right: Option<NodeId>,
    pub(crate) parent: Option<NodeId>,
}

impl Node {
    pub(crate) fn new(record: FileRecord, color: Color, parent: Option<NodeId>) -> Self {
        Self {
            record,
            color,
            left: None,
            right: None,
            parent,
        }
    }

    /// The record stored in this node.
    pub fn record(&self) -> &FileRecord {
        &self.record
    }

    /// Node colour.
    pub fn color(&self) -> Color {
        self.color
    }

    /// Left child.
    pub fn left(&self) -> Option<NodeId> {
        self.left
    }

    /// Right child.
    pub fn right(&self) -> Option<NodeId> {
        self.right
    }

    /// Parent.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub(crate) fn is_red(&self) -> bool {
        self.color == Color::Red
    }
}
