//! Red-Black Tree implementation
//!
//! This is the main data structure exposed by the library.
//!

use std::cmp::Ordering;
use std::ops::Index;

use anyhow::Result;
use strum::EnumString;
use thiserror::Error;

use super::iter::Iter;
use super::key::KeyKind;
use super::node::{Color, Node, NodeId};
use crate::record::FileRecord;

/// When accessing tree contents serially, ascending or descending order.
#[derive(Clone, Copy, Debug, Default, EnumString, PartialEq)]
#[strum(ascii_case_insensitive)]
pub enum Direction {
    /// Process in ascending order.
    #[default]
    Ascending,
    /// Process in descending order.
    Descending,
}

/// Tree invariant violations, as reported by [`RbTree::verify`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TreeError {
    /// The root must be black
    #[error("root node with index: {0} is red")]
    RedRoot(usize),

    /// A red node must not have a red child
    #[error("red node with index: {0} has a red child")]
    RedRed(usize),

    /// Every path must carry the same number of black nodes
    #[error("node with index: {node} has black heights {left} (left) and {right} (right)")]
    BlackHeight {
        /// Offending node
        node: usize,
        /// Black height of its left subtree
        left: usize,
        /// Black height of its right subtree
        right: usize,
    },

    /// A child must point back at its parent
    #[error("could not find parent for node with index: {0}")]
    LostParent(usize),

    /// In-order traversal must be sorted by the tree's key. Holds the in-order position.
    #[error("record at in-order position: {0} is out of order")]
    OutOfOrder(usize),

    /// Nodes exist which aren't reachable from the root
    #[error("tree holds {nodes} nodes but only {reachable} are reachable")]
    Unreachable {
        /// Size of the arena
        nodes: usize,
        /// Nodes reachable from the root
        reachable: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Side {
    Left,
    Right,
}

impl Side {
    fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// A Red-Black Tree of file records.
///
/// Nodes are held in an arena and never removed, so a [`NodeId`] stays valid for the life of the
/// tree. Dropping the tree frees every node.
#[derive(Clone, Debug)]
pub struct RbTree {
    nodes: Vec<Node>,
    root: Option<NodeId>,
    key: KeyKind,
}

impl Index<NodeId> for RbTree {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }
}

impl RbTree {
    /// Create an empty tree ordered by `key`.
    pub fn new(key: KeyKind) -> Self {
        Self::with_capacity(key, 0)
    }

    /// Create an empty tree with room for `capacity` nodes.
    pub fn with_capacity(key: KeyKind, capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            root: None,
            key,
        }
    }

    /// Reassemble a tree from decoded parts. The caller vouches for the links.
    pub(crate) fn from_arena(key: KeyKind, nodes: Vec<Node>, root: Option<NodeId>) -> Self {
        Self { nodes, root, key }
    }

    /// The key this tree is ordered by.
    pub fn key(&self) -> KeyKind {
        self.key
    }

    /// Root node, if any.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Is the tree empty?
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Insert a record.
    ///
    /// Records which compare equal to an existing record are placed after it, so equal keys come
    /// back in insertion order.
    pub fn insert(&mut self, record: FileRecord) -> NodeId {
        let mut parent = None;
        let mut side = Side::Left;
        let mut cursor = self.root;
        while let Some(current) = cursor {
            parent = Some(current);
            side = match self.key.compare(&record, &self[current].record) {
                Ordering::Less => Side::Left,
                // Ties go right
                Ordering::Equal | Ordering::Greater => Side::Right,
            };
            cursor = self.child(current, side);
        }

        let id = NodeId::new(self.nodes.len());
        self.nodes.push(Node::new(record, Color::Red, parent));
        match parent {
            Some(p_idx) => self.set_child(p_idx, side, Some(id)),
            None => self.root = Some(id),
        }
        self.fix_insert(id);
        id
    }

    /// In-order (ascending) traversal. Every call starts a fresh traversal.
    pub fn iter(&self) -> Iter<'_> {
        Iter::new(self, Direction::Ascending)
    }

    /// In-order traversal in the given direction.
    pub fn iter_direction(&self, direction: Direction) -> Iter<'_> {
        Iter::new(self, direction)
    }

    /// Longest root to leaf path, counted in nodes.
    pub fn height(&self) -> usize {
        fn height(tree: &RbTree, id: Option<NodeId>) -> usize {
            match id {
                Some(id) => 1 + height(tree, tree[id].left).max(height(tree, tree[id].right)),
                None => 0,
            }
        }
        height(self, self.root)
    }

    /// Number of black nodes on the leftmost root to leaf path.
    pub fn black_height(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.root;
        while let Some(id) = cursor {
            if !self[id].is_red() {
                count += 1;
            }
            cursor = self[id].left;
        }
        count
    }

    /// Log basic information about our tree.
    pub fn info(&self) {
        tracing::info!(
            key = %self.key,
            node_count = self.len(),
            height = self.height(),
            black_height = self.black_height(),
            "Red-Black Tree"
        );
    }

    /// Verify all the red-black and ordering invariants.
    pub fn verify(&self) -> Result<()> {
        let Some(root) = self.root else {
            if self.nodes.is_empty() {
                return Ok(());
            }
            return Err(TreeError::Unreachable {
                nodes: self.nodes.len(),
                reachable: 0,
            }
            .into());
        };
        if self[root].is_red() {
            return Err(TreeError::RedRoot(root.index()).into());
        }
        if self[root].parent.is_some() {
            return Err(TreeError::LostParent(root.index()).into());
        }
        let mut reachable = 0;
        self.verify_subtree(root, &mut reachable)?;
        if reachable != self.nodes.len() {
            return Err(TreeError::Unreachable {
                nodes: self.nodes.len(),
                reachable,
            }
            .into());
        }

        let mut previous: Option<&FileRecord> = None;
        for (position, record) in self.iter().enumerate() {
            if let Some(previous) = previous {
                if self.key.compare(previous, record) == Ordering::Greater {
                    return Err(TreeError::OutOfOrder(position).into());
                }
            }
            previous = Some(record);
        }
        Ok(())
    }

    /// Returns the black height of the subtree at `id`.
    fn verify_subtree(&self, id: NodeId, reachable: &mut usize) -> Result<usize, TreeError> {
        *reachable += 1;
        let node = &self[id];
        let mut heights = [0; 2];
        for (slot, child) in [node.left, node.right].into_iter().enumerate() {
            if let Some(child) = child {
                if self[child].parent != Some(id) {
                    return Err(TreeError::LostParent(child.index()));
                }
                if node.is_red() && self[child].is_red() {
                    return Err(TreeError::RedRed(id.index()));
                }
                heights[slot] = self.verify_subtree(child, reachable)?;
            }
        }
        if heights[0] != heights[1] {
            return Err(TreeError::BlackHeight {
                node: id.index(),
                left: heights[0],
                right: heights[1],
            });
        }
        Ok(heights[0] + usize::from(!node.is_red()))
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    fn child(&self, id: NodeId, side: Side) -> Option<NodeId> {
        match side {
            Side::Left => self[id].left,
            Side::Right => self[id].right,
        }
    }

    fn set_child(&mut self, id: NodeId, side: Side, child: Option<NodeId>) {
        match side {
            Side::Left => self.node_mut(id).left = child,
            Side::Right => self.node_mut(id).right = child,
        }
    }

    fn set_color(&mut self, id: NodeId, color: Color) {
        self.node_mut(id).color = color;
    }

    /// Point whatever referenced `old` (its parent, or the root) at `new`.
    fn replace_child(&mut self, parent: Option<NodeId>, old: NodeId, new: NodeId) {
        match parent {
            None => self.root = Some(new),
            Some(p_idx) if self[p_idx].left == Some(old) => self.node_mut(p_idx).left = Some(new),
            Some(p_idx) => self.node_mut(p_idx).right = Some(new),
        }
    }

    /// Restore the red-black properties after inserting the red node `node`.
    fn fix_insert(&mut self, mut node: NodeId) {
        while let Some(parent) = self[node].parent.filter(|&p| self[p].is_red()) {
            // A red parent is never the root, so there is always a grandparent
            let Some(grandparent) = self[parent].parent else {
                break;
            };
            let side = if self[grandparent].left == Some(parent) {
                Side::Left
            } else {
                Side::Right
            };

            // Case 1: red uncle, push the red up the tree
            if let Some(uncle) = self
                .child(grandparent, side.opposite())
                .filter(|&u| self[u].is_red())
            {
                self.set_color(parent, Color::Black);
                self.set_color(uncle, Color::Black);
                self.set_color(grandparent, Color::Red);
                node = grandparent;
                continue;
            }

            // Case 2: inner child, rotate it into the outer position
            let mut parent = parent;
            if self.child(parent, side.opposite()) == Some(node) {
                self.rotate(parent, side);
                std::mem::swap(&mut node, &mut parent);
            }

            // Case 3: outer child
            self.set_color(parent, Color::Black);
            self.set_color(grandparent, Color::Red);
            self.rotate(grandparent, side.opposite());
        }
        if let Some(root) = self.root {
            self.set_color(root, Color::Black);
        }
    }

    /// Rotate towards `side`: `Side::Left` lifts the right child.
    fn rotate(&mut self, id: NodeId, side: Side) {
        match side {
            Side::Left => self.rotate_left(id),
            Side::Right => self.rotate_right(id),
        }
    }

    fn rotate_left(&mut self, x_idx: NodeId) {
        let Some(y_idx) = self[x_idx].right else {
            return;
        };
        let beta = self[y_idx].left;
        self.node_mut(x_idx).right = beta;
        if let Some(b_idx) = beta {
            self.node_mut(b_idx).parent = Some(x_idx);
        }
        let parent = self[x_idx].parent;
        self.node_mut(y_idx).parent = parent;
        self.replace_child(parent, x_idx, y_idx);
        self.node_mut(y_idx).left = Some(x_idx);
        self.node_mut(x_idx).parent = Some(y_idx);
    }

    fn rotate_right(&mut self, x_idx: NodeId) {
        let Some(y_idx) = self[x_idx].left else {
            return;
        };
        let beta = self[y_idx].right;
        self.node_mut(x_idx).left = beta;
        if let Some(b_idx) = beta {
            self.node_mut(b_idx).parent = Some(x_idx);
        }
        let parent = self[x_idx].parent;
        self.node_mut(y_idx).parent = parent;
        self.replace_child(parent, x_idx, y_idx);
        self.node_mut(y_idx).right = Some(x_idx);
        self.node_mut(x_idx).parent = Some(y_idx);
    }
}

impl<'a> IntoIterator for &'a RbTree {
    type Item = &'a FileRecord;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Extend<FileRecord> for RbTree {
    fn extend<T: IntoIterator<Item = FileRecord>>(&mut self, iter: T) {
        for record in iter {
            self.insert(record);
        }
    }
}
