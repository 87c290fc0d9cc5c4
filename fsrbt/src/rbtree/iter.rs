use super::node::NodeId;
use super::tree::{Direction, RbTree};
use crate::record::FileRecord;

/// Lazy in-order traversal of an [`RbTree`].
///
/// The traversal state is an explicit stack of the nodes still to visit, never deeper than the
/// tree is tall.
pub struct Iter<'a> {
    tree: &'a RbTree,
    stack: Vec<NodeId>,
    direction: Direction,
}

impl<'a> Iter<'a> {
    pub(super) fn new(tree: &'a RbTree, direction: Direction) -> Self {
        // A red-black tree is never taller than 2 * log2(n + 1)
        let bound = 2 * (usize::BITS - tree.len().leading_zeros()) as usize;
        let mut iter = Self {
            tree,
            stack: Vec::with_capacity(bound),
            direction,
        };
        iter.push_spine(tree.root());
        iter
    }

    /// Stack `cursor` and every node down its near edge.
    fn push_spine(&mut self, mut cursor: Option<NodeId>) {
        while let Some(id) = cursor {
            self.stack.push(id);
            cursor = match self.direction {
                Direction::Ascending => self.tree[id].left(),
                Direction::Descending => self.tree[id].right(),
            };
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a FileRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let tree = self.tree;
        let node = &tree[id];
        let far = match self.direction {
            Direction::Ascending => node.right(),
            Direction::Descending => node.left(),
        };
        self.push_spine(far);
        Some(node.record())
    }
}
