//! Red-Black Tree implementation
//!

// Re-export
pub use self::iter::Iter;
pub use self::key::KeyKind;
pub use self::node::{Color, Node, NodeId};
pub use self::tree::Direction;
pub use self::tree::RbTree;
pub use self::tree::TreeError;

mod iter;
mod key;
mod node;
pub mod tree;
