//! Order-preserving B+tree index from typed keys to opaque value blobs.

mod node;
mod tree;

pub use tree::{BTree, Iter, Range};
