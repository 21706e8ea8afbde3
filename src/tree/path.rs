//! # Tree Path
//!
//! An explicit root-to-leaf chain of block references built during one
//! descent and owned by one operation. The leaf sits at index 0 and the
//! root at `len() - 1`, so level numbers coincide with path indexes. Each
//! entry also records the node's slot within its parent, which the COW
//! cloner and the leaf-to-leaf iterators use to splice and advance without
//! re-searching.
//!
//! Paths are stack-allocated up to [`MAX_TREE_DEPTH`] levels and are never
//! shared between operations; a mutating operation rewrites entries in
//! place as it clones and splits.

use smallvec::SmallVec;

use crate::config::MAX_TREE_DEPTH;
use crate::store::BlockId;

/// One level of a path: the block at this level and its child slot within
/// the level above (0 for the root).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathEntry {
    pub id: BlockId,
    pub parent_idx: usize,
}

/// Root-to-leaf chain of node references; leaf at index 0.
#[derive(Debug, Clone, Default)]
pub struct TreePath {
    entries: SmallVec<[PathEntry; MAX_TREE_DEPTH]>,
}

impl TreePath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a path from root-first descent records.
    pub fn from_root_descent(root_first: &[PathEntry]) -> Self {
        let mut entries: SmallVec<[PathEntry; MAX_TREE_DEPTH]> =
            root_first.iter().copied().collect();
        entries.reverse();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, level: usize) -> PathEntry {
        self.entries[level]
    }

    pub fn leaf(&self) -> PathEntry {
        self.entries[0]
    }

    pub fn root(&self) -> PathEntry {
        self.entries[self.entries.len() - 1]
    }

    pub fn set_id(&mut self, level: usize, id: BlockId) {
        self.entries[level].id = id;
    }

    pub fn set_parent_idx(&mut self, level: usize, parent_idx: usize) {
        self.entries[level].parent_idx = parent_idx;
    }

    pub fn set(&mut self, level: usize, entry: PathEntry) {
        self.entries[level] = entry;
    }

    /// Adds a new root above the current one (tree height grows by one).
    /// The old root becomes child 0 of the new root.
    pub fn push_root(&mut self, id: BlockId) {
        if let Some(top) = self.entries.last_mut() {
            top.parent_idx = 0;
        }
        self.entries.push(PathEntry { id, parent_idx: 0 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_first_ordering() {
        let path = TreePath::from_root_descent(&[
            PathEntry { id: BlockId(3), parent_idx: 0 }, // root
            PathEntry { id: BlockId(2), parent_idx: 4 },
            PathEntry { id: BlockId(1), parent_idx: 7 }, // leaf
        ]);
        assert_eq!(path.len(), 3);
        assert_eq!(path.leaf().id, BlockId(1));
        assert_eq!(path.leaf().parent_idx, 7);
        assert_eq!(path.root().id, BlockId(3));
        assert_eq!(path.get(1).id, BlockId(2));
    }

    #[test]
    fn push_root_rewires_old_top() {
        let mut path = TreePath::from_root_descent(&[PathEntry {
            id: BlockId(1),
            parent_idx: 0,
        }]);
        path.push_root(BlockId(9));
        assert_eq!(path.root().id, BlockId(9));
        assert_eq!(path.get(0).id, BlockId(1));
        assert_eq!(path.get(0).parent_idx, 0);
    }
}
