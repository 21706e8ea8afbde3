//! # Tree Engine
//!
//! The balanced-tree container over packed blocks. A [`Tree`] borrows a
//! [`BlockStore`] exclusively for the duration of a write session and
//! addresses one container's root pointer inside it.
//!
//! ## Entry Model
//!
//! The engine stores a weighted positional sequence: every entry is an
//! opaque `u64` payload with an `i64` weight. Entries are addressed either
//! by position (count column) or by cumulative weight (weight column);
//! both descents are order-statistics searches over the branch sum trees.
//! Containers with richer key encodings layer them onto the payload and
//! weight columns.
//!
//! ## Mutation Protocol
//!
//! Every mutating operation follows the same state machine:
//!
//! 1. **Locate** — build a [`TreePath`] from root to target leaf.
//! 2. **Clone** — `cow_clone_path` makes the whole chain mutable,
//!    cloning blocks of older generations (see [`cow`]).
//! 3. **Mutate** — apply the leaf edit; a full leaf splits and the
//!    operation re-seeks.
//! 4. **Propagate** — add the accumulator delta to each ancestor slot,
//!    bottom-up, stopping early on an all-zero delta.
//! 5. **Restructure** — grow the root on a root split; prune emptied
//!    nodes and collapse single-child roots after removals.
//!
//! Abandoning an operation before the root-pointer swap leaves the
//! previous tree fully intact; clones created so far are reclaimed through
//! the store's reference counts.

mod cow;
mod path;

use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use eyre::{bail, ensure, Result};
use smallvec::SmallVec;
use tracing::debug;

use crate::config::{BLOCK_SIZE, MAX_TREE_DEPTH};
use crate::error::CapacityExceeded;
use crate::node::{
    Accumulator, BranchNode, BranchNodeMut, LeafNode, LeafNodeMut, Node,
};
use crate::store::{BlockId, BlockStore, ContainerId};

pub use path::{PathEntry, TreePath};

/// Weight-search comparator, matching the sum tree's forward searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WeightMode {
    Ge,
    Gt,
}

/// One container's balanced tree, operating against a borrowed store.
pub struct Tree<'s, S: BlockStore> {
    pub(crate) store: &'s mut S,
    pub(crate) ctr: ContainerId,
    pub(crate) branching: u16,
    /// Arena for block staging during splits; reset per operation.
    scratch: Bump,
}

impl<'s, S: BlockStore> Tree<'s, S> {
    /// Creates an empty container: a single root leaf.
    pub fn create(store: &'s mut S, ctr: ContainerId, branching: u16) -> Result<Self> {
        ensure!(
            store.get_root(ctr)?.is_none(),
            "container {} already exists",
            ctr
        );
        let mut tree = Self {
            store,
            ctr,
            branching,
            scratch: Bump::new(),
        };
        let root = tree.store.create_block()?;
        {
            let block = tree.store.block_mut(root)?;
            let mut leaf = LeafNodeMut::init(block, branching)?;
            leaf.header_mut()?.set_root(true);
        }
        tree.install_root(root)?;
        Ok(tree)
    }

    /// Opens an existing container, reading the branching factor from its
    /// root block.
    pub fn open(store: &'s mut S, ctr: ContainerId) -> Result<Self> {
        let Some(root) = store.get_root(ctr)? else {
            bail!("container {} does not exist", ctr);
        };
        let branching = match Node::from_block(store.block(root)?)? {
            Node::Leaf(leaf) => leaf.weights().branching()?,
            Node::Branch(branch) => branch.counts().branching()?,
        } as u16;
        Ok(Self {
            store,
            ctr,
            branching,
            scratch: Bump::new(),
        })
    }

    pub fn container_id(&self) -> ContainerId {
        self.ctr
    }

    pub fn root_id(&self) -> Result<BlockId> {
        match self.store.get_root(self.ctr)? {
            Some(id) => Ok(id),
            None => bail!("container {} has no root", self.ctr),
        }
    }

    /// Number of entries in the tree.
    pub fn len(&self) -> Result<u64> {
        Ok(self.root_acc()?.count() as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Sum of all entry weights.
    pub fn total_weight(&self) -> Result<i64> {
        Ok(self.root_acc()?.weight())
    }

    fn root_acc(&self) -> Result<Accumulator> {
        Node::from_block(self.store.block(self.root_id()?)?)?.accumulate()
    }

    // ------------------------------------------------------------------
    // Descent
    // ------------------------------------------------------------------

    /// Builds a path to the leaf covering position `pos`, allowing
    /// `pos == len()` (the append position, clamped into the last leaf).
    /// Returns the path and the position within the leaf.
    fn seek_for_insert(&self, pos: u64) -> Result<(TreePath, usize)> {
        let size = self.len()?;
        ensure!(pos <= size, "position {} out of range ({})", pos, size);

        let mut records: SmallVec<[PathEntry; MAX_TREE_DEPTH]> = SmallVec::new();
        let mut id = self.root_id()?;
        let mut parent_idx = 0usize;
        let mut remaining = pos as i64;

        loop {
            records.push(PathEntry { id, parent_idx });
            match Node::from_block(self.store.block(id)?)? {
                Node::Leaf(_) => {
                    return Ok((TreePath::from_root_descent(&records), remaining as usize));
                }
                Node::Branch(branch) => {
                    let n = branch.child_count()?;
                    ensure!(n > 0, "branch {} has no children", id);
                    let hit = branch.find_child_by_pos(remaining)?;
                    let (idx, prefix) = if hit.idx == n {
                        // Append position: clamp into the last child.
                        (n - 1, branch.counts().rank(n - 1)?)
                    } else {
                        (hit.idx, hit.prefix)
                    };
                    remaining -= prefix;
                    id = branch.child_id(idx)?;
                    parent_idx = idx;
                }
            }
        }
    }

    /// Builds a path to the leaf holding the entry at `pos`.
    pub fn seek(&self, pos: u64) -> Result<(TreePath, usize)> {
        let size = self.len()?;
        ensure!(pos < size, "position {} out of range ({})", pos, size);
        self.seek_for_insert(pos)
    }

    /// Reads the entry at `pos` as `(payload, weight)`.
    pub fn entry(&self, pos: u64) -> Result<(u64, i64)> {
        let (path, at) = self.seek(pos)?;
        self.leaf_entry(&path, at)
    }

    /// Reads `(payload, weight)` at a position returned by a seek or a
    /// weight search.
    pub fn leaf_entry(&self, path: &TreePath, at: usize) -> Result<(u64, i64)> {
        let leaf = LeafNode::from_block(self.store.block(path.leaf().id)?)?;
        Ok((leaf.payload(at)?, leaf.weight(at)?))
    }

    fn find_weight_fw(
        &self,
        target: i64,
        mode: WeightMode,
    ) -> Result<Option<(TreePath, usize, u64)>> {
        if self.is_empty()? {
            return Ok(None);
        }

        let mut records: SmallVec<[PathEntry; MAX_TREE_DEPTH]> = SmallVec::new();
        let mut id = self.root_id()?;
        let mut parent_idx = 0usize;
        let mut remaining = target;
        let mut global = 0u64;

        loop {
            records.push(PathEntry { id, parent_idx });
            match Node::from_block(self.store.block(id)?)? {
                Node::Leaf(leaf) => {
                    let hit = match mode {
                        WeightMode::Ge => leaf.find_weight_ge(remaining)?,
                        WeightMode::Gt => leaf.find_weight_gt(remaining)?,
                    };
                    if hit.idx == leaf.entry_count()? {
                        // Only reachable when this leaf is the root: a
                        // branch descends only into satisfying children.
                        return Ok(None);
                    }
                    let pos = global + hit.idx as u64;
                    return Ok(Some((TreePath::from_root_descent(&records), hit.idx, pos)));
                }
                Node::Branch(branch) => {
                    let hit = match mode {
                        WeightMode::Ge => branch.find_child_by_weight_ge(remaining)?,
                        WeightMode::Gt => branch.find_child_by_weight_gt(remaining)?,
                    };
                    if hit.idx == branch.child_count()? {
                        return Ok(None);
                    }
                    remaining -= hit.prefix;
                    global += branch.counts().rank(hit.idx)? as u64;
                    id = branch.child_id(hit.idx)?;
                    parent_idx = hit.idx;
                }
            }
        }
    }

    /// First entry whose inclusive cumulative weight is `>= target`;
    /// `None` when the total weight falls short.
    pub fn find_weight_ge(&self, target: i64) -> Result<Option<(TreePath, usize)>> {
        Ok(self
            .find_weight_fw(target, WeightMode::Ge)?
            .map(|(path, at, _)| (path, at)))
    }

    /// First entry whose inclusive cumulative weight is `> target`.
    pub fn find_weight_gt(&self, target: i64) -> Result<Option<(TreePath, usize)>> {
        Ok(self
            .find_weight_fw(target, WeightMode::Gt)?
            .map(|(path, at, _)| (path, at)))
    }

    /// Last entry whose inclusive cumulative weight is `<= target`;
    /// `None` when even the first entry exceeds it.
    pub fn find_weight_le(&self, target: i64) -> Result<Option<(TreePath, usize)>> {
        match self.find_weight_fw(target, WeightMode::Gt)? {
            Some((_, _, 0)) => Ok(None),
            Some((_, _, global)) => Ok(Some(self.seek(global - 1)?)),
            None => {
                let n = self.len()?;
                if n == 0 {
                    Ok(None)
                } else {
                    Ok(Some(self.seek(n - 1)?))
                }
            }
        }
    }

    /// Last entry whose inclusive cumulative weight is `< target`.
    pub fn find_weight_lt(&self, target: i64) -> Result<Option<(TreePath, usize)>> {
        match self.find_weight_fw(target, WeightMode::Ge)? {
            Some((_, _, 0)) => Ok(None),
            Some((_, _, global)) => Ok(Some(self.seek(global - 1)?)),
            None => {
                let n = self.len()?;
                if n == 0 {
                    Ok(None)
                } else {
                    Ok(Some(self.seek(n - 1)?))
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Inserts an entry at position `pos` (`pos == len()` appends).
    pub fn insert(&mut self, pos: u64, payload: u64, weight: i64) -> Result<()> {
        loop {
            let (mut path, at) = self.seek_for_insert(pos)?;
            self.cow_clone_path(&mut path, 0)?;

            let leaf_id = path.leaf().id;
            let attempt = {
                let mut leaf = LeafNodeMut::from_block(self.store.block_mut(leaf_id)?)?;
                leaf.insert_entry(at, payload, weight)
            };
            match attempt {
                Ok(()) => {
                    self.propagate(&path, Accumulator::new(1, weight))?;
                    return Ok(());
                }
                Err(err) if err.downcast_ref::<CapacityExceeded>().is_some() => {
                    debug!(%leaf_id, "leaf full, splitting");
                    self.split_level(&mut path, 0)?;
                    // Re-seek: the target half depends on the split point.
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Appends an entry after the current last position.
    pub fn push(&mut self, payload: u64, weight: i64) -> Result<()> {
        let end = self.len()?;
        self.insert(end, payload, weight)
    }

    /// Removes the entry at `pos`, returning `(payload, weight)`.
    pub fn remove(&mut self, pos: u64) -> Result<(u64, i64)> {
        let (mut path, at) = self.seek(pos)?;
        self.cow_clone_path(&mut path, 0)?;

        let leaf_id = path.leaf().id;
        let (payload, weight) = {
            let mut leaf = LeafNodeMut::from_block(self.store.block_mut(leaf_id)?)?;
            leaf.remove_entry(at)?
        };
        self.propagate(&path, -Accumulator::new(1, weight))?;
        self.prune_empty_nodes(&path)?;
        self.shrink_root()?;
        Ok((payload, weight))
    }

    /// Adds `delta` to each ancestor's accumulator slot along the path.
    fn propagate(&mut self, path: &TreePath, delta: Accumulator) -> Result<()> {
        if delta.is_zero() {
            return Ok(());
        }
        for level in 1..path.len() {
            let slot = path.get(level - 1).parent_idx;
            let parent_id = path.get(level).id;
            let mut parent = BranchNodeMut::from_block(self.store.block_mut(parent_id)?)?;
            parent.add_to_child(slot, delta)?;
        }
        Ok(())
    }

    /// Splits the node at `level` around its midpoint, inserting the new
    /// sibling into the parent (growing a new root when `level` is the
    /// root). The path is fully cloned on entry and is kept pointing at
    /// the chain of its original leaf. Returns the split midpoint.
    fn split_level(&mut self, path: &mut TreePath, level: usize) -> Result<usize> {
        if level + 1 == path.len() {
            self.grow_root(path)?;
        }

        let node_id = path.get(level).id;
        let my_slot = path.get(level).parent_idx;
        let sibling = self.store.create_block()?;

        let (mid, moved) = if level == 0 {
            let count = LeafNode::from_block(self.store.block(node_id)?)?.entry_count()?;
            ensure!(count >= 2, "cannot split leaf {} with {} entries", node_id, count);
            let mid = count / 2;
            {
                let block = self.store.block_mut(sibling)?;
                LeafNodeMut::init(block, self.branching)?;
            }
            let moved = self.split_leaf_into(node_id, mid, sibling)?;
            (mid, moved)
        } else {
            let count = BranchNode::from_block(self.store.block(node_id)?)?.child_count()?;
            ensure!(count >= 2, "cannot split branch {} with {} children", node_id, count);
            let mid = count / 2;
            {
                let block = self.store.block_mut(sibling)?;
                BranchNodeMut::init(block, level, self.branching)?;
            }
            let moved = self.split_branch_into(node_id, mid, sibling)?;
            (mid, moved)
        };

        // The parent keeps aggregates exact: our slot loses what moved.
        {
            let parent_id = path.get(level + 1).id;
            let mut parent = BranchNodeMut::from_block(self.store.block_mut(parent_id)?)?;
            parent.add_to_child(my_slot, -moved)?;
        }
        let sib_slot = self.insert_child_at(path, level + 1, my_slot + 1, sibling, moved)?;

        // If the path's own chain moved into the sibling, follow it.
        if level > 0 {
            let child_slot = path.get(level - 1).parent_idx;
            if child_slot >= mid {
                path.set(level, PathEntry { id: sibling, parent_idx: sib_slot });
                path.set_parent_idx(level - 1, child_slot - mid);
            }
        }

        debug!(%node_id, %sibling, level, mid, "split node");
        Ok(mid)
    }

    fn split_leaf_into(&mut self, node_id: BlockId, mid: usize, sibling: BlockId) -> Result<Accumulator> {
        // Two blocks are mutated at once; split the store borrow by
        // staging the sibling in the scratch arena.
        self.scratch.reset();
        let mut staged = BumpVec::with_capacity_in(BLOCK_SIZE, &self.scratch);
        staged.extend_from_slice(self.store.block(sibling)?);
        let moved = {
            let mut target = LeafNodeMut::from_block(&mut staged)?;
            let mut source = LeafNodeMut::from_block(self.store.block_mut(node_id)?)?;
            source.split_to(mid, &mut target)?
        };
        self.store.block_mut(sibling)?.copy_from_slice(&staged);
        Ok(moved)
    }

    fn split_branch_into(&mut self, node_id: BlockId, mid: usize, sibling: BlockId) -> Result<Accumulator> {
        self.scratch.reset();
        let mut staged = BumpVec::with_capacity_in(BLOCK_SIZE, &self.scratch);
        staged.extend_from_slice(self.store.block(sibling)?);
        let moved = {
            let mut target = BranchNodeMut::from_block(&mut staged)?;
            let mut source = BranchNodeMut::from_block(self.store.block_mut(node_id)?)?;
            source.split_to(mid, &mut target)?
        };
        self.store.block_mut(sibling)?.copy_from_slice(&staged);
        Ok(moved)
    }

    /// Inserts `(child, acc)` at `slot` of the branch at `parent_level`,
    /// splitting full ancestors as needed. Returns the slot the child
    /// finally landed in (within the node `path[parent_level]` then points
    /// to).
    fn insert_child_at(
        &mut self,
        path: &mut TreePath,
        parent_level: usize,
        slot: usize,
        child: BlockId,
        acc: Accumulator,
    ) -> Result<usize> {
        let mut slot = slot;
        loop {
            let parent_id = path.get(parent_level).id;
            let attempt = {
                let mut parent = BranchNodeMut::from_block(self.store.block_mut(parent_id)?)?;
                parent.insert_child(slot, child, acc)
            };
            match attempt {
                Ok(()) => {
                    self.store.ref_block(child)?;
                    return Ok(slot);
                }
                Err(err) if err.downcast_ref::<CapacityExceeded>().is_some() => {
                    let mid = self.split_level(path, parent_level)?;
                    if slot > mid {
                        slot -= mid;
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Removes emptied non-root nodes along the path after a removal.
    fn prune_empty_nodes(&mut self, path: &TreePath) -> Result<()> {
        for level in 0..path.len().saturating_sub(1) {
            let entry = path.get(level);
            let count = match Node::from_block(self.store.block(entry.id)?)? {
                Node::Leaf(leaf) => leaf.entry_count()?,
                Node::Branch(branch) => branch.child_count()?,
            };
            if count > 0 {
                return Ok(());
            }
            let parent_id = path.get(level + 1).id;
            let (removed_id, removed_acc) = {
                let mut parent = BranchNodeMut::from_block(self.store.block_mut(parent_id)?)?;
                parent.remove_child(entry.parent_idx)?
            };
            debug_assert_eq!(removed_id, entry.id);
            debug_assert!(removed_acc.is_zero());
            self.unref_cascade(removed_id)?;
            debug!(id = %entry.id, level, "pruned empty node");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Leaf-to-leaf iteration
    // ------------------------------------------------------------------

    /// Advances the path to the next leaf; `false` at the rightmost leaf.
    pub fn next_leaf(&self, path: &mut TreePath) -> Result<bool> {
        self.step_leaf(path, true)
    }

    /// Moves the path to the previous leaf; `false` at the leftmost leaf.
    pub fn prev_leaf(&self, path: &mut TreePath) -> Result<bool> {
        self.step_leaf(path, false)
    }

    fn step_leaf(&self, path: &mut TreePath, forward: bool) -> Result<bool> {
        // Climb to the first ancestor able to advance, then descend along
        // the near edge of the adjacent subtree.
        let mut level = 1;
        loop {
            if level >= path.len() {
                return Ok(false);
            }
            let branch = BranchNode::from_block(self.store.block(path.get(level).id)?)?;
            let n = branch.child_count()?;
            let slot = path.get(level - 1).parent_idx;
            let next_slot = if forward {
                if slot + 1 < n {
                    Some(slot + 1)
                } else {
                    None
                }
            } else if slot > 0 {
                Some(slot - 1)
            } else {
                None
            };

            if let Some(next_slot) = next_slot {
                let mut id = branch.child_id(next_slot)?;
                path.set(level - 1, PathEntry { id, parent_idx: next_slot });
                for below in (0..level.saturating_sub(1)).rev() {
                    let branch = BranchNode::from_block(self.store.block(id)?)?;
                    let edge = if forward { 0 } else { branch.child_count()? - 1 };
                    id = branch.child_id(edge)?;
                    path.set(below, PathEntry { id, parent_idx: edge });
                }
                return Ok(true);
            }
            level += 1;
        }
    }

    /// Cursor positioned on the first entry.
    pub fn cursor_first(&self) -> Result<Cursor<'_, 's, S>> {
        let mut records: SmallVec<[PathEntry; MAX_TREE_DEPTH]> = SmallVec::new();
        let mut id = self.root_id()?;
        let mut parent_idx = 0usize;
        loop {
            records.push(PathEntry { id, parent_idx });
            match Node::from_block(self.store.block(id)?)? {
                Node::Leaf(_) => break,
                Node::Branch(branch) => {
                    ensure!(branch.child_count()? > 0, "branch {} has no children", id);
                    id = branch.child_id(0)?;
                    parent_idx = 0;
                }
            }
        }
        Ok(Cursor {
            tree: self,
            path: TreePath::from_root_descent(&records),
            idx: 0,
            exhausted: false,
        })
    }

    /// Runs the structural checker over this tree.
    pub fn check(&self, consumer: &mut dyn crate::check::CheckConsumer) -> Result<usize> {
        crate::check::check_tree(&*self.store, self.root_id()?, consumer)
    }

    pub(crate) fn store(&self) -> &S {
        self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut S {
        self.store
    }

    pub(crate) fn branching(&self) -> u16 {
        self.branching
    }
}

/// Releases one reference to the subtree at `root`, removing every block
/// whose count reaches zero. Dropping a snapshot or destroying a container
/// funnels through here.
pub fn release_tree<S: BlockStore>(store: &mut S, root: BlockId) -> Result<()> {
    if !store.unref_block(root)? {
        return Ok(());
    }
    let children: SmallVec<[BlockId; 16]> = match Node::from_block(store.block(root)?)? {
        Node::Branch(branch) => (0..branch.child_count()?)
            .map(|i| branch.child_id(i))
            .collect::<Result<_>>()?,
        Node::Leaf(_) => SmallVec::new(),
    };
    store.remove_block(root)?;
    for child in children {
        release_tree(store, child)?;
    }
    Ok(())
}

/// Forward scan over all entries, walking linked leaf positions via
/// [`Tree::next_leaf`].
pub struct Cursor<'t, 's, S: BlockStore> {
    tree: &'t Tree<'s, S>,
    path: TreePath,
    idx: usize,
    exhausted: bool,
}

impl<'t, 's, S: BlockStore> Cursor<'t, 's, S> {
    /// Returns the next `(payload, weight)` pair, or `None` past the end.
    pub fn next_entry(&mut self) -> Result<Option<(u64, i64)>> {
        loop {
            if self.exhausted {
                return Ok(None);
            }
            let leaf = LeafNode::from_block(self.tree.store.block(self.path.leaf().id)?)?;
            if self.idx < leaf.entry_count()? {
                let out = (leaf.payload(self.idx)?, leaf.weight(self.idx)?);
                self.idx += 1;
                return Ok(Some(out));
            }
            if !self.tree.next_leaf(&mut self.path)? {
                self.exhausted = true;
                return Ok(None);
            }
            self.idx = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    fn new_tree(store: &mut MemStore) -> Tree<'_, MemStore> {
        Tree::create(store, ContainerId(1), 4).unwrap()
    }

    #[test]
    fn insert_and_read_back_small() {
        let mut store = MemStore::new();
        let mut tree = new_tree(&mut store);

        for i in 0..10u64 {
            tree.push(i * 100, 1).unwrap();
        }
        assert_eq!(tree.len().unwrap(), 10);
        assert_eq!(tree.total_weight().unwrap(), 10);
        for i in 0..10u64 {
            assert_eq!(tree.entry(i).unwrap(), (i * 100, 1));
        }
    }

    #[test]
    fn insert_at_front_and_middle() {
        let mut store = MemStore::new();
        let mut tree = new_tree(&mut store);
        tree.insert(0, 2, 1).unwrap();
        tree.insert(0, 1, 1).unwrap();
        tree.insert(2, 4, 1).unwrap();
        tree.insert(2, 3, 1).unwrap();
        let collected: Vec<u64> = (0..4).map(|i| tree.entry(i).unwrap().0).collect();
        assert_eq!(collected, vec![1, 2, 3, 4]);
    }

    #[test]
    fn grows_and_splits_past_one_leaf() {
        let mut store = MemStore::new();
        let mut tree = new_tree(&mut store);

        let count = 3000u64;
        for i in 0..count {
            tree.push(i, 1).unwrap();
        }
        assert_eq!(tree.len().unwrap(), count);

        // Multi-level structure by now.
        let root = tree.root_id().unwrap();
        let node = Node::from_block(tree.store().block(root).unwrap()).unwrap();
        assert!(node.level().unwrap() >= 1);

        for i in (0..count).step_by(371) {
            assert_eq!(tree.entry(i).unwrap(), (i, 1));
        }

        let mut errors = Vec::new();
        let mut consumer = |sev: crate::check::Severity, msg: &str| {
            errors.push(format!("{sev:?}: {msg}"));
        };
        assert_eq!(tree.check(&mut consumer).unwrap(), 0, "{errors:?}");
    }

    #[test]
    fn random_positions_match_vec_model() {
        let mut store = MemStore::new();
        let mut tree = new_tree(&mut store);
        let mut model: Vec<(u64, i64)> = Vec::new();

        let mut state = 0x2545f4914f6cdd1du64;
        let mut rng = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        for step in 0..2000u64 {
            let at = (rng() % (model.len() as u64 + 1)) as usize;
            let weight = (rng() % 9) as i64;
            tree.insert(at as u64, step, weight).unwrap();
            model.insert(at, (step, weight));
        }
        for _ in 0..700 {
            let at = (rng() % (model.len() as u64)) as usize;
            let expected = model.remove(at);
            assert_eq!(tree.remove(at as u64).unwrap(), expected);
        }

        assert_eq!(tree.len().unwrap() as usize, model.len());
        assert_eq!(
            tree.total_weight().unwrap(),
            model.iter().map(|&(_, w)| w).sum::<i64>()
        );
        for (i, &(p, w)) in model.iter().enumerate().step_by(97) {
            assert_eq!(tree.entry(i as u64).unwrap(), (p, w));
        }

        let mut findings = 0usize;
        let mut consumer = |_: crate::check::Severity, _: &str| {
            findings += 1;
        };
        assert_eq!(tree.check(&mut consumer).unwrap(), 0);
    }

    #[test]
    fn remove_shrinks_back_to_root_leaf() {
        let mut store = MemStore::new();
        let mut tree = new_tree(&mut store);
        for i in 0..2000u64 {
            tree.push(i, 1).unwrap();
        }
        for _ in 0..2000 {
            tree.remove(0).unwrap();
        }
        assert!(tree.is_empty().unwrap());

        let root = tree.root_id().unwrap();
        let node = Node::from_block(tree.store().block(root).unwrap()).unwrap();
        assert_eq!(node.level().unwrap(), 0, "root collapses back to a leaf");
    }

    #[test]
    fn weight_searches_through_branches() {
        let mut store = MemStore::new();
        let mut tree = new_tree(&mut store);
        // Inclusive prefix at index i is 2 * (i + 1).
        for i in 0..1000u64 {
            tree.push(i, 2).unwrap();
        }
        let (_, at) = tree.find_weight_ge(2).unwrap().unwrap();
        assert_eq!(at, 0);

        let (path, at) = tree.find_weight_ge(1001).unwrap().unwrap();
        let leaf = LeafNode::from_block(tree.store().block(path.leaf().id).unwrap()).unwrap();
        assert_eq!(leaf.payload(at).unwrap(), 500);

        assert!(tree.find_weight_ge(2000).unwrap().is_some());
        assert!(tree.find_weight_ge(2001).unwrap().is_none());
        assert!(tree.find_weight_le(1).unwrap().is_none());

        let (path, at) = tree.find_weight_le(2).unwrap().unwrap();
        let leaf = LeafNode::from_block(tree.store().block(path.leaf().id).unwrap()).unwrap();
        assert_eq!(leaf.payload(at).unwrap(), 0);
    }

    #[test]
    fn cursor_scans_in_order() {
        let mut store = MemStore::new();
        let mut tree = new_tree(&mut store);
        let count = 2500u64;
        for i in 0..count {
            tree.push(i, 1).unwrap();
        }

        let mut cursor = tree.cursor_first().unwrap();
        let mut seen = 0u64;
        while let Some((payload, weight)) = cursor.next_entry().unwrap() {
            assert_eq!(payload, seen);
            assert_eq!(weight, 1);
            seen += 1;
        }
        assert_eq!(seen, count);
    }

    #[test]
    fn prev_leaf_walks_back_to_start() {
        let mut store = MemStore::new();
        let mut tree = new_tree(&mut store);
        for i in 0..2000u64 {
            tree.push(i, 1).unwrap();
        }

        let (mut path, _) = tree.seek(1999).unwrap();
        let mut leaves = 1usize;
        while tree.prev_leaf(&mut path).unwrap() {
            leaves += 1;
        }
        let leaf = LeafNode::from_block(tree.store().block(path.leaf().id).unwrap()).unwrap();
        assert_eq!(leaf.payload(0).unwrap(), 0, "leftmost leaf starts at entry 0");
        assert!(leaves > 1);
    }
}
