//! # Branch Nodes
//!
//! A branch holds child block ids and, per child, the accumulator of that
//! child's whole subtree. Accumulators are stored column-wise: one sum tree
//! for entry counts, one for weights. Descent queries are therefore plain
//! order-statistics searches over the relevant column, and the parent-side
//! aggregate of the node is a single `sum(0, n)` per column.
//!
//! The child-id array occupies the slot immediately after the header;
//! resizing it shifts the sum tree payloads behind it, which the packed
//! allocator handles in one pass.

use eyre::{ensure, Result};
use zerocopy::little_endian::U64;

use super::{init_header, Accumulator, NodeHeader, HEADER_SLOT, NODE_TYPE_BRANCH};
use crate::alloc::{PackedAllocator, PackedAllocatorMut, KIND_CHILD_IDS};
use crate::config::BRANCH_SEGMENTS;
use crate::store::BlockId;
use crate::sumtree::{FindResult, SumTree, SumTreeMut};

/// Slot of the child block-id array.
const CHILD_IDS_SLOT: usize = 1;
/// Base slot of the count sum tree.
const COUNTS_BASE: usize = 2;
/// Base slot of the weight sum tree.
const WEIGHTS_BASE: usize = 5;

/// Read-only branch view.
#[derive(Clone, Copy)]
pub struct BranchNode<'a> {
    alloc: PackedAllocator<'a>,
}

/// Mutable branch view.
pub struct BranchNodeMut<'a> {
    alloc: PackedAllocatorMut<'a>,
}

impl<'a> BranchNode<'a> {
    pub fn from_block(block: &'a [u8]) -> Result<Self> {
        let alloc = PackedAllocator::from_block(block)?;
        let hdr = alloc.get::<NodeHeader>(HEADER_SLOT)?;
        ensure!(hdr.is_branch(), "block is not a branch node");
        Ok(Self { alloc })
    }

    pub fn header(&self) -> Result<&NodeHeader> {
        self.alloc.get::<NodeHeader>(HEADER_SLOT)
    }

    pub fn child_count(&self) -> Result<usize> {
        Ok(self.alloc.length(CHILD_IDS_SLOT)? / size_of::<U64>())
    }

    pub fn child_id(&self, idx: usize) -> Result<BlockId> {
        let ids = self.alloc.slice::<U64>(CHILD_IDS_SLOT)?;
        ensure!(idx < ids.len(), "child index {} out of range ({})", idx, ids.len());
        Ok(BlockId(ids[idx].get()))
    }

    /// Accumulator stored for child `idx`.
    pub fn child_acc(&self, idx: usize) -> Result<Accumulator> {
        Ok(Accumulator::new(
            self.counts().value(idx)?,
            self.weights().value(idx)?,
        ))
    }

    /// Count sum tree (accumulator column 0).
    pub fn counts(&self) -> SumTree<'a> {
        SumTree::new(self.alloc, COUNTS_BASE)
    }

    /// Weight sum tree (accumulator column 1).
    pub fn weights(&self) -> SumTree<'a> {
        SumTree::new(self.alloc, WEIGHTS_BASE)
    }

    /// Child covering the 0-based entry position `pos`; `idx == n` when
    /// `pos` is past the subtree. `prefix` is the entry count before the
    /// returned child.
    pub fn find_child_by_pos(&self, pos: i64) -> Result<FindResult> {
        self.counts().find_gt(pos)
    }

    /// First child whose inclusive cumulative weight reaches `target`.
    pub fn find_child_by_weight_ge(&self, target: i64) -> Result<FindResult> {
        self.weights().find_ge(target)
    }

    /// First child whose inclusive cumulative weight exceeds `target`.
    pub fn find_child_by_weight_gt(&self, target: i64) -> Result<FindResult> {
        self.weights().find_gt(target)
    }

    /// Aggregate over all children.
    pub fn accumulate(&self) -> Result<Accumulator> {
        let n = self.child_count()?;
        Ok(Accumulator::new(
            self.counts().sum(0, n)?,
            self.weights().sum(0, n)?,
        ))
    }
}

impl<'a> BranchNodeMut<'a> {
    /// Formats `block` as an empty branch at `level` (must be ≥ 1).
    pub fn init(block: &'a mut [u8], level: usize, branching: u16) -> Result<Self> {
        ensure!(level >= 1, "branch nodes live at level 1 and above");
        let mut alloc = PackedAllocatorMut::init(block, BRANCH_SEGMENTS)?;
        init_header(&mut alloc, NODE_TYPE_BRANCH, level)?;
        alloc.allocate(CHILD_IDS_SLOT, KIND_CHILD_IDS, 0)?;
        SumTreeMut::init(&mut alloc, COUNTS_BASE, branching)?;
        SumTreeMut::init(&mut alloc, WEIGHTS_BASE, branching)?;
        Ok(Self { alloc })
    }

    pub fn from_block(block: &'a mut [u8]) -> Result<Self> {
        let alloc = PackedAllocatorMut::from_block(block)?;
        let hdr = alloc.get::<NodeHeader>(HEADER_SLOT)?;
        ensure!(hdr.is_branch(), "block is not a branch node");
        Ok(Self { alloc })
    }

    /// Read-only view borrowing from this one.
    pub fn reader(&self) -> BranchNode<'_> {
        BranchNode {
            alloc: self.alloc.reader(),
        }
    }

    pub fn header_mut(&mut self) -> Result<&mut NodeHeader> {
        self.alloc.get_mut::<NodeHeader>(HEADER_SLOT)
    }

    pub fn child_count(&self) -> Result<usize> {
        self.reader().child_count()
    }

    fn counts_mut(&mut self) -> SumTreeMut<'a, '_> {
        SumTreeMut::new(&mut self.alloc, COUNTS_BASE)
    }

    fn weights_mut(&mut self) -> SumTreeMut<'a, '_> {
        SumTreeMut::new(&mut self.alloc, WEIGHTS_BASE)
    }

    /// Inserts a child slot at `at`. Fails with `CapacityExceeded` (branch
    /// left unchanged) when the block is full.
    pub fn insert_child(&mut self, at: usize, id: BlockId, acc: Accumulator) -> Result<()> {
        let n = self.child_count()?;
        ensure!(at <= n, "child position {} out of range ({})", at, n);

        let ids_len = self.alloc.length(CHILD_IDS_SLOT)?;
        self.alloc
            .resize(CHILD_IDS_SLOT, ids_len + size_of::<U64>())?;

        if let Err(err) = self.counts_mut().insert_space(at, 1) {
            self.alloc.resize(CHILD_IDS_SLOT, ids_len).ok();
            return Err(err);
        }
        if let Err(err) = self.weights_mut().insert_space(at, 1) {
            self.counts_mut().remove_space(at, 1).ok();
            self.alloc.resize(CHILD_IDS_SLOT, ids_len).ok();
            return Err(err);
        }

        {
            let ids = self.alloc.slice_mut::<U64>(CHILD_IDS_SLOT)?;
            ids.copy_within(at..n, at + 1);
            ids[at] = U64::new(id.0);
        }

        let mut counts = self.counts_mut();
        counts.set_value(at, acc.count())?;
        counts.reindex_range(at, at + 1)?;
        let mut weights = self.weights_mut();
        weights.set_value(at, acc.weight())?;
        weights.reindex_range(at, at + 1)
    }

    /// Removes the child slot at `at`, returning its id and accumulator.
    pub fn remove_child(&mut self, at: usize) -> Result<(BlockId, Accumulator)> {
        let n = self.child_count()?;
        ensure!(at < n, "child position {} out of range ({})", at, n);

        let id = self.reader().child_id(at)?;
        let acc = self.reader().child_acc(at)?;

        {
            let ids = self.alloc.slice_mut::<U64>(CHILD_IDS_SLOT)?;
            ids.copy_within(at + 1..n, at);
        }
        self.alloc
            .resize(CHILD_IDS_SLOT, (n - 1) * size_of::<U64>())?;
        self.counts_mut().remove_space(at, 1)?;
        self.weights_mut().remove_space(at, 1)?;

        Ok((id, acc))
    }

    /// Rewrites the block id of child `at`, returning the displaced id.
    /// The accumulator is untouched: a COW clone has the same aggregate.
    pub fn set_child_id(&mut self, at: usize, id: BlockId) -> Result<BlockId> {
        let n = self.child_count()?;
        ensure!(at < n, "child position {} out of range ({})", at, n);
        let ids = self.alloc.slice_mut::<U64>(CHILD_IDS_SLOT)?;
        let old = BlockId(ids[at].get());
        ids[at] = U64::new(id.0);
        Ok(old)
    }

    /// Adds `delta` to child `at`'s accumulator, reindexing the covering
    /// summary cells. This is the upward propagation step of a mutation.
    pub fn add_to_child(&mut self, at: usize, delta: Accumulator) -> Result<()> {
        let n = self.child_count()?;
        ensure!(at < n, "child position {} out of range ({})", at, n);
        self.counts_mut().add_value(at, delta.count())?;
        self.weights_mut().add_value(at, delta.weight())
    }

    /// Moves children `[mid, count)` into `target`, an empty branch of the
    /// same level. Returns the accumulator of the moved subtrees.
    pub fn split_to(&mut self, mid: usize, target: &mut BranchNodeMut<'_>) -> Result<Accumulator> {
        let n = self.child_count()?;
        ensure!(mid <= n, "split point {} out of range ({})", mid, n);
        ensure!(target.child_count()? == 0, "split target branch is not empty");

        let mut moved = Accumulator::default();
        for i in mid..n {
            let id = self.reader().child_id(i)?;
            let acc = self.reader().child_acc(i)?;
            target.insert_child(i - mid, id, acc)?;
            moved += acc;
        }
        for i in (mid..n).rev() {
            self.remove_child(i)?;
        }
        Ok(moved)
    }

    /// Appends every child of `source` to this branch (inverse of split).
    /// Fails with `CapacityExceeded`, leaving this branch unchanged, when
    /// the combined children do not fit.
    pub fn merge_from(&mut self, source: BranchNode<'_>) -> Result<Accumulator> {
        let n = self.child_count()?;
        let extra = source.child_count()?;
        let mut absorbed = Accumulator::default();
        for i in 0..extra {
            let id = source.child_id(i)?;
            let acc = source.child_acc(i)?;
            if let Err(err) = self.insert_child(n + i, id, acc) {
                // Unwind the partial append.
                for undo in (n..n + i).rev() {
                    self.remove_child(undo).ok();
                }
                return Err(err);
            }
            absorbed += acc;
        }
        Ok(absorbed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BLOCK_SIZE;

    fn block() -> Vec<u8> {
        vec![0u8; BLOCK_SIZE]
    }

    #[test]
    fn insert_and_query_children() {
        let mut data = block();
        let mut branch = BranchNodeMut::init(&mut data, 1, 4).unwrap();

        branch.insert_child(0, BlockId(10), Accumulator::new(5, 50)).unwrap();
        branch.insert_child(1, BlockId(20), Accumulator::new(3, 30)).unwrap();
        branch.insert_child(1, BlockId(15), Accumulator::new(2, 20)).unwrap();

        let ro = branch.reader();
        assert_eq!(ro.child_count().unwrap(), 3);
        assert_eq!(ro.child_id(1).unwrap(), BlockId(15));
        assert_eq!(ro.accumulate().unwrap(), Accumulator::new(10, 100));

        // Positions 0..4 live in child 0, 5..6 in child 1, 7..9 in child 2.
        assert_eq!(ro.find_child_by_pos(0).unwrap().idx, 0);
        assert_eq!(ro.find_child_by_pos(4).unwrap().idx, 0);
        assert_eq!(ro.find_child_by_pos(5).unwrap().idx, 1);
        assert_eq!(ro.find_child_by_pos(7).unwrap().idx, 2);
        assert_eq!(ro.find_child_by_pos(10).unwrap().idx, 3);

        assert_eq!(ro.find_child_by_weight_ge(50).unwrap().idx, 0);
        assert_eq!(ro.find_child_by_weight_ge(51).unwrap().idx, 1);
    }

    #[test]
    fn set_child_id_returns_old() {
        let mut data = block();
        let mut branch = BranchNodeMut::init(&mut data, 2, 4).unwrap();
        branch.insert_child(0, BlockId(7), Accumulator::new(1, 1)).unwrap();
        let old = branch.set_child_id(0, BlockId(8)).unwrap();
        assert_eq!(old, BlockId(7));
        assert_eq!(branch.reader().child_id(0).unwrap(), BlockId(8));
        // Accumulator survives the id rewrite.
        assert_eq!(branch.reader().child_acc(0).unwrap(), Accumulator::new(1, 1));
    }

    #[test]
    fn propagation_updates_one_slot() {
        let mut data = block();
        let mut branch = BranchNodeMut::init(&mut data, 1, 4).unwrap();
        for i in 0..8 {
            branch.insert_child(i, BlockId(i as u64 + 1), Accumulator::new(4, 40)).unwrap();
        }
        branch.add_to_child(3, Accumulator::new(1, 7)).unwrap();
        assert_eq!(branch.reader().child_acc(3).unwrap(), Accumulator::new(5, 47));
        assert_eq!(branch.reader().accumulate().unwrap(), Accumulator::new(33, 327));
        assert_eq!(branch.reader().counts().verify(|_| {}).unwrap(), 0);
        assert_eq!(branch.reader().weights().verify(|_| {}).unwrap(), 0);
    }

    #[test]
    fn split_and_merge_round_trip() {
        let mut data = block();
        let mut branch = BranchNodeMut::init(&mut data, 1, 4).unwrap();
        for i in 0..10 {
            branch
                .insert_child(i, BlockId(i as u64 + 1), Accumulator::new(i as i64, 10))
                .unwrap();
        }
        let before = branch.reader().accumulate().unwrap();

        let mut sibling_data = block();
        let mut sibling = BranchNodeMut::init(&mut sibling_data, 1, 4).unwrap();
        let moved = branch.split_to(5, &mut sibling).unwrap();

        assert_eq!(branch.child_count().unwrap(), 5);
        assert_eq!(sibling.child_count().unwrap(), 5);
        assert_eq!(moved, Accumulator::new((5..10).sum::<i64>(), 50));
        assert_eq!(sibling.reader().child_id(0).unwrap(), BlockId(6));

        let absorbed = branch.merge_from(sibling.reader()).unwrap();
        assert_eq!(absorbed, moved);
        assert_eq!(branch.reader().accumulate().unwrap(), before);
        for i in 0..10 {
            assert_eq!(branch.reader().child_id(i).unwrap(), BlockId(i as u64 + 1));
        }
    }
}
