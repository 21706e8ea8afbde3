//! # Bulk Loader
//!
//! Builds a tree bottom-up from pre-filled leaves instead of inserting
//! entry by entry. The caller formats leaf blocks in the current write
//! generation and hands them over through a [`LeafProvider`]; the loader
//! stacks branch levels on top and installs the finished root in one swap.
//!
//! Branch capacity is discovered by construction: children are appended
//! until the block reports `CapacityExceeded`, at which point the provider
//! is rolled back to the last checkpoint and the partially consumed child
//! subtree is dismantled, leaving its leaves for the next sibling. Leaves
//! are never copied or rebuilt.

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;
use tracing::debug;

use crate::config::BRANCH_MAX_CHILDREN;
use crate::error::CapacityExceeded;
use crate::node::{BranchNode, BranchNodeMut, Node};
use crate::store::{BlockId, BlockStore};
use crate::tree::Tree;

/// Source of pre-built leaf blocks for one bulk load.
///
/// `checkpoint`/`rollback` let the loader un-consume leaves when a branch
/// fills up mid-subtree; a provider must reproduce the same leaves after a
/// rollback.
pub trait LeafProvider {
    /// Hands out the next leaf block, or `None` when exhausted.
    fn next_leaf(&mut self) -> Result<Option<BlockId>>;

    /// Number of leaves not yet handed out.
    fn remaining(&self) -> u64;

    /// Opaque position marker for [`LeafProvider::rollback`].
    fn checkpoint(&self) -> u64;

    /// Rewinds to a marker previously returned by `checkpoint`.
    fn rollback(&mut self, mark: u64) -> Result<()>;
}

/// Provider over an in-order list of leaf block ids.
pub struct LeafListProvider {
    leaves: Vec<BlockId>,
    cursor: usize,
}

impl LeafListProvider {
    pub fn new(leaves: Vec<BlockId>) -> Self {
        Self { leaves, cursor: 0 }
    }
}

impl LeafProvider for LeafListProvider {
    fn next_leaf(&mut self) -> Result<Option<BlockId>> {
        match self.leaves.get(self.cursor) {
            Some(&id) => {
                self.cursor += 1;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    fn remaining(&self) -> u64 {
        (self.leaves.len() - self.cursor) as u64
    }

    fn checkpoint(&self) -> u64 {
        self.cursor as u64
    }

    fn rollback(&mut self, mark: u64) -> Result<()> {
        ensure!(
            mark as usize <= self.leaves.len(),
            "rollback mark {} past the end ({})",
            mark,
            self.leaves.len()
        );
        self.cursor = mark as usize;
        Ok(())
    }
}

/// Smallest height whose subtree capacity covers `leaves`.
fn required_height(leaves: u64) -> usize {
    let fanout = BRANCH_MAX_CHILDREN as u64;
    let mut level = 0;
    let mut capacity = 1u64;
    while capacity < leaves {
        capacity = capacity.saturating_mul(fanout);
        level += 1;
    }
    level
}

impl<'s, S: BlockStore> Tree<'s, S> {
    /// Replaces this empty tree's contents with the provider's leaves.
    /// All provider leaves must be blocks of the current write generation,
    /// formatted as leaf nodes, in final entry order.
    pub fn bulk_load<P: LeafProvider>(&mut self, provider: &mut P) -> Result<()> {
        ensure!(self.is_empty()?, "bulk load requires an empty tree");
        let leaves = provider.remaining();
        if leaves == 0 {
            return Ok(());
        }

        let height = required_height(leaves);
        let Some(root) = self.build_subtree(provider, height)? else {
            bail!("bulk load produced no root for {} leaves", leaves);
        };
        ensure!(
            provider.remaining() == 0,
            "bulk load left {} leaves unplaced",
            provider.remaining()
        );

        self.set_root_flag(root, true)?;
        self.install_root(root)?;
        debug!(%root, leaves, height, "bulk load complete");
        Ok(())
    }

    /// Builds one subtree of the given height, consuming provider leaves
    /// until the subtree is full or the provider runs out.
    fn build_subtree<P: LeafProvider>(
        &mut self,
        provider: &mut P,
        level: usize,
    ) -> Result<Option<BlockId>> {
        if provider.remaining() == 0 {
            return Ok(None);
        }
        if level == 0 {
            return provider.next_leaf();
        }

        let branch_id = self.store.create_block()?;
        {
            let block = self.store.block_mut(branch_id)?;
            BranchNodeMut::init(block, level, self.branching)?;
        }

        let mut filled = 0usize;
        while filled < BRANCH_MAX_CHILDREN {
            let mark = provider.checkpoint();
            let Some(child) = self.build_subtree(provider, level - 1)? else {
                break;
            };
            let acc = Node::from_block(self.store.block(child)?)?.accumulate()?;
            let attempt = {
                let mut branch = BranchNodeMut::from_block(self.store.block_mut(branch_id)?)?;
                branch.insert_child(filled, child, acc)
            };
            match attempt {
                Ok(()) => {
                    self.store.ref_block(child)?;
                    filled += 1;
                }
                Err(err) if err.downcast_ref::<CapacityExceeded>().is_some() => {
                    provider.rollback(mark)?;
                    self.dismantle_subtree(child, level - 1)?;
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        if filled == 0 {
            self.store.remove_block(branch_id)?;
            return Ok(None);
        }
        Ok(Some(branch_id))
    }

    /// Tears down a partially built subtree skeleton. Branch blocks are
    /// removed; leaves stay alive for the provider to hand out again.
    fn dismantle_subtree(&mut self, id: BlockId, level: usize) -> Result<()> {
        if level == 0 {
            return Ok(());
        }
        let children: SmallVec<[BlockId; 32]> = {
            let branch = BranchNode::from_block(self.store.block(id)?)?;
            (0..branch.child_count()?)
                .map(|i| branch.child_id(i))
                .collect::<Result<_>>()?
        };
        for child in children {
            self.store.unref_block(child)?;
            self.dismantle_subtree(child, level - 1)?;
        }
        self.store.remove_block(id)?;
        Ok(())
    }
}
