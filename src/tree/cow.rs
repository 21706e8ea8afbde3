//! # Copy-on-Write Cloner
//!
//! Turns node mutation into "clone ancestors, rewrite parent pointer,
//! unref the displaced block". The read path of [`Tree::cow_clone_path`]
//! walks top-down (an ancestor must be mutable before its child's pointer
//! can be rewritten), while the effect is applied bottom-up on the way back
//! out of the recursion, matching the ordering guarantees readers rely on:
//! a block reachable from an older root is never field-mutated.
//!
//! Reference-count choreography per cloned node:
//!
//! 1. `clone_block` copies the bytes into the current generation (count 0).
//! 2. Cloning a branch refs every child once — a second parent now points
//!    at them.
//! 3. The clone is linked: ref'd and spliced into its mutable parent (or
//!    installed as root), and the displaced block is unref'd.
//! 4. A displaced block whose count reaches zero is cascaded: its children
//!    are unref'd (step 2's counterpart) and the block removed.

use eyre::{ensure, Result};
use smallvec::SmallVec;
use tracing::debug;

use super::{Tree, TreePath};
use crate::node::{self, BranchNodeMut, Node};
use crate::store::{BlockId, BlockStore};

impl<'s, S: BlockStore> Tree<'s, S> {
    /// A block is mutable iff it was created by the current write
    /// generation.
    pub(super) fn is_mutable(&self, id: BlockId) -> Result<bool> {
        Ok(self.store.block_generation(id)? == self.store.generation())
    }

    /// Ensures every node from the root down to `level` is mutable,
    /// cloning immutable ancestors first, then `level` itself. Path
    /// entries are rewritten to the clone ids.
    pub(super) fn cow_clone_path(&mut self, path: &mut TreePath, level: usize) -> Result<()> {
        if level >= path.len() || self.is_mutable(path.get(level).id)? {
            // A mutable node was linked into a mutable parent when it was
            // created, so the chain above it needs no work.
            return Ok(());
        }

        self.cow_clone_path(path, level + 1)?;

        let old_id = path.get(level).id;
        let new_id = self.clone_node(old_id)?;

        if level + 1 < path.len() {
            self.store.ref_block(new_id)?;
            let parent_id = path.get(level + 1).id;
            let slot = path.get(level).parent_idx;
            let displaced = {
                let mut parent = BranchNodeMut::from_block(self.store.block_mut(parent_id)?)?;
                parent.set_child_id(slot, new_id)?
            };
            debug_assert_eq!(displaced, old_id);
            self.unref_cascade(displaced)?;
        } else {
            self.install_root(new_id)?;
        }

        path.set_id(level, new_id);
        debug!(%old_id, %new_id, level, "cloned node for write");
        Ok(())
    }

    /// Clones one node into the current generation. Branch clones ref all
    /// their children, since those children gain a parent.
    pub(super) fn clone_node(&mut self, id: BlockId) -> Result<BlockId> {
        let new_id = self.store.clone_block(id)?;
        let children = self.child_ids(new_id)?;
        for child in children {
            self.store.ref_block(child)?;
        }
        Ok(new_id)
    }

    /// Refs `new_root`, swaps the container's root pointer to it, and
    /// unrefs the displaced root. The pointer swap is the commit point.
    pub(crate) fn install_root(&mut self, new_root: BlockId) -> Result<()> {
        self.store.ref_block(new_root)?;
        let old = self.store.set_root(self.ctr, Some(new_root))?;
        if let Some(old) = old {
            self.unref_cascade(old)?;
        }
        Ok(())
    }

    /// Unrefs a block; when the count reaches zero the block's children are
    /// unref'd in turn and the block is removed.
    pub(super) fn unref_cascade(&mut self, id: BlockId) -> Result<()> {
        super::release_tree(&mut *self.store, id)
    }

    fn child_ids(&self, id: BlockId) -> Result<SmallVec<[BlockId; 16]>> {
        let mut children = SmallVec::new();
        if let Node::Branch(branch) = Node::from_block(self.store.block(id)?)? {
            for i in 0..branch.child_count()? {
                children.push(branch.child_id(i)?);
            }
        }
        Ok(children)
    }

    /// Adds a new branch root above the current root (height + 1). The
    /// path must already be fully cloned. Used when the root splits.
    pub(super) fn grow_root(&mut self, path: &mut TreePath) -> Result<()> {
        let old_root = path.root().id;
        let old_acc = Node::from_block(self.store.block(old_root)?)?.accumulate()?;
        let old_level = Node::from_block(self.store.block(old_root)?)?.level()?;

        let new_root = self.store.create_block()?;
        {
            let block = self.store.block_mut(new_root)?;
            let mut branch = BranchNodeMut::init(block, old_level + 1, self.branching)?;
            branch.header_mut()?.set_root(true);
            branch.insert_child(0, old_root, old_acc)?;
        }
        // The new root's child slot holds a reference of its own.
        self.store.ref_block(old_root)?;
        self.set_root_flag(old_root, false)?;
        self.install_root(new_root)?;

        path.push_root(new_root);
        debug!(%old_root, %new_root, level = old_level + 1, "grew root");
        Ok(())
    }

    /// Collapses single-child branch roots: the lone child is promoted to
    /// root (height - 1). Promotion changes the child's role, so the child
    /// is cloned if it is not already mutable.
    pub(super) fn shrink_root(&mut self) -> Result<()> {
        loop {
            let Some(root) = self.store.get_root(self.ctr)? else {
                return Ok(());
            };
            let children = match Node::from_block(self.store.block(root)?)? {
                Node::Branch(branch) => {
                    let n = branch.child_count()?;
                    if n == 1 {
                        Some(branch.child_id(0)?)
                    } else if n == 0 {
                        None
                    } else {
                        return Ok(());
                    }
                }
                Node::Leaf(_) => return Ok(()),
            };

            let Some(child) = children else {
                // Every subtree was pruned away; restart from an empty
                // leaf root.
                let leaf = self.store.create_block()?;
                {
                    let block = self.store.block_mut(leaf)?;
                    let mut node = node::LeafNodeMut::init(block, self.branching)?;
                    node.header_mut()?.set_root(true);
                }
                self.install_root(leaf)?;
                debug!(old_root = %root, new_root = %leaf, "reset empty tree root");
                return Ok(());
            };

            let promoted = if self.is_mutable(child)? {
                child
            } else {
                // Splice the clone under the (mutable) old root so the
                // displaced original is released through the usual cascade.
                let clone = self.clone_node(child)?;
                self.store.ref_block(clone)?;
                let displaced = {
                    let mut root_node = BranchNodeMut::from_block(self.store.block_mut(root)?)?;
                    root_node.set_child_id(0, clone)?
                };
                self.unref_cascade(displaced)?;
                clone
            };

            self.set_root_flag(promoted, true)?;
            self.install_root(promoted)?;
            debug!(old_root = %root, new_root = %promoted, "shrank root");
        }
    }

    pub(crate) fn set_root_flag(&mut self, id: BlockId, root: bool) -> Result<()> {
        ensure!(self.is_mutable(id)?, "root flag write on immutable block {}", id);
        let block = self.store.block_mut(id)?;
        let is_leaf = node::header(block)?.is_leaf();
        if is_leaf {
            crate::node::LeafNodeMut::from_block(block)?
                .header_mut()?
                .set_root(root);
        } else {
            BranchNodeMut::from_block(block)?.header_mut()?.set_root(root);
        }
        Ok(())
    }
}
