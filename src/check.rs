//! # Structural Checker
//!
//! Full-tree consistency walk used by tests, recovery tooling, and debug
//! assertions. The checker never mutates and never stops at the first
//! problem: every finding is reported to a [`CheckConsumer`] and the walk
//! continues, so one pass paints the whole damage picture.
//!
//! Verified per node:
//!
//! - the block exists in the store and carries a valid packed layout
//! - the header level matches the node's depth (leaves at level 0)
//! - the root flag is set on the root and clear everywhere else
//! - every sum tree's summary cells match its value cells
//! - leaf payload and weight arrays agree on the entry count
//! - each branch slot's stored accumulator equals the recomputed
//!   aggregate of the child subtree
//! - no non-root node is empty

use eyre::Result;
use smallvec::SmallVec;

use crate::alloc::{self, PackedAllocator};
use crate::config::MAX_TREE_DEPTH;
use crate::node::{self, Accumulator, Node};
use crate::store::{BlockId, BlockStore};

/// Weight of a finding. `Error` marks a broken invariant; `Warning` marks
/// something legal but suspicious.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// Sink for checker findings.
pub trait CheckConsumer {
    fn report(&mut self, severity: Severity, message: &str);
}

impl<F: FnMut(Severity, &str)> CheckConsumer for F {
    fn report(&mut self, severity: Severity, message: &str) {
        self(severity, message)
    }
}

/// Walks the tree under `root` and reports findings. Returns the number of
/// `Error`-severity findings.
pub fn check_tree<S: BlockStore>(
    store: &S,
    root: BlockId,
    consumer: &mut dyn CheckConsumer,
) -> Result<usize> {
    let mut walker = Walker {
        store,
        consumer,
        errors: 0,
    };

    if !store.contains_block(root) {
        walker.error(format!("root block {} does not exist", root));
        return Ok(walker.errors);
    }
    let level = match node::header(store.block(root)?) {
        Ok(hdr) => {
            if !hdr.is_root() {
                walker.error(format!("root block {} lacks the root flag", root));
            }
            hdr.level()
        }
        Err(err) => {
            walker.error(format!("root block {}: {}", root, err));
            return Ok(walker.errors);
        }
    };
    if level >= MAX_TREE_DEPTH {
        walker.warning(format!(
            "tree height {} exceeds the supported depth {}",
            level + 1,
            MAX_TREE_DEPTH
        ));
    }

    walker.walk(root, level, true)?;
    Ok(walker.errors)
}

struct Walker<'a, 'c, S: BlockStore> {
    store: &'a S,
    consumer: &'c mut dyn CheckConsumer,
    errors: usize,
}

impl<'a, 'c, S: BlockStore> Walker<'a, 'c, S> {
    fn error(&mut self, message: String) {
        self.errors += 1;
        self.consumer.report(Severity::Error, &message);
    }

    fn warning(&mut self, message: String) {
        self.consumer.report(Severity::Warning, &message);
    }

    /// Checks the subtree under `id` and returns its recomputed aggregate
    /// (zero when the node is unreadable, so ancestors still compare).
    fn walk(&mut self, id: BlockId, expected_level: usize, is_root: bool) -> Result<Accumulator> {
        if !self.store.contains_block(id) {
            self.error(format!("referenced block {} does not exist", id));
            return Ok(Accumulator::default());
        }
        let block = self.store.block(id)?;

        match PackedAllocator::from_block(block) {
            Ok(layout) => {
                if let Err(err) = alloc::validate(&layout) {
                    self.error(format!("block {}: {}", id, err));
                    return Ok(Accumulator::default());
                }
            }
            Err(err) => {
                self.error(format!("block {}: {}", id, err));
                return Ok(Accumulator::default());
            }
        }
        let node = match Node::from_block(block) {
            Ok(node) => node,
            Err(err) => {
                self.error(format!("block {}: {}", id, err));
                return Ok(Accumulator::default());
            }
        };

        let hdr = node::header(block)?;
        if hdr.level() != expected_level {
            self.error(format!(
                "block {} is at depth-level {} but its header says {}",
                id,
                expected_level,
                hdr.level()
            ));
        }
        if hdr.is_root() != is_root {
            self.error(format!(
                "block {}: root flag is {} at a {} position",
                id,
                hdr.is_root(),
                if is_root { "root" } else { "non-root" }
            ));
        }

        match node {
            Node::Leaf(leaf) => {
                self.verify_sumtree(id, "weights", leaf.weights())?;

                let entries = leaf.entry_count()?;
                let payloads = leaf.payload_count()?;
                if entries != payloads {
                    self.error(format!(
                        "leaf {}: {} weights but {} payloads",
                        id, entries, payloads
                    ));
                }
                if entries == 0 && !is_root {
                    self.error(format!("leaf {} is empty but not the root", id));
                }
                leaf.accumulate()
            }
            Node::Branch(branch) => {
                self.verify_sumtree(id, "counts", branch.counts())?;
                self.verify_sumtree(id, "weights", branch.weights())?;

                let n = branch.child_count()?;
                if branch.counts().size()? != n || branch.weights().size()? != n {
                    self.error(format!(
                        "branch {}: {} children but {} count and {} weight cells",
                        id,
                        n,
                        branch.counts().size()?,
                        branch.weights().size()?
                    ));
                }
                if n == 0 {
                    self.error(format!("branch {} has no children", id));
                    return Ok(Accumulator::default());
                }

                let child_level = hdr.level() - 1;
                let mut slots: SmallVec<[(BlockId, Accumulator); 32]> = SmallVec::new();
                for i in 0..n {
                    slots.push((branch.child_id(i)?, branch.child_acc(i)?));
                }

                let mut total = Accumulator::default();
                for (i, (child, stored)) in slots.into_iter().enumerate() {
                    let actual = self.walk(child, child_level, false)?;
                    if stored != actual {
                        self.error(format!(
                            "branch {} slot {}: stored accumulator {} but subtree {} sums to {}",
                            id, i, stored, child, actual
                        ));
                    }
                    total += actual;
                }
                Ok(total)
            }
        }
    }

    fn verify_sumtree(
        &mut self,
        id: BlockId,
        which: &str,
        tree: crate::sumtree::SumTree<'_>,
    ) -> Result<()> {
        let mut messages: Vec<String> = Vec::new();
        tree.verify(|message| messages.push(message))?;
        for message in messages {
            self.error(format!("block {} {} tree: {}", id, which, message));
        }
        Ok(())
    }
}
