//! # Leaf Nodes
//!
//! A leaf stores the tree's actual entries: a weight per entry (indexed by
//! the weight sum tree so cumulative-weight searches stay logarithmic) and
//! an opaque `u64` payload per entry. Payloads are whatever the container
//! built on top of the engine encodes into them — typically a key, an
//! offset, or a value-store handle.
//!
//! All reads are zero-copy views into the block. Mutations grow the payload
//! array first and the sum tree second, rolling the first step back if the
//! second fails, so a failed insert leaves the leaf byte-identical.

use eyre::{ensure, Result};
use zerocopy::little_endian::U64;

use super::{init_header, Accumulator, NodeHeader, HEADER_SLOT, NODE_TYPE_LEAF};
use crate::alloc::{PackedAllocator, PackedAllocatorMut, KIND_PAYLOAD};
use crate::config::LEAF_SEGMENTS;
use crate::sumtree::{FindResult, SumTree, SumTreeMut};

/// Base slot of the weight sum tree.
const WEIGHTS_BASE: usize = 1;
/// Slot of the payload array.
const PAYLOAD_SLOT: usize = 4;

/// Read-only leaf view.
#[derive(Clone, Copy)]
pub struct LeafNode<'a> {
    alloc: PackedAllocator<'a>,
}

/// Mutable leaf view.
pub struct LeafNodeMut<'a> {
    alloc: PackedAllocatorMut<'a>,
}

impl<'a> LeafNode<'a> {
    pub fn from_block(block: &'a [u8]) -> Result<Self> {
        let alloc = PackedAllocator::from_block(block)?;
        let hdr = alloc.get::<NodeHeader>(HEADER_SLOT)?;
        ensure!(hdr.is_leaf(), "block is not a leaf node");
        Ok(Self { alloc })
    }

    pub fn header(&self) -> Result<&NodeHeader> {
        self.alloc.get::<NodeHeader>(HEADER_SLOT)
    }

    pub fn entry_count(&self) -> Result<usize> {
        self.weights().size()
    }

    /// Weight sum tree over the entries.
    pub fn weights(&self) -> SumTree<'a> {
        SumTree::new(self.alloc, WEIGHTS_BASE)
    }

    pub fn weight(&self, idx: usize) -> Result<i64> {
        self.weights().value(idx)
    }

    /// Length of the payload array. Always equals `entry_count` in a
    /// well-formed leaf; the checker compares them.
    pub fn payload_count(&self) -> Result<usize> {
        Ok(self.alloc.length(PAYLOAD_SLOT)? / size_of::<U64>())
    }

    pub fn payload(&self, idx: usize) -> Result<u64> {
        let payloads = self.alloc.slice::<U64>(PAYLOAD_SLOT)?;
        ensure!(
            idx < payloads.len(),
            "payload index {} out of range ({})",
            idx,
            payloads.len()
        );
        Ok(payloads[idx].get())
    }

    /// Locates the entry covering cumulative weight `target` (first entry
    /// whose inclusive weight prefix reaches it).
    pub fn find_weight_ge(&self, target: i64) -> Result<FindResult> {
        self.weights().find_ge(target)
    }

    pub fn find_weight_gt(&self, target: i64) -> Result<FindResult> {
        self.weights().find_gt(target)
    }

    /// Aggregate of all entries in this leaf.
    pub fn accumulate(&self) -> Result<Accumulator> {
        let weights = self.weights();
        let n = weights.size()?;
        Ok(Accumulator::new(n as i64, weights.sum(0, n)?))
    }
}

impl<'a> LeafNodeMut<'a> {
    /// Formats `block` as an empty leaf with the given sum tree branching
    /// factor.
    pub fn init(block: &'a mut [u8], branching: u16) -> Result<Self> {
        let mut alloc = PackedAllocatorMut::init(block, LEAF_SEGMENTS)?;
        init_header(&mut alloc, NODE_TYPE_LEAF, 0)?;
        SumTreeMut::init(&mut alloc, WEIGHTS_BASE, branching)?;
        alloc.allocate(PAYLOAD_SLOT, KIND_PAYLOAD, 0)?;
        Ok(Self { alloc })
    }

    pub fn from_block(block: &'a mut [u8]) -> Result<Self> {
        let alloc = PackedAllocatorMut::from_block(block)?;
        let hdr = alloc.get::<NodeHeader>(HEADER_SLOT)?;
        ensure!(hdr.is_leaf(), "block is not a leaf node");
        Ok(Self { alloc })
    }

    /// Read-only view borrowing from this one.
    pub fn reader(&self) -> LeafNode<'_> {
        LeafNode {
            alloc: self.alloc.reader(),
        }
    }

    pub fn header_mut(&mut self) -> Result<&mut NodeHeader> {
        self.alloc.get_mut::<NodeHeader>(HEADER_SLOT)
    }

    pub fn entry_count(&self) -> Result<usize> {
        self.reader().entry_count()
    }

    fn weights_mut(&mut self) -> SumTreeMut<'a, '_> {
        SumTreeMut::new(&mut self.alloc, WEIGHTS_BASE)
    }

    /// Inserts an entry at `at`. Fails with `CapacityExceeded` (leaf left
    /// unchanged) when the block is full; the caller splits and retries.
    pub fn insert_entry(&mut self, at: usize, payload: u64, weight: i64) -> Result<()> {
        let n = self.entry_count()?;
        ensure!(at <= n, "insert position {} out of range ({})", at, n);

        let payload_len = self.alloc.length(PAYLOAD_SLOT)?;
        self.alloc
            .resize(PAYLOAD_SLOT, payload_len + size_of::<U64>())?;

        if let Err(err) = self.weights_mut().insert_space(at, 1) {
            self.alloc.resize(PAYLOAD_SLOT, payload_len).ok();
            return Err(err);
        }

        {
            let payloads = self.alloc.slice_mut::<U64>(PAYLOAD_SLOT)?;
            payloads.copy_within(at..n, at + 1);
            payloads[at] = U64::new(payload);
        }

        let mut weights = self.weights_mut();
        weights.set_value(at, weight)?;
        weights.reindex_range(at, at + 1)
    }

    /// Removes the entry at `at`, returning its payload and weight.
    pub fn remove_entry(&mut self, at: usize) -> Result<(u64, i64)> {
        let n = self.entry_count()?;
        ensure!(at < n, "remove position {} out of range ({})", at, n);

        let weight = self.reader().weight(at)?;
        let payload = self.reader().payload(at)?;

        {
            let payloads = self.alloc.slice_mut::<U64>(PAYLOAD_SLOT)?;
            payloads.copy_within(at + 1..n, at);
        }
        self.alloc
            .resize(PAYLOAD_SLOT, (n - 1) * size_of::<U64>())?;
        self.weights_mut().remove_space(at, 1)?;

        Ok((payload, weight))
    }

    /// Moves entries `[mid, count)` into `target`, an empty leaf of the
    /// same shape. Returns the accumulator of the moved entries.
    pub fn split_to(&mut self, mid: usize, target: &mut LeafNodeMut<'_>) -> Result<Accumulator> {
        let n = self.entry_count()?;
        ensure!(mid <= n, "split point {} out of range ({})", mid, n);
        ensure!(
            target.entry_count()? == 0,
            "split target leaf is not empty"
        );
        let moving = n - mid;

        target
            .alloc
            .resize(PAYLOAD_SLOT, moving * size_of::<U64>())?;
        target.weights_mut().insert_space(0, moving)?;

        for i in 0..moving {
            let payload = self.reader().payload(mid + i)?;
            let weight = self.reader().weight(mid + i)?;
            let payloads = target.alloc.slice_mut::<U64>(PAYLOAD_SLOT)?;
            payloads[i] = U64::new(payload);
            target.weights_mut().set_value(i, weight)?;
        }
        target.weights_mut().reindex()?;

        let moved = Accumulator::new(
            moving as i64,
            self.reader().weights().sum(mid, n)?,
        );

        self.alloc.resize(PAYLOAD_SLOT, mid * size_of::<U64>())?;
        self.weights_mut().remove_space(mid, moving)?;

        Ok(moved)
    }

    /// Appends every entry of `source` to this leaf (inverse of split).
    /// Fails with `CapacityExceeded`, leaving this leaf unchanged, when the
    /// combined contents do not fit.
    pub fn merge_from(&mut self, source: LeafNode<'_>) -> Result<Accumulator> {
        let n = self.entry_count()?;
        let extra = source.entry_count()?;

        let payload_len = self.alloc.length(PAYLOAD_SLOT)?;
        self.alloc
            .resize(PAYLOAD_SLOT, payload_len + extra * size_of::<U64>())?;
        if let Err(err) = self.weights_mut().insert_space(n, extra) {
            self.alloc.resize(PAYLOAD_SLOT, payload_len).ok();
            return Err(err);
        }

        for i in 0..extra {
            let payloads = self.alloc.slice_mut::<U64>(PAYLOAD_SLOT)?;
            payloads[n + i] = U64::new(source.payload(i)?);
            self.weights_mut().set_value(n + i, source.weight(i)?)?;
        }
        self.weights_mut().reindex()?;

        source.accumulate()
    }
}
