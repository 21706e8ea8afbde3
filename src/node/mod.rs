//! # Node Model
//!
//! A tree node is one block whose segments are laid out by the packed
//! allocator. Two node shapes exist:
//!
//! - **Leaf** (level 0): holds user entries — a weight sum tree plus a
//!   payload array, one `u64` payload per entry.
//! - **Branch** (level ≥ 1): holds child block ids plus one aggregated
//!   accumulator per child, stored column-wise as sum trees so descent by
//!   position or by cumulative weight is a single order-statistics search.
//!
//! ## Segment Directories
//!
//! ```text
//! Leaf block                      Branch block
//! ----------------------------    ----------------------------
//! 0  NodeHeader                   0  NodeHeader
//! 1  weight sum tree meta         1  child id array (U64)
//! 2  weight sum tree index        2  count sum tree meta
//! 3  weight sum tree values       3  count sum tree index
//! 4  payload array (U64)          4  count sum tree values
//!                                 5  weight sum tree meta
//!                                 6  weight sum tree index
//!                                 7  weight sum tree values
//! ```
//!
//! ## Consistency Rule
//!
//! Every structural mutation (insert, remove, split, merge) reindexes the
//! affected sum trees before returning, so a node is always queryable after
//! any public mutating method succeeds. Methods that fail with
//! `CapacityExceeded` roll their partial segment growth back first.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub};

use eyre::{bail, ensure, Result};
use zerocopy::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::alloc::{PackedAllocator, PackedAllocatorMut, KIND_NODE_HEADER};
use crate::config::ACC_COLUMNS;

mod branch;
mod leaf;

pub use branch::{BranchNode, BranchNodeMut};
pub use leaf::{LeafNode, LeafNodeMut};

/// Accumulator column holding entry counts.
pub const COL_COUNT: usize = 0;
/// Accumulator column holding entry weights.
pub const COL_WEIGHT: usize = 1;

/// Directory slot of the node header in every block.
pub const HEADER_SLOT: usize = 0;

const NODE_TYPE_BRANCH: u8 = 1;
const NODE_TYPE_LEAF: u8 = 2;

const FLAG_ROOT: u8 = 0x01;

/// Fixed tuple of aggregate values describing one subtree: entry count and
/// weight sum. Stored once per child slot in branch nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Accumulator(pub [i64; ACC_COLUMNS]);

impl Accumulator {
    pub fn new(count: i64, weight: i64) -> Self {
        Self([count, weight])
    }

    pub fn count(&self) -> i64 {
        self.0[COL_COUNT]
    }

    pub fn weight(&self) -> i64 {
        self.0[COL_WEIGHT]
    }

    /// True when every column is zero; upward delta propagation stops here.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&v| v == 0)
    }
}

impl Add for Accumulator {
    type Output = Accumulator;

    fn add(mut self, rhs: Accumulator) -> Accumulator {
        self += rhs;
        self
    }
}

impl AddAssign for Accumulator {
    fn add_assign(&mut self, rhs: Accumulator) {
        for (a, b) in self.0.iter_mut().zip(rhs.0) {
            *a += b;
        }
    }
}

impl Sub for Accumulator {
    type Output = Accumulator;

    fn sub(self, rhs: Accumulator) -> Accumulator {
        self + (-rhs)
    }
}

impl Neg for Accumulator {
    type Output = Accumulator;

    fn neg(mut self) -> Accumulator {
        for v in &mut self.0 {
            *v = -*v;
        }
        self
    }
}

impl fmt::Display for Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(count {}, weight {})", self.count(), self.weight())
    }
}

/// Per-block node metadata, stored in directory slot 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NodeHeader {
    node_type: u8,
    flags: u8,
    level: U16,
    reserved: [u8; 4],
}

impl NodeHeader {
    pub fn is_leaf(&self) -> bool {
        self.node_type == NODE_TYPE_LEAF
    }

    pub fn is_branch(&self) -> bool {
        self.node_type == NODE_TYPE_BRANCH
    }

    pub fn is_root(&self) -> bool {
        self.flags & FLAG_ROOT != 0
    }

    pub fn set_root(&mut self, root: bool) {
        if root {
            self.flags |= FLAG_ROOT;
        } else {
            self.flags &= !FLAG_ROOT;
        }
    }

    pub fn level(&self) -> usize {
        self.level.get() as usize
    }

    pub fn set_level(&mut self, level: usize) {
        self.level = U16::new(level as u16);
    }
}

/// Reads the header of any initialized node block.
pub fn header(block: &[u8]) -> Result<&NodeHeader> {
    let alloc = PackedAllocator::from_block(block)?;
    let hdr = alloc.get::<NodeHeader>(HEADER_SLOT)?;
    ensure!(
        hdr.is_leaf() || hdr.is_branch(),
        "block has unknown node type {}",
        hdr.node_type
    );
    ensure!(
        hdr.is_leaf() == (hdr.level() == 0),
        "node level {} disagrees with type tag {}",
        hdr.level(),
        hdr.node_type
    );
    Ok(hdr)
}

fn init_header(
    alloc: &mut PackedAllocatorMut<'_>,
    node_type: u8,
    level: usize,
) -> Result<()> {
    alloc.allocate(HEADER_SLOT, KIND_NODE_HEADER, size_of::<NodeHeader>())?;
    let hdr = alloc.get_mut::<NodeHeader>(HEADER_SLOT)?;
    hdr.node_type = node_type;
    hdr.flags = 0;
    hdr.set_level(level);
    Ok(())
}

/// Either node shape, resolved from a block's header. The closed set of
/// variants replaces per-node-type dispatch: callers match once and use the
/// shape-specific view.
pub enum Node<'a> {
    Leaf(LeafNode<'a>),
    Branch(BranchNode<'a>),
}

impl<'a> Node<'a> {
    pub fn from_block(block: &'a [u8]) -> Result<Self> {
        let hdr = header(block)?;
        if hdr.is_leaf() {
            Ok(Node::Leaf(LeafNode::from_block(block)?))
        } else {
            Ok(Node::Branch(BranchNode::from_block(block)?))
        }
    }

    pub fn level(&self) -> Result<usize> {
        match self {
            Node::Leaf(n) => n.header().map(NodeHeader::level),
            Node::Branch(n) => n.header().map(NodeHeader::level),
        }
    }

    /// Aggregate of this node's direct contents (leaf entries or child
    /// accumulators).
    pub fn accumulate(&self) -> Result<Accumulator> {
        match self {
            Node::Leaf(n) => n.accumulate(),
            Node::Branch(n) => n.accumulate(),
        }
    }

    pub fn as_branch(&self) -> Result<&BranchNode<'a>> {
        match self {
            Node::Branch(n) => Ok(n),
            Node::Leaf(_) => bail!("expected a branch node, found a leaf"),
        }
    }

    pub fn as_leaf(&self) -> Result<&LeafNode<'a>> {
        match self {
            Node::Leaf(n) => Ok(n),
            Node::Branch(_) => bail!("expected a leaf node, found a branch"),
        }
    }
}
