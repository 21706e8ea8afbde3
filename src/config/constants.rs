//! # Configuration Constants
//!
//! Centralized constants for the tree engine. Interdependent values are
//! co-located and their relationships enforced with compile-time assertions.
//!
//! ## Dependency Graph
//!
//! ```text
//! BLOCK_SIZE (8192 bytes)
//!       │
//!       ├─> ALIGNMENT (8 bytes)
//!       │     Every segment payload length is rounded up to ALIGNMENT so
//!       │     that multi-byte little-endian arrays start on round offsets.
//!       │
//!       ├─> LEAF_SEGMENTS / BRANCH_SEGMENTS
//!       │     Fixed directory slot counts; the directory table is sized at
//!       │     block init and never grows.
//!       │
//!       └─> BRANCH_MAX_CHILDREN (fanout bound the bulk loader sizes
//!           subtrees with; incremental inserts are bounded by byte
//!           capacity, which stays below this count in practice)
//!
//! SUMTREE_DEFAULT_BRANCHING (32)
//!       │
//!       └─> Per-segment; stored in the sum tree metadata so blocks remain
//!           self-describing. Tests use smaller factors (4) freely.
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `BLOCK_SIZE % ALIGNMENT == 0` (payload area tiles evenly)
//! 2. `ALIGNMENT.is_power_of_two()` (round-up uses bit masks)
//! 3. `SUMTREE_DEFAULT_BRANCHING >= 2` (a 1-ary summary never terminates)

/// Fixed capacity of every block, in bytes.
pub const BLOCK_SIZE: usize = 8192;

/// Alignment granule for segment payload lengths and offsets.
pub const ALIGNMENT: usize = 8;

/// Directory slots in a leaf block: header, weight sum tree (meta, index,
/// values), payload array.
pub const LEAF_SEGMENTS: usize = 5;

/// Directory slots in a branch block: header, child ids, count sum tree
/// (meta, index, values), weight sum tree (meta, index, values).
pub const BRANCH_SEGMENTS: usize = 8;

/// Default branching factor for sum tree summary hierarchies.
pub const SUMTREE_DEFAULT_BRANCHING: u16 = 32;

/// Fanout bound for bulk-loaded branch nodes; the loader stops filling a
/// branch at this count even if bytes remain, so subtree heights are
/// predictable from the leaf count alone.
pub const BRANCH_MAX_CHILDREN: usize = 256;

/// Maximum supported tree height. Paths are stack-allocated up to this
/// depth. With BRANCH_MAX_CHILDREN = 256 this bound is unreachable in
/// practice (256^8 children).
pub const MAX_TREE_DEPTH: usize = 8;

/// Aggregated columns per branch child slot: column 0 is the entry count,
/// column 1 is the entry weight sum.
pub const ACC_COLUMNS: usize = 2;

const _: () = assert!(
    BLOCK_SIZE % ALIGNMENT == 0,
    "BLOCK_SIZE must be a multiple of ALIGNMENT"
);

const _: () = assert!(ALIGNMENT.is_power_of_two(), "ALIGNMENT must be a power of two");

const _: () = assert!(
    SUMTREE_DEFAULT_BRANCHING >= 2,
    "sum tree branching factor below 2 never converges"
);

const _: () = assert!(
    BRANCH_MAX_CHILDREN >= 4,
    "branch nodes must hold at least 4 children for splits to terminate"
);
