//! # pactree
//!
//! An embeddable copy-on-write balanced tree engine over packed fixed-size
//! blocks. The crate provides the storage-side machinery of an
//! order-statistics B-tree: block-internal segment packing, per-node sum
//! trees for logarithmic rank/select descent, structural copy-on-write
//! against a pluggable block store, a full-tree consistency checker, and a
//! bottom-up bulk loader.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌───────────────┐
//!                 │     tree      │  descent, insert/remove, splits,
//!                 │  (+ cow/path) │  root growth, cursors
//!                 └──────┬────────┘
//!        ┌───────────────┼───────────────┐
//!        ▼               ▼               ▼
//!  ┌──────────┐    ┌──────────┐    ┌──────────┐
//!  │   bulk   │    │  check   │    │  store   │  BlockStore trait,
//!  │  loader  │    │  walker  │    │ MemStore │  refcounts, generations
//!  └────┬─────┘    └────┬─────┘    └──────────┘
//!       ▼               ▼
//!  ┌─────────────────────────┐
//!  │          node           │  leaf / branch views, accumulators
//!  └───────────┬─────────────┘
//!              ▼
//!  ┌─────────────────────────┐
//!  │         sumtree         │  order-statistics segment
//!  └───────────┬─────────────┘
//!              ▼
//!  ┌─────────────────────────┐
//!  │          alloc          │  packed intra-block allocator
//!  └─────────────────────────┘
//! ```
//!
//! Every node is one block laid out by the packed allocator: a directory of
//! typed segments followed by contiguous 8-byte-aligned payloads. Branch
//! nodes aggregate their children column-wise (entry count and weight sum)
//! in sum trees, so positional and cumulative-weight searches both run in
//! one top-down pass.
//!
//! Writers never mutate a block reachable from an older root: the tree
//! clones the root-to-leaf chain into the current write generation first
//! and commits by swapping the container's root pointer. Readers holding an
//! old root keep a consistent snapshot at zero cost; block lifetimes are
//! managed by store-side reference counts.
//!
//! ## Example
//!
//! ```
//! use pactree::{ContainerId, MemStore, Tree};
//!
//! # fn main() -> eyre::Result<()> {
//! let mut store = MemStore::new();
//! let mut tree = Tree::create(&mut store, ContainerId(1), 32)?;
//!
//! for i in 0..1000 {
//!     tree.push(i, 1)?;
//! }
//! assert_eq!(tree.len()?, 1000);
//! assert_eq!(tree.entry(617)?, (617, 1));
//!
//! // Select by cumulative weight.
//! let hit = tree.find_weight_ge(500)?;
//! assert!(hit.is_some());
//! # Ok(())
//! # }
//! ```

mod macros;

pub mod alloc;
pub mod bulk;
pub mod check;
pub mod config;
pub mod error;
pub mod node;
pub mod store;
pub mod sumtree;
pub mod tree;

pub use bulk::{LeafListProvider, LeafProvider};
pub use check::{check_tree, CheckConsumer, Severity};
pub use error::CapacityExceeded;
pub use node::{Accumulator, BranchNode, BranchNodeMut, LeafNode, LeafNodeMut, Node};
pub use store::{BlockId, BlockStore, ContainerId, MemStore, StoreStats, StoreStatsHandle};
pub use tree::{release_tree, Cursor, PathEntry, Tree, TreePath};
