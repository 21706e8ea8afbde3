//! # Block Store Boundary
//!
//! The tree engine never owns blocks; it talks to an external store through
//! the [`BlockStore`] trait and is agnostic to whether blocks live in
//! memory, a file, or a mapped region. The contract is synchronous and
//! single-writer: at most one mutating operation runs per store generation,
//! while readers hold paths into older, immutable generations.
//!
//! ## Reference Counting
//!
//! Blocks are reference counted by the store. The engine only ever calls
//! `ref_block`/`unref_block`; it never inspects counts. `unref_block`
//! returns `true` when the count reaches zero, at which point the engine
//! cascades (unrefs the block's children, then calls `remove_block`).
//! Expressing the cascade engine-side instead of as a store callback keeps
//! the store borrowable during the walk; the semantics match a
//! `unref_block(id, on_zero)` interface exactly.
//!
//! ## Generations
//!
//! Every block carries the generation that created it (store-side, not in
//! the block payload). A block is mutable iff its tag equals the store's
//! current write generation; anything older must be cloned before the first
//! field write. `MemStore::begin_generation` is the snapshot boundary:
//! after it, every previously created block is frozen.

mod memory;

use std::fmt;

use eyre::Result;

pub use memory::{MemStore, StoreStats, StoreStatsHandle};

/// Immutable identifier of one block. Id 0 is reserved and never refers to
/// a live block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u64);

impl BlockId {
    pub const NULL: BlockId = BlockId(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Identifier of one container (tree) within a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(pub u64);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctr{}", self.0)
    }
}

/// Synchronous block storage collaborator.
///
/// All blocks have the same fixed capacity, chosen by the store. Mutable
/// access is only legal for blocks of the current write generation; stores
/// enforce this to catch copy-on-write violations early.
pub trait BlockStore {
    /// Read view of a block's bytes.
    fn block(&self, id: BlockId) -> Result<&[u8]>;

    /// Write view of a block's bytes. Fails for blocks of older
    /// generations; those must be cloned first.
    fn block_mut(&mut self, id: BlockId) -> Result<&mut [u8]>;

    /// Allocates a zeroed block in the current generation with reference
    /// count 0. The caller links it (which refs it) or abandons it.
    fn create_block(&mut self) -> Result<BlockId>;

    /// Copies a block's bytes into a fresh block of the current generation
    /// (reference count 0) and returns the new id.
    fn clone_block(&mut self, id: BlockId) -> Result<BlockId>;

    fn ref_block(&mut self, id: BlockId) -> Result<()>;

    /// Decrements the reference count; `true` means it reached zero and
    /// the caller must cascade and then `remove_block`.
    fn unref_block(&mut self, id: BlockId) -> Result<bool>;

    /// Frees a zero-referenced block.
    fn remove_block(&mut self, id: BlockId) -> Result<()>;

    /// Whether `id` names an allocated block.
    fn contains_block(&self, id: BlockId) -> bool;

    /// Current write generation.
    fn generation(&self) -> u64;

    /// Generation that created `id`.
    fn block_generation(&self, id: BlockId) -> Result<u64>;

    /// Root block of a container, if the container exists.
    fn get_root(&self, ctr: ContainerId) -> Result<Option<BlockId>>;

    /// Atomically swaps a container's root pointer, returning the old one.
    /// This is the single commit point of every mutating operation; it does
    /// not touch reference counts.
    fn set_root(&mut self, ctr: ContainerId, id: Option<BlockId>) -> Result<Option<BlockId>>;
}
