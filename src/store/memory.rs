//! # In-Memory Block Store
//!
//! Reference implementation of [`BlockStore`] backed by a hash map. It
//! exists for tests, examples, and as the executable specification of the
//! store contract: refcounts, generation tags, and root pointers behave
//! exactly as a persistent store must, minus durability.
//!
//! The store also keeps operation counters ([`StoreStats`]) behind a shared
//! handle so tests can assert on clone/ref/unref traffic — the
//! copy-on-write protocol has exact expectations about those.

use std::sync::Arc;

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::trace;

use super::{BlockId, BlockStore, ContainerId};
use crate::config::BLOCK_SIZE;

/// Operation counters, shared out of the store via [`StoreStatsHandle`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub created: u64,
    pub cloned: u64,
    pub refs: u64,
    pub unrefs: u64,
    pub removed: u64,
}

/// Cloneable handle onto a store's counters.
#[derive(Debug, Clone, Default)]
pub struct StoreStatsHandle(Arc<Mutex<StoreStats>>);

impl StoreStatsHandle {
    pub fn get(&self) -> StoreStats {
        *self.0.lock()
    }

    pub fn reset(&self) {
        *self.0.lock() = StoreStats::default();
    }
}

#[derive(Debug)]
struct BlockEntry {
    bytes: Box<[u8]>,
    refcount: u64,
    generation: u64,
}

/// Hash-map backed block store with refcounting and generation tags.
#[derive(Debug)]
pub struct MemStore {
    blocks: HashMap<BlockId, BlockEntry>,
    roots: HashMap<ContainerId, BlockId>,
    next_id: u64,
    generation: u64,
    stats: StoreStatsHandle,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            blocks: HashMap::new(),
            roots: HashMap::new(),
            next_id: 1,
            generation: 1,
            stats: StoreStatsHandle::default(),
        }
    }

    /// Opens a new write generation. Every block created before this call
    /// becomes immutable and will be cloned on first write.
    pub fn begin_generation(&mut self) -> u64 {
        self.generation += 1;
        trace!(generation = self.generation, "opened write generation");
        self.generation
    }

    /// Handle onto this store's operation counters.
    pub fn stats(&self) -> StoreStatsHandle {
        self.stats.clone()
    }

    /// Number of live blocks, for leak assertions in tests.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn entry(&self, id: BlockId) -> Result<&BlockEntry> {
        match self.blocks.get(&id) {
            Some(entry) => Ok(entry),
            None => bail!("block {} does not exist", id),
        }
    }

    fn entry_mut(&mut self, id: BlockId) -> Result<&mut BlockEntry> {
        match self.blocks.get_mut(&id) {
            Some(entry) => Ok(entry),
            None => bail!("block {} does not exist", id),
        }
    }

    fn fresh_id(&mut self) -> BlockId {
        let id = BlockId(self.next_id);
        self.next_id += 1;
        id
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for MemStore {
    fn block(&self, id: BlockId) -> Result<&[u8]> {
        Ok(&self.entry(id)?.bytes)
    }

    fn block_mut(&mut self, id: BlockId) -> Result<&mut [u8]> {
        let generation = self.generation;
        let entry = self.entry_mut(id)?;
        ensure!(
            entry.generation == generation,
            "block {} belongs to generation {} and is immutable in generation {}",
            id,
            entry.generation,
            generation
        );
        Ok(&mut entry.bytes)
    }

    fn create_block(&mut self) -> Result<BlockId> {
        let id = self.fresh_id();
        self.blocks.insert(
            id,
            BlockEntry {
                bytes: vec![0u8; BLOCK_SIZE].into_boxed_slice(),
                refcount: 0,
                generation: self.generation,
            },
        );
        self.stats.0.lock().created += 1;
        trace!(%id, "created block");
        Ok(id)
    }

    fn clone_block(&mut self, id: BlockId) -> Result<BlockId> {
        let bytes = self.entry(id)?.bytes.clone();
        let new_id = self.fresh_id();
        self.blocks.insert(
            new_id,
            BlockEntry {
                bytes,
                refcount: 0,
                generation: self.generation,
            },
        );
        self.stats.0.lock().cloned += 1;
        trace!(source = %id, clone = %new_id, "cloned block");
        Ok(new_id)
    }

    fn ref_block(&mut self, id: BlockId) -> Result<()> {
        self.entry_mut(id)?.refcount += 1;
        self.stats.0.lock().refs += 1;
        Ok(())
    }

    fn unref_block(&mut self, id: BlockId) -> Result<bool> {
        let entry = self.entry_mut(id)?;
        ensure!(entry.refcount > 0, "unref of unreferenced block {}", id);
        entry.refcount -= 1;
        let zero = entry.refcount == 0;
        self.stats.0.lock().unrefs += 1;
        Ok(zero)
    }

    fn remove_block(&mut self, id: BlockId) -> Result<()> {
        let entry = self.entry(id)?;
        ensure!(
            entry.refcount == 0,
            "removing block {} with {} live references",
            id,
            entry.refcount
        );
        self.blocks.remove(&id);
        self.stats.0.lock().removed += 1;
        trace!(%id, "removed block");
        Ok(())
    }

    fn contains_block(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn block_generation(&self, id: BlockId) -> Result<u64> {
        Ok(self.entry(id)?.generation)
    }

    fn get_root(&self, ctr: ContainerId) -> Result<Option<BlockId>> {
        Ok(self.roots.get(&ctr).copied())
    }

    fn set_root(&mut self, ctr: ContainerId, id: Option<BlockId>) -> Result<Option<BlockId>> {
        let old = match id {
            Some(id) => {
                ensure!(self.blocks.contains_key(&id), "set_root to missing block {}", id);
                self.roots.insert(ctr, id)
            }
            None => self.roots.remove(&ctr),
        };
        trace!(%ctr, new = ?id, ?old, "root pointer updated");
        Ok(old)
    }
}
