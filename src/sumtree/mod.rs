//! # Order-Statistics Segment (Sum Tree)
//!
//! A sum tree augments a flat array of signed 64-bit values with a branching
//! summary hierarchy supporting rank, prefix-sum, and cumulative-sum search
//! in logarithmic time. It is the indexing primitive behind every branch
//! node descent: the count column answers "which child holds position p",
//! the weight column answers "which child covers cumulative weight w".
//!
//! ## Segment Layout
//!
//! One sum tree occupies three consecutive allocator slots starting at a
//! caller-chosen base:
//!
//! ```text
//! base + 0   metadata    { size: U32, branching: U16 }
//! base + 1   index       all summary levels, one I64 array, topmost first
//! base + 2   values      I64 array, exactly `size` entries
//! ```
//!
//! ## Summary Hierarchy
//!
//! With branching factor B, summary level 1 holds `ceil(n / B)` cells, each
//! the sum of B consecutive values (fewer for the last partial group);
//! level 2 summarizes level 1, and so on until a level fits within B cells.
//! Arrays of `n <= B` values carry no index at all and are scanned
//! linearly, matching the flat-array fast path of small nodes.
//!
//! The index segment stores levels top-first so a search touches it in
//! strictly ascending offsets:
//!
//! ```text
//! n = 100, B = 4:   level sizes 2 | 7 | 25   (top ... bottom)
//! index = [t0 t1 | m0..m6 | b0..b24]
//! ```
//!
//! ## Search Conventions
//!
//! Forward searches (`find_ge`, `find_gt`) return [`FindResult`] with
//! `idx == size()` meaning "no index satisfies the predicate"; `prefix` is
//! the cumulative sum before `idx` (the total sum for a miss). Backward
//! searches (`find_le`, `find_lt`) are derived from the forward pair and
//! return `None` for a miss. Ties resolve to the smallest satisfying
//! index.
//!
//! ## Consistency
//!
//! Every summary cell must equal the exact sum of its group after
//! [`SumTreeMut::reindex`] and before any query. Structural mutations
//! (`insert_space`, `remove_space`) reindex internally; point updates via
//! [`SumTreeMut::add_value`] update only the covering cells.

use eyre::{ensure, Result};
use smallvec::SmallVec;
use zerocopy::little_endian::{I64, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::alloc::{PackedAllocator, PackedAllocatorMut};
use crate::alloc::{KIND_SUMTREE_INDEX, KIND_SUMTREE_META, KIND_SUMTREE_VALUES};
use crate::zerocopy_accessors;

/// Allocator slots occupied by one sum tree.
pub const SUMTREE_SLOTS: usize = 3;

const META: usize = 0;
const INDEX: usize = 1;
const VALUES: usize = 2;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct SumTreeMeta {
    size: U32,
    branching: U16,
    reserved: [u8; 2],
}

impl SumTreeMeta {
    zerocopy_accessors! {
        size: u32,
        branching: u16,
    }
}

/// Result of a forward cumulative-sum search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindResult {
    /// Smallest index satisfying the predicate, or `size()` for a miss.
    pub idx: usize,
    /// Cumulative sum of all values before `idx`.
    pub prefix: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchMode {
    /// First index where the running sum reaches the target.
    Ge,
    /// First index where the running sum exceeds the target.
    Gt,
}

impl SearchMode {
    #[inline]
    fn hit(self, running: i64, target: i64) -> bool {
        match self {
            SearchMode::Ge => running >= target,
            SearchMode::Gt => running > target,
        }
    }
}

/// Per-level extents of the summary hierarchy, topmost level first.
/// Recomputed from `(size, branching)` on demand; never persisted.
#[derive(Debug, Default)]
struct TreeLayout {
    starts: SmallVec<[usize; 8]>,
    sizes: SmallVec<[usize; 8]>,
    index_cells: usize,
}

fn compute_layout(size: usize, branching: usize) -> TreeLayout {
    let mut layout = TreeLayout::default();
    if size <= branching {
        return layout;
    }

    // Collect level sizes bottom-up, then lay them out top-first.
    let mut sizes: SmallVec<[usize; 8]> = SmallVec::new();
    let mut level = size.div_ceil(branching);
    loop {
        sizes.push(level);
        if level <= branching {
            break;
        }
        level = level.div_ceil(branching);
    }
    sizes.reverse();

    let mut at = 0;
    for &sz in &sizes {
        layout.starts.push(at);
        at += sz;
    }
    layout.sizes = sizes;
    layout.index_cells = at;
    layout
}

/// Number of I64 index cells required for `size` values.
fn index_size(size: usize, branching: usize) -> usize {
    compute_layout(size, branching).index_cells
}

/// Read-only sum tree view.
#[derive(Clone, Copy)]
pub struct SumTree<'a> {
    alloc: PackedAllocator<'a>,
    base: usize,
}

/// Mutable sum tree view; borrows the block's allocator exclusively for the
/// duration of a mutation.
pub struct SumTreeMut<'a, 'b> {
    alloc: &'b mut PackedAllocatorMut<'a>,
    base: usize,
}

macro_rules! query_impl {
    ($alloc:ident) => {
        /// Number of values.
        pub fn size(&self) -> Result<usize> {
            Ok(self.meta()?.size() as usize)
        }

        /// Branching factor of the summary hierarchy.
        pub fn branching(&self) -> Result<usize> {
            Ok(self.meta()?.branching() as usize)
        }

        /// Value at `idx`.
        pub fn value(&self, idx: usize) -> Result<i64> {
            let values = self.values()?;
            ensure!(idx < values.len(), "value index {} out of range ({})", idx, values.len());
            Ok(values[idx].get())
        }

        /// Cumulative sum of values `[0, pos)`.
        ///
        /// Walks one partial group per level, bottom-up: the in-group
        /// remainder is summed directly, full groups are covered by the
        /// summary cell one level up.
        pub fn rank(&self, pos: usize) -> Result<i64> {
            let values = self.values()?;
            let n = values.len();
            ensure!(pos <= n, "rank position {} out of range ({})", pos, n);

            let branching = self.branching()?;
            let layout = compute_layout(n, branching);

            if layout.sizes.is_empty() {
                return Ok(values[..pos].iter().map(|v| v.get()).sum());
            }

            let mut group = pos / branching;
            let mut sum: i64 = values[group * branching..pos].iter().map(|v| v.get()).sum();

            let index = self.index()?;
            // Bottom index levels contribute one partial group each; the
            // topmost level is summed outright (its size never exceeds B).
            for level in (1..layout.sizes.len()).rev() {
                let cells = &index[layout.starts[level]..layout.starts[level] + layout.sizes[level]];
                let parent = group / branching;
                sum += cells[parent * branching..group].iter().map(|v| v.get()).sum::<i64>();
                group = parent;
            }
            let top = &index[layout.starts[0]..layout.starts[0] + layout.sizes[0]];
            sum += top[..group].iter().map(|v| v.get()).sum::<i64>();
            Ok(sum)
        }

        /// Cumulative sum over `[start, end)`.
        pub fn sum(&self, start: usize, end: usize) -> Result<i64> {
            ensure!(start <= end, "sum range inverted: {} > {}", start, end);
            Ok(self.rank(end)? - self.rank(start)?)
        }

        /// Smallest `idx` whose inclusive prefix sum is `>= target`.
        pub fn find_ge(&self, target: i64) -> Result<FindResult> {
            self.search(target, SearchMode::Ge)
        }

        /// Smallest `idx` whose inclusive prefix sum is `> target`.
        pub fn find_gt(&self, target: i64) -> Result<FindResult> {
            self.search(target, SearchMode::Gt)
        }

        /// Largest `idx` whose inclusive prefix sum is `<= target`;
        /// `None` when even index 0 exceeds the target.
        pub fn find_le(&self, target: i64) -> Result<Option<FindResult>> {
            let gt = self.find_gt(target)?;
            if gt.idx == 0 {
                return Ok(None);
            }
            let idx = gt.idx - 1;
            Ok(Some(FindResult { idx, prefix: self.rank(idx)? }))
        }

        /// Largest `idx` whose inclusive prefix sum is `< target`;
        /// `None` when even index 0 reaches the target.
        pub fn find_lt(&self, target: i64) -> Result<Option<FindResult>> {
            let ge = self.find_ge(target)?;
            if ge.idx == 0 {
                return Ok(None);
            }
            let idx = ge.idx - 1;
            Ok(Some(FindResult { idx, prefix: self.rank(idx)? }))
        }

        fn search(&self, target: i64, mode: SearchMode) -> Result<FindResult> {
            let values = self.values()?;
            let n = values.len();
            let branching = self.branching()?;
            let layout = compute_layout(n, branching);

            let mut sum: i64 = 0;
            let mut group = 0usize;

            if !layout.sizes.is_empty() {
                let index = self.index()?;
                // Greedy descent: at each level scan one group of cells
                // left to right; the first cell whose addition satisfies
                // the predicate is the one to descend into.
                for level in 0..layout.sizes.len() {
                    let cells =
                        &index[layout.starts[level]..layout.starts[level] + layout.sizes[level]];
                    let lo = group * branching;
                    let hi = (lo + branching).min(cells.len());
                    let mut descended = false;
                    for c in lo..hi {
                        let v = cells[c].get();
                        if mode.hit(sum + v, target) {
                            group = c;
                            descended = true;
                            break;
                        }
                        sum += v;
                    }
                    if !descended {
                        return Ok(FindResult { idx: n, prefix: sum });
                    }
                }
            }

            let lo = group * branching;
            let hi = (lo + branching).min(n);
            for idx in lo..hi {
                let v = values[idx].get();
                if mode.hit(sum + v, target) {
                    return Ok(FindResult { idx, prefix: sum });
                }
                sum += v;
            }
            Ok(FindResult { idx: n, prefix: sum })
        }

        fn meta(&self) -> Result<&SumTreeMeta> {
            self.$alloc.get::<SumTreeMeta>(self.base + META)
        }

        fn values(&self) -> Result<&[I64]> {
            self.$alloc.slice::<I64>(self.base + VALUES)
        }

        fn index(&self) -> Result<&[I64]> {
            self.$alloc.slice::<I64>(self.base + INDEX)
        }
    };
}

impl<'a> SumTree<'a> {
    /// Wraps the three slots starting at `base`.
    pub fn new(alloc: PackedAllocator<'a>, base: usize) -> Self {
        Self { alloc, base }
    }

    query_impl!(alloc);

    /// Verifies that every summary cell equals the recomputed sum of its
    /// group. Reports each mismatch through `on_error`; returns the number
    /// of mismatches.
    pub fn verify(&self, mut on_error: impl FnMut(String)) -> Result<usize> {
        let values = self.values()?;
        let n = values.len();
        let meta_size = self.size()?;
        let branching = self.branching()?;
        let mut errors = 0;

        if meta_size != n {
            on_error(format!(
                "sum tree size {} disagrees with values segment length {}",
                meta_size, n
            ));
            errors += 1;
        }

        let layout = compute_layout(n, branching);
        let index = self.index()?;
        if index.len() != layout.index_cells {
            on_error(format!(
                "sum tree index has {} cells, layout requires {}",
                index.len(),
                layout.index_cells
            ));
            return Ok(errors + 1);
        }

        for level in (0..layout.sizes.len()).rev() {
            let cells = &index[layout.starts[level]..layout.starts[level] + layout.sizes[level]];
            for (cell, &expected) in cells.iter().zip(level_sums(
                if level + 1 == layout.sizes.len() {
                    values
                } else {
                    &index[layout.starts[level + 1]
                        ..layout.starts[level + 1] + layout.sizes[level + 1]]
                },
                branching,
            )
            .iter())
            {
                if cell.get() != expected {
                    on_error(format!(
                        "summary cell holds {}, group sums to {}",
                        cell.get(),
                        expected
                    ));
                    errors += 1;
                }
            }
        }
        Ok(errors)
    }
}

/// Group sums of `cells` with the given branching factor.
fn level_sums(cells: &[I64], branching: usize) -> SmallVec<[i64; 64]> {
    cells
        .chunks(branching)
        .map(|chunk| chunk.iter().map(|v| v.get()).sum())
        .collect()
}

impl<'a, 'b> SumTreeMut<'a, 'b> {
    /// Wraps the three slots starting at `base`.
    pub fn new(alloc: &'b mut PackedAllocatorMut<'a>, base: usize) -> Self {
        Self { alloc, base }
    }

    /// Claims and formats the three slots of an empty sum tree.
    pub fn init(
        alloc: &'b mut PackedAllocatorMut<'a>,
        base: usize,
        branching: u16,
    ) -> Result<Self> {
        ensure!(branching >= 2, "sum tree branching factor must be at least 2");
        alloc.allocate(base + META, KIND_SUMTREE_META, size_of::<SumTreeMeta>())?;
        alloc.allocate(base + INDEX, KIND_SUMTREE_INDEX, 0)?;
        alloc.allocate(base + VALUES, KIND_SUMTREE_VALUES, 0)?;
        let mut tree = Self { alloc, base };
        let meta = tree.meta_mut()?;
        meta.set_size(0);
        meta.set_branching(branching);
        Ok(tree)
    }

    query_impl!(alloc);

    /// Read-only view borrowing from this one.
    pub fn reader(&self) -> SumTree<'_> {
        SumTree { alloc: self.alloc.reader(), base: self.base }
    }

    /// Overwrites the value at `idx`. The caller must reindex (point
    /// updates prefer [`SumTreeMut::add_value`], which reindexes itself).
    pub fn set_value(&mut self, idx: usize, value: i64) -> Result<()> {
        let values = self.values_mut()?;
        ensure!(idx < values.len(), "value index {} out of range ({})", idx, values.len());
        values[idx] = I64::new(value);
        Ok(())
    }

    /// Adds `delta` to the value at `idx` and recomputes the covering
    /// summary cells.
    pub fn add_value(&mut self, idx: usize, delta: i64) -> Result<()> {
        let values = self.values_mut()?;
        ensure!(idx < values.len(), "value index {} out of range ({})", idx, values.len());
        let updated = values[idx].get() + delta;
        values[idx] = I64::new(updated);
        self.reindex_range(idx, idx + 1)
    }

    /// Opens `count` value slots at `at`, shifting later values up. Fails
    /// with `CapacityExceeded` when the block cannot hold the grown value
    /// and index segments; the tree is left unchanged in that case.
    pub fn insert_space(&mut self, at: usize, count: usize) -> Result<()> {
        let n = self.size()?;
        ensure!(at <= n, "insert position {} out of range ({})", at, n);
        if count == 0 {
            return Ok(());
        }
        let branching = self.branching()?;
        let new_n = n + count;

        let old_values_len = n * size_of::<I64>();
        let new_values_len = new_n * size_of::<I64>();
        let new_index_len = index_size(new_n, branching) * size_of::<I64>();

        self.alloc.resize(self.base + VALUES, new_values_len)?;
        if let Err(err) = self.alloc.resize(self.base + INDEX, new_index_len) {
            // Roll the value grow back so a failed insert leaves no trace.
            self.alloc
                .resize(self.base + VALUES, old_values_len)
                .ok();
            return Err(err);
        }

        let values = self.values_mut()?;
        values.copy_within(at..n, at + count);
        for slot in &mut values[at..at + count] {
            *slot = I64::ZERO;
        }

        self.meta_mut()?.set_size(new_n as u32);
        self.reindex()
    }

    /// Removes `count` value slots at `at`, shifting later values down.
    pub fn remove_space(&mut self, at: usize, count: usize) -> Result<()> {
        let n = self.size()?;
        ensure!(at + count <= n, "remove range {}+{} out of range ({})", at, count, n);
        if count == 0 {
            return Ok(());
        }
        let branching = self.branching()?;
        let new_n = n - count;

        self.values_mut()?.copy_within(at + count..n, at);

        // Shrinks never fail.
        self.alloc.resize(self.base + VALUES, new_n * size_of::<I64>())?;
        self.alloc
            .resize(self.base + INDEX, index_size(new_n, branching) * size_of::<I64>())?;

        self.meta_mut()?.set_size(new_n as u32);
        self.reindex()
    }

    /// Rebuilds every summary cell from the value array. Idempotent.
    pub fn reindex(&mut self) -> Result<()> {
        let n = self.size()?;
        let branching = self.branching()?;
        let layout = compute_layout(n, branching);

        // Bottom level first: summarize values, then each level above
        // summarizes the one below it.
        for level in (0..layout.sizes.len()).rev() {
            let sums = {
                let index = self.index()?;
                if level + 1 == layout.sizes.len() {
                    level_sums(self.values()?, branching)
                } else {
                    level_sums(
                        &index[layout.starts[level + 1]
                            ..layout.starts[level + 1] + layout.sizes[level + 1]],
                        branching,
                    )
                }
            };
            let index = self.index_mut()?;
            let cells = &mut index[layout.starts[level]..layout.starts[level] + layout.sizes[level]];
            for (cell, sum) in cells.iter_mut().zip(sums.iter()) {
                *cell = I64::new(*sum);
            }
        }
        Ok(())
    }

    /// Recomputes only the summary cells covering value range `[from, to)`.
    pub fn reindex_range(&mut self, from: usize, to: usize) -> Result<()> {
        let n = self.size()?;
        ensure!(from <= to && to <= n, "reindex range {}..{} out of range ({})", from, to, n);
        let branching = self.branching()?;
        let layout = compute_layout(n, branching);
        if layout.sizes.is_empty() {
            return Ok(());
        }

        let mut lo = from / branching;
        let mut hi = to.div_ceil(branching).max(lo + 1);

        for level in (0..layout.sizes.len()).rev() {
            let level_len = layout.sizes[level];
            let hi_clamped = hi.min(level_len);
            let sums = {
                let index = self.index()?;
                let below: &[I64] = if level + 1 == layout.sizes.len() {
                    self.values()?
                } else {
                    &index[layout.starts[level + 1]
                        ..layout.starts[level + 1] + layout.sizes[level + 1]]
                };
                let first_child = lo * branching;
                let last_child = (hi_clamped * branching).min(below.len());
                level_sums(&below[first_child..last_child], branching)
            };
            let index = self.index_mut()?;
            let cells = &mut index[layout.starts[level]..layout.starts[level] + level_len];
            for (cell, sum) in cells[lo..hi_clamped].iter_mut().zip(sums.iter()) {
                *cell = I64::new(*sum);
            }
            lo /= branching;
            hi = hi_clamped.div_ceil(branching).max(lo + 1);
        }
        Ok(())
    }

    fn meta_mut(&mut self) -> Result<&mut SumTreeMeta> {
        self.alloc.get_mut::<SumTreeMeta>(self.base + META)
    }

    fn values_mut(&mut self) -> Result<&mut [I64]> {
        self.alloc.slice_mut::<I64>(self.base + VALUES)
    }

    fn index_mut(&mut self) -> Result<&mut [I64]> {
        self.alloc.slice_mut::<I64>(self.base + INDEX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BLOCK_SIZE;

    fn with_tree(
        branching: u16,
        values: &[i64],
        f: impl FnOnce(&mut SumTreeMut<'_, '_>),
    ) {
        let mut data = vec![0u8; BLOCK_SIZE];
        let mut alloc = PackedAllocatorMut::init(&mut data, SUMTREE_SLOTS).unwrap();
        let mut tree = SumTreeMut::init(&mut alloc, 0, branching).unwrap();
        tree.insert_space(0, values.len()).unwrap();
        for (i, &v) in values.iter().enumerate() {
            tree.set_value(i, v).unwrap();
        }
        tree.reindex().unwrap();
        f(&mut tree);
    }

    #[test]
    fn rank_matches_naive_prefix_sums() {
        let values: Vec<i64> = (0..100).map(|i| (i * 7 % 13) - 3).collect();
        with_tree(4, &values, |tree| {
            let mut prefix = 0i64;
            for i in 0..=values.len() {
                assert_eq!(tree.rank(i).unwrap(), prefix, "rank({i})");
                if i < values.len() {
                    prefix += values[i];
                }
            }
        });
    }

    #[test]
    fn sum_over_subranges() {
        let values: Vec<i64> = (1..=50).collect();
        with_tree(4, &values, |tree| {
            assert_eq!(tree.sum(0, 50).unwrap(), 50 * 51 / 2);
            assert_eq!(tree.sum(10, 20).unwrap(), (11..=20).sum::<i64>());
            assert_eq!(tree.sum(49, 50).unwrap(), 50);
            assert_eq!(tree.sum(7, 7).unwrap(), 0);
        });
    }

    #[test]
    fn unit_weight_scenario() {
        // Entries [10, 20, 30, 40] with unit sums, branching factor 4.
        with_tree(4, &[1, 1, 1, 1], |tree| {
            assert_eq!(tree.sum(0, 4).unwrap(), 4);

            // Cumulative sum at index 1 is 2, so find_le(2) lands there.
            let le = tree.find_le(2).unwrap().unwrap();
            assert_eq!(le.idx, 1);

            // Nothing has an inclusive prefix <= 0: backward miss.
            assert!(tree.find_le(0).unwrap().is_none());
        });
    }

    #[test]
    fn find_ge_and_gt_against_linear_scan() {
        let values: Vec<i64> = (0..200).map(|i| i64::from(i % 5 == 0)).collect();
        with_tree(4, &values, |tree| {
            let n = values.len();
            for target in -2..45 {
                let mut running = 0i64;
                let mut expect_ge = n;
                let mut expect_gt = n;
                for (i, &v) in values.iter().enumerate() {
                    running += v;
                    if expect_ge == n && running >= target {
                        expect_ge = i;
                    }
                    if expect_gt == n && running > target {
                        expect_gt = i;
                    }
                }
                assert_eq!(tree.find_ge(target).unwrap().idx, expect_ge, "ge {target}");
                assert_eq!(tree.find_gt(target).unwrap().idx, expect_gt, "gt {target}");
            }
        });
    }

    #[test]
    fn find_miss_returns_size_with_total_prefix() {
        let values = [5i64, 5, 5];
        with_tree(4, &values, |tree| {
            let miss = tree.find_ge(100).unwrap();
            assert_eq!(miss.idx, 3);
            assert_eq!(miss.prefix, 15);
        });
    }

    #[test]
    fn empty_tree_searches_miss_immediately() {
        let mut data = vec![0u8; BLOCK_SIZE];
        let mut alloc = PackedAllocatorMut::init(&mut data, SUMTREE_SLOTS).unwrap();
        let tree = SumTreeMut::init(&mut alloc, 0, 4).unwrap();
        assert_eq!(tree.find_ge(0).unwrap(), FindResult { idx: 0, prefix: 0 });
        assert!(tree.find_le(10).unwrap().is_none());
        assert_eq!(tree.rank(0).unwrap(), 0);
    }

    #[test]
    fn reindex_is_idempotent() {
        let values: Vec<i64> = (0..77).map(|i| i * 3 - 20).collect();
        with_tree(4, &values, |tree| {
            let snapshot: Vec<i64> = tree.index().unwrap().iter().map(|v| v.get()).collect();
            tree.reindex().unwrap();
            let again: Vec<i64> = tree.index().unwrap().iter().map(|v| v.get()).collect();
            assert_eq!(snapshot, again);
        });
    }

    #[test]
    fn reindex_range_matches_full_reindex() {
        let values: Vec<i64> = (0..150).map(|i| i % 11).collect();
        with_tree(4, &values, |tree| {
            for (at, delta) in [(0usize, 5i64), (73, -2), (149, 9), (64, 1)] {
                tree.add_value(at, delta).unwrap();
                let partial: Vec<i64> = tree.index().unwrap().iter().map(|v| v.get()).collect();
                tree.reindex().unwrap();
                let full: Vec<i64> = tree.index().unwrap().iter().map(|v| v.get()).collect();
                assert_eq!(partial, full, "point update at {at}");
            }
        });
    }

    #[test]
    fn insert_and_remove_space_keep_sums_exact() {
        let mut data = vec![0u8; BLOCK_SIZE];
        let mut alloc = PackedAllocatorMut::init(&mut data, SUMTREE_SLOTS).unwrap();
        let mut tree = SumTreeMut::init(&mut alloc, 0, 4).unwrap();
        let mut model: Vec<i64> = Vec::new();

        for step in 0..60 {
            let at = (step * 37) % (model.len() + 1);
            tree.insert_space(at, 1).unwrap();
            tree.set_value(at, step as i64).unwrap();
            tree.reindex().unwrap();
            model.insert(at, step as i64);
        }
        for step in 0..25 {
            let at = (step * 13) % model.len();
            tree.remove_space(at, 1).unwrap();
            model.remove(at);
        }

        assert_eq!(tree.size().unwrap(), model.len());
        assert_eq!(tree.sum(0, model.len()).unwrap(), model.iter().sum::<i64>());
        for i in 0..model.len() {
            assert_eq!(tree.value(i).unwrap(), model[i]);
        }
        assert_eq!(tree.reader().verify(|_| {}).unwrap(), 0);
    }

    #[test]
    fn no_index_below_branching_threshold() {
        with_tree(32, &[1, 2, 3], |tree| {
            assert!(tree.index().unwrap().is_empty());
            assert_eq!(tree.rank(3).unwrap(), 6);
            assert_eq!(tree.find_ge(3).unwrap().idx, 1);
        });
    }

    #[test]
    fn verify_flags_a_corrupted_cell() {
        let values: Vec<i64> = (0..64).map(|_| 1).collect();
        with_tree(4, &values, |tree| {
            {
                let index = tree.index_mut().unwrap();
                index[0] = I64::new(999);
            }
            let mut messages = Vec::new();
            let errors = tree.reader().verify(|m| messages.push(m)).unwrap();
            assert_eq!(errors, 1);
            assert!(messages[0].contains("999"));
        });
    }
}
