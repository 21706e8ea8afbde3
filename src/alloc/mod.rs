//! # Packed Intra-Block Allocator
//!
//! Sub-allocates named, independently resizable byte segments inside one
//! fixed-capacity block. Every tree node is a block whose contents are
//! entirely described by this directory, so a persisted block can be
//! re-parsed with no external metadata.
//!
//! ## Block Layout
//!
//! ```text
//! Offset  Size        Field
//! ------  ----------  ---------------------------------------------
//! 0       8           AllocatorHeader
//! 8       12 * N      SegmentDescriptor table (N fixed at init)
//! base    ...         segment payloads, contiguous, directory order
//! ```
//!
//! `base` is the descriptor table end rounded up to [`ALIGNMENT`]. Each
//! payload occupies `round_up(length, ALIGNMENT)` bytes so that multi-byte
//! little-endian arrays always start on an 8-byte boundary within the
//! block.
//!
//! ## Descriptor Layout (12 bytes)
//!
//! ```text
//! Offset  Size  Field    Description
//! ------  ----  -------  -------------------------------------
//! 0       4     offset   absolute payload offset in the block
//! 4       4     length   payload length in bytes (unpadded)
//! 8       2     kind     segment kind tag (0 = empty slot)
//! 10      2     pad      reserved
//! ```
//!
//! ## Resizing
//!
//! `resize(slot, new_len)` grows or shrinks one payload in place. Every
//! later payload shifts by the padded delta and has its offset rewritten in
//! the same call, so a reader holding `&self` can never observe a
//! directory/payload mismatch. Growth past the block capacity fails with
//! [`CapacityExceeded`]; nothing is truncated. Slot indexes stay valid
//! across resizes; only byte offsets move.
//!
//! ## Typed Views
//!
//! `get::<T>` / `slice::<T>` reinterpret payload bytes through `zerocopy`.
//! All persisted types use little-endian wrappers with alignment 1, so the
//! size contract is the only thing checked at the view boundary.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::ALIGNMENT;
use crate::error::CapacityExceeded;
use crate::zerocopy_accessors;

/// Kind tag of an unclaimed directory slot.
pub const KIND_EMPTY: u16 = 0;

/// Kind tag for node header segments.
pub const KIND_NODE_HEADER: u16 = 1;
/// Kind tag for sum tree metadata segments.
pub const KIND_SUMTREE_META: u16 = 2;
/// Kind tag for sum tree summary index segments.
pub const KIND_SUMTREE_INDEX: u16 = 3;
/// Kind tag for sum tree value array segments.
pub const KIND_SUMTREE_VALUES: u16 = 4;
/// Kind tag for leaf payload arrays.
pub const KIND_PAYLOAD: u16 = 5;
/// Kind tag for branch child-id arrays.
pub const KIND_CHILD_IDS: u16 = 6;

/// Rounds `len` up to the next [`ALIGNMENT`] boundary.
#[inline]
pub const fn round_up(len: usize) -> usize {
    (len + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct AllocatorHeader {
    block_size: U32,
    segment_count: U16,
    reserved: [u8; 2],
}

impl AllocatorHeader {
    zerocopy_accessors! {
        block_size: u32,
        segment_count: u16,
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct SegmentDescriptor {
    offset: U32,
    length: U32,
    kind: U16,
    pad: [u8; 2],
}

impl SegmentDescriptor {
    zerocopy_accessors! {
        offset: u32,
        length: u32,
        kind: u16,
    }
}

const HEADER_SIZE: usize = size_of::<AllocatorHeader>();
const DESCRIPTOR_SIZE: usize = size_of::<SegmentDescriptor>();

/// Read-only directory view over one block's bytes.
#[derive(Clone, Copy)]
pub struct PackedAllocator<'a> {
    data: &'a [u8],
}

/// Mutable directory view over one block's bytes.
pub struct PackedAllocatorMut<'a> {
    data: &'a mut [u8],
}

/// Byte range of one segment, as reported by [`PackedAllocator::describe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentInfo {
    pub offset: usize,
    pub length: usize,
    pub kind: u16,
}

fn header(data: &[u8]) -> Result<&AllocatorHeader> {
    ensure!(
        data.len() >= HEADER_SIZE,
        "block too small for allocator header: {} bytes",
        data.len()
    );
    AllocatorHeader::ref_from_bytes(&data[..HEADER_SIZE])
        .map_err(|e| eyre::eyre!("failed to read allocator header: {e:?}"))
}

fn descriptor(data: &[u8], slot: usize) -> Result<&SegmentDescriptor> {
    let count = header(data)?.segment_count() as usize;
    ensure!(slot < count, "segment slot {} out of range ({})", slot, count);
    let at = HEADER_SIZE + slot * DESCRIPTOR_SIZE;
    SegmentDescriptor::ref_from_bytes(&data[at..at + DESCRIPTOR_SIZE])
        .map_err(|e| eyre::eyre!("failed to read segment descriptor {slot}: {e:?}"))
}

fn descriptor_mut(data: &mut [u8], slot: usize) -> Result<&mut SegmentDescriptor> {
    let count = header(data)?.segment_count() as usize;
    ensure!(slot < count, "segment slot {} out of range ({})", slot, count);
    let at = HEADER_SIZE + slot * DESCRIPTOR_SIZE;
    SegmentDescriptor::mut_from_bytes(&mut data[at..at + DESCRIPTOR_SIZE])
        .map_err(|e| eyre::eyre!("failed to read segment descriptor {slot}: {e:?}"))
}

fn payload_base(segment_count: usize) -> usize {
    round_up(HEADER_SIZE + segment_count * DESCRIPTOR_SIZE)
}

/// Shared read-side accessors, generic over the borrow.
macro_rules! reader_impl {
    ($($lt:lifetime)?) => {
        /// Number of directory slots (fixed at init).
        pub fn segment_count(&self) -> Result<usize> {
            Ok(header(self.data)?.segment_count() as usize)
        }

        /// Describes one slot's byte range and kind.
        pub fn describe(&self, slot: usize) -> Result<SegmentInfo> {
            let desc = descriptor(self.data, slot)?;
            Ok(SegmentInfo {
                offset: desc.offset() as usize,
                length: desc.length() as usize,
                kind: desc.kind(),
            })
        }

        /// Kind tag of a slot; [`KIND_EMPTY`] for unclaimed slots.
        pub fn kind(&self, slot: usize) -> Result<u16> {
            Ok(descriptor(self.data, slot)?.kind())
        }

        /// Payload length of a slot in bytes (zero for empty slots).
        pub fn length(&self, slot: usize) -> Result<usize> {
            Ok(descriptor(self.data, slot)?.length() as usize)
        }

        /// Raw payload bytes of a slot.
        pub fn bytes(&self, slot: usize) -> Result<&$($lt)? [u8]> {
            let info = self.describe(slot)?;
            ensure!(
                info.offset + info.length <= self.data.len(),
                "segment {} escapes block bounds: {}+{} > {}",
                slot,
                info.offset,
                info.length,
                self.data.len()
            );
            Ok(&self.data[info.offset..info.offset + info.length])
        }

        /// Reinterprets a slot's leading bytes as a typed header.
        pub fn get<T>(&self, slot: usize) -> Result<&$($lt)? T>
        where
            T: FromBytes + IntoBytes + KnownLayout + Immutable,
        {
            let bytes = self.bytes(slot)?;
            ensure!(
                bytes.len() >= size_of::<T>(),
                "segment {} too small for {}: {} < {}",
                slot,
                core::any::type_name::<T>(),
                bytes.len(),
                size_of::<T>()
            );
            T::ref_from_bytes(&bytes[..size_of::<T>()])
                .map_err(|e| eyre::eyre!("segment {slot} cast failed: {e:?}"))
        }

        /// Reinterprets a slot's payload as a typed array.
        pub fn slice<T>(&self, slot: usize) -> Result<&$($lt)? [T]>
        where
            T: FromBytes + IntoBytes + KnownLayout + Immutable,
        {
            let bytes = self.bytes(slot)?;
            ensure!(
                bytes.len() % size_of::<T>() == 0,
                "segment {} length {} not a multiple of {}",
                slot,
                bytes.len(),
                size_of::<T>()
            );
            <[T]>::ref_from_bytes(bytes)
                .map_err(|e| eyre::eyre!("segment {slot} slice cast failed: {e:?}"))
        }

        /// Total bytes consumed by the directory and all padded payloads.
        pub fn used_bytes(&self) -> Result<usize> {
            let count = self.segment_count()?;
            let mut used = payload_base(count);
            for slot in 0..count {
                used += round_up(self.length(slot)?);
            }
            Ok(used)
        }

        /// Bytes still available for segment growth.
        pub fn free_space(&self) -> Result<usize> {
            Ok(self.data.len() - self.used_bytes()?)
        }
    };
}

impl<'a> PackedAllocator<'a> {
    /// Wraps an initialized block. Validates the header against the actual
    /// buffer length.
    pub fn from_block(data: &'a [u8]) -> Result<Self> {
        let hdr = header(data)?;
        ensure!(
            hdr.block_size() as usize == data.len(),
            "allocator header block_size {} != buffer length {}",
            hdr.block_size(),
            data.len()
        );
        Ok(Self { data })
    }

    reader_impl!('a);
}

impl<'a> PackedAllocatorMut<'a> {
    /// Formats an empty directory with `segments` unclaimed slots and
    /// returns a mutable view over it.
    pub fn init(data: &'a mut [u8], segments: usize) -> Result<Self> {
        ensure!(segments > 0, "segment count must be positive");
        ensure!(
            u16::try_from(segments).is_ok(),
            "segment count {} exceeds directory limit",
            segments
        );
        let base = payload_base(segments);
        ensure!(
            base <= data.len(),
            "block of {} bytes cannot hold a {}-slot directory",
            data.len(),
            segments
        );

        data.fill(0);
        let mut hdr = AllocatorHeader {
            block_size: U32::ZERO,
            segment_count: U16::ZERO,
            reserved: [0; 2],
        };
        hdr.set_block_size(data.len() as u32);
        hdr.set_segment_count(segments as u16);
        data[..HEADER_SIZE].copy_from_slice(hdr.as_bytes());

        let base = base as u32;
        for slot in 0..segments {
            let at = HEADER_SIZE + slot * DESCRIPTOR_SIZE;
            let mut desc = SegmentDescriptor {
                offset: U32::ZERO,
                length: U32::ZERO,
                kind: U16::ZERO,
                pad: [0; 2],
            };
            desc.set_offset(base);
            data[at..at + DESCRIPTOR_SIZE].copy_from_slice(desc.as_bytes());
        }

        Ok(Self { data })
    }

    /// Wraps an already initialized block mutably.
    pub fn from_block(data: &'a mut [u8]) -> Result<Self> {
        let hdr = header(data)?;
        ensure!(
            hdr.block_size() as usize == data.len(),
            "allocator header block_size {} != buffer length {}",
            hdr.block_size(),
            data.len()
        );
        Ok(Self { data })
    }

    reader_impl!();

    /// Read-only view borrowing from this one.
    pub fn reader(&self) -> PackedAllocator<'_> {
        PackedAllocator { data: self.data }
    }

    /// Claims an empty slot with `length` payload bytes. The payload is
    /// zeroed. Fails with [`CapacityExceeded`] when the block cannot hold
    /// the padded payload.
    pub fn allocate(&mut self, slot: usize, kind: u16, length: usize) -> Result<()> {
        ensure!(kind != KIND_EMPTY, "cannot allocate with the empty kind tag");
        let current = self.kind(slot)?;
        ensure!(
            current == KIND_EMPTY,
            "segment slot {} already allocated (kind {})",
            slot,
            current
        );
        descriptor_mut(self.data, slot)?.set_kind(kind);
        if let Err(err) = self.resize(slot, length) {
            descriptor_mut(self.data, slot)?.set_kind(KIND_EMPTY);
            return Err(err);
        }
        Ok(())
    }

    /// Releases a slot: payload shrinks to zero, kind reverts to empty.
    pub fn free(&mut self, slot: usize) -> Result<()> {
        self.resize(slot, 0)?;
        descriptor_mut(self.data, slot)?.set_kind(KIND_EMPTY);
        Ok(())
    }

    /// Grows or shrinks one segment, shifting all later payloads and
    /// rewriting their offsets. Grown bytes are zeroed. Slot indexes remain
    /// valid; previously obtained byte offsets do not.
    pub fn resize(&mut self, slot: usize, new_length: usize) -> Result<()> {
        let count = self.segment_count()?;
        let info = self.describe(slot)?;

        let old_padded = round_up(info.length);
        let new_padded = round_up(new_length);
        if old_padded == new_padded {
            // Length changes within one padding granule move nothing.
            let desc = descriptor_mut(self.data, slot)?;
            desc.set_length(new_length as u32);
            if new_length > info.length {
                let start = info.offset + info.length;
                self.data[start..info.offset + new_length].fill(0);
            }
            return Ok(());
        }

        let used = self.used_bytes()?;
        if new_padded > old_padded {
            let delta = new_padded - old_padded;
            let free = self.data.len() - used;
            if delta > free {
                return Err(CapacityExceeded {
                    requested: delta,
                    available: free,
                }
                .into());
            }
        }

        // Shift the tail: everything after this segment's padded payload.
        let tail_start = info.offset + old_padded;
        let tail_len = used - tail_start;
        let new_tail_start = info.offset + new_padded;
        self.data
            .copy_within(tail_start..tail_start + tail_len, new_tail_start);

        if new_padded > old_padded {
            self.data[info.offset + info.length..new_tail_start].fill(0);
        }

        let desc = descriptor_mut(self.data, slot)?;
        desc.set_length(new_length as u32);

        // Rewrite offsets of every later slot.
        let delta = new_padded as i64 - old_padded as i64;
        for later in slot + 1..count {
            let desc = descriptor_mut(self.data, later)?;
            let shifted = (desc.offset() as i64 + delta) as u32;
            desc.set_offset(shifted);
        }

        Ok(())
    }

    /// Mutable raw payload bytes of a slot.
    pub fn bytes_mut(&mut self, slot: usize) -> Result<&mut [u8]> {
        let info = self.describe(slot)?;
        ensure!(
            info.offset + info.length <= self.data.len(),
            "segment {} escapes block bounds: {}+{} > {}",
            slot,
            info.offset,
            info.length,
            self.data.len()
        );
        Ok(&mut self.data[info.offset..info.offset + info.length])
    }

    /// Mutable typed header view over a slot's leading bytes.
    pub fn get_mut<T>(&mut self, slot: usize) -> Result<&mut T>
    where
        T: FromBytes + IntoBytes + KnownLayout + Immutable,
    {
        let bytes = self.bytes_mut(slot)?;
        ensure!(
            bytes.len() >= size_of::<T>(),
            "segment {} too small for {}: {} < {}",
            slot,
            core::any::type_name::<T>(),
            bytes.len(),
            size_of::<T>()
        );
        let size = size_of::<T>();
        T::mut_from_bytes(&mut bytes[..size])
            .map_err(|e| eyre::eyre!("segment {slot} cast failed: {e:?}"))
    }

    /// Mutable typed array view over a slot's payload.
    pub fn slice_mut<T>(&mut self, slot: usize) -> Result<&mut [T]>
    where
        T: FromBytes + IntoBytes + KnownLayout + Immutable,
    {
        let bytes = self.bytes_mut(slot)?;
        ensure!(
            bytes.len() % size_of::<T>() == 0,
            "segment {} length {} not a multiple of {}",
            slot,
            bytes.len(),
            size_of::<T>()
        );
        <[T]>::mut_from_bytes(bytes)
            .map_err(|e| eyre::eyre!("segment {slot} slice cast failed: {e:?}"))
    }

    /// Checks directory invariants: contiguity, in-bounds payloads,
    /// monotone offsets. Used by the structural checker and debug builds.
    pub fn validate(&self) -> Result<()> {
        validate(&self.reader())
    }
}

/// Validates directory invariants of an initialized block.
pub fn validate(alloc: &PackedAllocator<'_>) -> Result<()> {
    let count = alloc.segment_count()?;
    let mut expected = payload_base(count);
    for slot in 0..count {
        let info = alloc.describe(slot)?;
        ensure!(
            info.offset == expected,
            "segment {} offset {} != expected {} (directory not contiguous)",
            slot,
            info.offset,
            expected
        );
        expected += round_up(info.length);
        if info.kind == KIND_EMPTY {
            ensure!(
                info.length == 0,
                "empty segment {} has nonzero length {}",
                slot,
                info.length
            );
        }
    }
    ensure!(
        expected <= alloc.data.len(),
        "segments overflow block: {} > {}",
        expected,
        alloc.data.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BLOCK_SIZE;
    use zerocopy::little_endian::U64;

    fn block() -> Vec<u8> {
        vec![0u8; BLOCK_SIZE]
    }

    #[test]
    fn init_formats_empty_directory() {
        let mut data = block();
        let alloc = PackedAllocatorMut::init(&mut data, 5).unwrap();
        assert_eq!(alloc.segment_count().unwrap(), 5);
        for slot in 0..5 {
            assert_eq!(alloc.kind(slot).unwrap(), KIND_EMPTY);
            assert_eq!(alloc.length(slot).unwrap(), 0);
        }
        alloc.validate().unwrap();
    }

    #[test]
    fn allocate_places_payloads_in_directory_order() {
        let mut data = block();
        let mut alloc = PackedAllocatorMut::init(&mut data, 3).unwrap();
        alloc.allocate(0, KIND_NODE_HEADER, 16).unwrap();
        alloc.allocate(1, KIND_PAYLOAD, 100).unwrap();
        alloc.allocate(2, KIND_CHILD_IDS, 64).unwrap();

        let a = alloc.describe(0).unwrap();
        let b = alloc.describe(1).unwrap();
        let c = alloc.describe(2).unwrap();
        assert_eq!(b.offset, a.offset + round_up(16));
        assert_eq!(c.offset, b.offset + round_up(100));
        alloc.validate().unwrap();
    }

    #[test]
    fn resize_shifts_later_segments_and_preserves_content() {
        let mut data = block();
        let mut alloc = PackedAllocatorMut::init(&mut data, 3).unwrap();
        alloc.allocate(0, KIND_NODE_HEADER, 8).unwrap();
        alloc.allocate(1, KIND_PAYLOAD, 24).unwrap();
        alloc.allocate(2, KIND_CHILD_IDS, 16).unwrap();

        alloc.bytes_mut(2).unwrap().copy_from_slice(&[7u8; 16]);
        alloc.resize(1, 120).unwrap();

        assert_eq!(alloc.length(1).unwrap(), 120);
        assert_eq!(alloc.bytes(2).unwrap(), &[7u8; 16]);
        // Grown bytes are zeroed.
        assert!(alloc.bytes(1).unwrap()[24..].iter().all(|&b| b == 0));
        alloc.validate().unwrap();
    }

    #[test]
    fn resize_over_capacity_fails_without_truncation() {
        let mut data = block();
        let mut alloc = PackedAllocatorMut::init(&mut data, 2).unwrap();
        alloc.allocate(0, KIND_NODE_HEADER, 8).unwrap();
        alloc.allocate(1, KIND_PAYLOAD, 128).unwrap();

        let err = alloc.resize(1, BLOCK_SIZE * 2).unwrap_err();
        assert!(err.downcast_ref::<CapacityExceeded>().is_some());
        // Original length untouched.
        assert_eq!(alloc.length(1).unwrap(), 128);
        alloc.validate().unwrap();
    }

    #[test]
    fn typed_views_round_trip() {
        let mut data = block();
        let mut alloc = PackedAllocatorMut::init(&mut data, 1).unwrap();
        alloc.allocate(0, KIND_PAYLOAD, 32).unwrap();

        {
            let vals = alloc.slice_mut::<U64>(0).unwrap();
            assert_eq!(vals.len(), 4);
            vals[2] = U64::new(0xdead_beef);
        }

        let ro = PackedAllocator::from_block(&data).unwrap();
        let vals = ro.slice::<U64>(0).unwrap();
        assert_eq!(vals[2].get(), 0xdead_beef);
    }

    #[test]
    fn shrink_returns_space() {
        let mut data = block();
        let mut alloc = PackedAllocatorMut::init(&mut data, 2).unwrap();
        alloc.allocate(0, KIND_PAYLOAD, 1024).unwrap();
        alloc.allocate(1, KIND_CHILD_IDS, 64).unwrap();
        let free_before = alloc.free_space().unwrap();

        alloc.resize(0, 512).unwrap();
        assert_eq!(alloc.free_space().unwrap(), free_before + 512);
        alloc.validate().unwrap();
    }

    #[test]
    fn double_allocate_is_a_contract_violation() {
        let mut data = block();
        let mut alloc = PackedAllocatorMut::init(&mut data, 1).unwrap();
        alloc.allocate(0, KIND_PAYLOAD, 8).unwrap();
        let err = alloc.allocate(0, KIND_PAYLOAD, 8).unwrap_err();
        assert!(err.downcast_ref::<CapacityExceeded>().is_none());
    }

    #[test]
    fn free_reopens_slot() {
        let mut data = block();
        let mut alloc = PackedAllocatorMut::init(&mut data, 2).unwrap();
        alloc.allocate(0, KIND_PAYLOAD, 256).unwrap();
        alloc.allocate(1, KIND_CHILD_IDS, 64).unwrap();
        alloc.free(0).unwrap();
        assert_eq!(alloc.kind(0).unwrap(), KIND_EMPTY);
        alloc.allocate(0, KIND_SUMTREE_META, 16).unwrap();
        alloc.validate().unwrap();
    }
}
