//! The bucket-packed byte buffer backing a table.
//!
//! The buffer is a run of large buckets. Each bucket starts with a 2-byte
//! occupancy bitmap (2 bits per slot) followed by 8 fixed-stride slots, each
//! holding `key_size` key bytes then `value_size` value bytes:
//!
//! ```text
//! | bitmap (2) | slot 0 (k+v) | slot 1 (k+v) | ... | slot 7 (k+v) | bitmap (2) | ...
//! ```
//!
//! All offset arithmetic lives here. Callers address slots by index and only
//! ever see key, value, or whole-entry slices.

use alloc::alloc::alloc_zeroed;
use alloc::boxed::Box;
use core::alloc::Layout;

use crate::error::Error;
use crate::error::Result;

/// Slots per large bucket.
pub(crate) const SLOTS_PER_BUCKET: usize = 8;

const BITMAP_BYTES: usize = 2;
const STATE_BITS: usize = 2;
const STATE_MASK: u16 = 0b11;

#[inline(always)]
fn prefetch(ptr: *const u8) {
    cfg_if::cfg_if! {
        if #[cfg(all(target_arch = "x86_64", target_feature = "sse"))] {
            // SAFETY: prefetching is a hint and never faults, and `ptr` points
            // into the store anyway.
            unsafe {
                use core::arch::x86_64::*;
                _mm_prefetch(ptr as *const i8, _MM_HINT_T0);
            }
        } else {
            let _ = ptr;
        }
    }
}

/// Occupancy of a single slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum SlotState {
    /// Never written. Terminates a search.
    Empty = 0b00,
    /// Holds a valid key and value.
    Live = 0b01,
    /// Vacated by a removal. Searches continue past it.
    Tombstone = 0b10,
}

impl SlotState {
    #[inline(always)]
    fn from_bits(bits: u16) -> Self {
        match bits & STATE_MASK {
            0b00 => SlotState::Empty,
            0b01 => SlotState::Live,
            // 0b11 is never written; treat it like a tombstone so that a
            // search keeps going instead of trusting the slot.
            _ => SlotState::Tombstone,
        }
    }
}

/// Dimensions and addressing of a bucket store.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BucketLayout {
    key_size: usize,
    value_size: usize,
    entry_size: usize,
    bucket_stride: usize,
    slots: usize,
    buckets: usize,
    bytes: usize,
}

impl BucketLayout {
    pub(crate) fn new(slots: u64, key_size: usize, value_size: usize) -> Result<Self> {
        let slots = usize::try_from(slots).map_err(|_| Error::LayoutOverflow)?;
        let entry_size = key_size
            .checked_add(value_size)
            .ok_or(Error::LayoutOverflow)?;
        let bucket_stride = entry_size
            .checked_mul(SLOTS_PER_BUCKET)
            .and_then(|s| s.checked_add(BITMAP_BYTES))
            .ok_or(Error::LayoutOverflow)?;
        let buckets = slots.div_ceil(SLOTS_PER_BUCKET);
        let bytes = buckets
            .checked_mul(bucket_stride)
            .filter(|&b| b <= isize::MAX as usize)
            .ok_or(Error::LayoutOverflow)?;

        Ok(Self {
            key_size,
            value_size,
            entry_size,
            bucket_stride,
            slots,
            buckets,
            bytes,
        })
    }

    pub(crate) fn key_size(&self) -> usize {
        self.key_size
    }

    pub(crate) fn value_size(&self) -> usize {
        self.value_size
    }

    pub(crate) fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub(crate) fn slots(&self) -> usize {
        self.slots
    }

    pub(crate) fn buckets(&self) -> usize {
        self.buckets
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    #[inline(always)]
    fn bitmap_offset(&self, index: usize) -> usize {
        (index / SLOTS_PER_BUCKET) * self.bucket_stride
    }

    #[inline(always)]
    fn entry_offset(&self, index: usize) -> usize {
        self.bitmap_offset(index) + BITMAP_BYTES + (index % SLOTS_PER_BUCKET) * self.entry_size
    }
}

/// Owned, zero-initialized bucket buffer.
pub(crate) struct BucketStore {
    layout: BucketLayout,
    bytes: Box<[u8]>,
}

impl BucketStore {
    /// Allocates a zeroed buffer for `layout`. Every slot starts out
    /// [`SlotState::Empty`].
    pub(crate) fn allocate(layout: BucketLayout) -> Result<Self> {
        let size = layout.bytes();
        let alloc_layout = Layout::array::<u8>(size).map_err(|_| Error::LayoutOverflow)?;
        if size == 0 {
            return Ok(Self {
                layout,
                bytes: Box::default(),
            });
        }

        // SAFETY: `alloc_layout` has a non-zero size. A null return is turned
        // into an error, otherwise the block is `size` initialized (zeroed)
        // bytes allocated with the layout `Box<[u8]>` deallocates with.
        let bytes = unsafe {
            let ptr = alloc_zeroed(alloc_layout);
            if ptr.is_null() {
                return Err(Error::Alloc { size });
            }
            Box::from_raw(core::ptr::slice_from_raw_parts_mut(ptr, size))
        };

        Ok(Self { layout, bytes })
    }

    pub(crate) fn layout(&self) -> &BucketLayout {
        &self.layout
    }

    #[inline(always)]
    fn bitmap(&self, index: usize) -> u16 {
        let offset = self.layout.bitmap_offset(index);
        u16::from_le_bytes([self.bytes[offset], self.bytes[offset + 1]])
    }

    #[inline(always)]
    pub(crate) fn state(&self, index: usize) -> SlotState {
        debug_assert!(index < self.layout.slots);
        let shift = (index % SLOTS_PER_BUCKET) * STATE_BITS;
        SlotState::from_bits(self.bitmap(index) >> shift)
    }

    #[inline(always)]
    pub(crate) fn set_state(&mut self, index: usize, state: SlotState) {
        debug_assert!(index < self.layout.slots);
        let shift = (index % SLOTS_PER_BUCKET) * STATE_BITS;
        let bitmap = (self.bitmap(index) & !(STATE_MASK << shift)) | ((state as u16) << shift);

        let offset = self.layout.bitmap_offset(index);
        self.bytes[offset..offset + BITMAP_BYTES].copy_from_slice(&bitmap.to_le_bytes());
    }

    #[inline(always)]
    pub(crate) fn entry(&self, index: usize) -> &[u8] {
        debug_assert!(index < self.layout.slots);
        let offset = self.layout.entry_offset(index);
        &self.bytes[offset..offset + self.layout.entry_size]
    }

    #[inline(always)]
    pub(crate) fn entry_mut(&mut self, index: usize) -> &mut [u8] {
        debug_assert!(index < self.layout.slots);
        let offset = self.layout.entry_offset(index);
        &mut self.bytes[offset..offset + self.layout.entry_size]
    }

    #[inline(always)]
    pub(crate) fn key(&self, index: usize) -> &[u8] {
        &self.entry(index)[..self.layout.key_size]
    }

    #[inline(always)]
    pub(crate) fn value(&self, index: usize) -> &[u8] {
        &self.entry(index)[self.layout.key_size..]
    }

    #[inline(always)]
    pub(crate) fn value_mut(&mut self, index: usize) -> &mut [u8] {
        let key_size = self.layout.key_size;
        &mut self.entry_mut(index)[key_size..]
    }

    /// Exchanges the entry at `index` with `entry`. The slot state is left
    /// alone.
    #[inline(always)]
    pub(crate) fn swap(&mut self, index: usize, entry: &mut [u8]) {
        self.entry_mut(index).swap_with_slice(entry);
    }

    /// Hints the CPU to pull the bucket holding `index` into cache.
    #[inline(always)]
    pub(crate) fn prefetch(&self, index: usize) {
        if let Some(byte) = self.bytes.get(self.layout.bitmap_offset(index)) {
            prefetch(byte);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(slots: u64, key_size: usize, value_size: usize) -> BucketStore {
        BucketStore::allocate(BucketLayout::new(slots, key_size, value_size).unwrap()).unwrap()
    }

    #[test]
    fn layout_dimensions() {
        let layout = BucketLayout::new(10, 6, 8).unwrap();
        assert_eq!(layout.entry_size(), 14);
        assert_eq!(layout.buckets(), 2);
        assert_eq!(layout.bytes(), 2 * (8 * 14 + 2));

        assert_eq!(layout.bitmap_offset(0), 0);
        assert_eq!(layout.entry_offset(0), 2);
        assert_eq!(layout.entry_offset(7), 2 + 7 * 14);
        assert_eq!(layout.bitmap_offset(8), 8 * 14 + 2);
        assert_eq!(layout.entry_offset(9), 8 * 14 + 2 + 2 + 14);
    }

    #[test]
    fn layout_overflow_is_an_error() {
        assert!(matches!(
            BucketLayout::new(1 << 40, usize::MAX / 4, 0),
            Err(Error::LayoutOverflow)
        ));
        assert!(matches!(
            BucketLayout::new(8, usize::MAX, 1),
            Err(Error::LayoutOverflow)
        ));
    }

    #[test]
    fn fresh_store_is_empty() {
        let store = store(16, 4, 4);
        for index in 0..16 {
            assert_eq!(store.state(index), SlotState::Empty);
            assert_eq!(store.entry(index), &[0u8; 8]);
        }
    }

    #[test]
    fn states_are_independent() {
        let mut store = store(16, 1, 1);
        store.set_state(3, SlotState::Live);
        store.set_state(4, SlotState::Tombstone);
        store.set_state(7, SlotState::Live);
        store.set_state(8, SlotState::Live);

        let expected = |i: usize| match i {
            3 | 7 | 8 => SlotState::Live,
            4 => SlotState::Tombstone,
            _ => SlotState::Empty,
        };
        for index in 0..16 {
            assert_eq!(store.state(index), expected(index), "slot {index}");
        }

        store.set_state(7, SlotState::Empty);
        assert_eq!(store.state(7), SlotState::Empty);
        assert_eq!(store.state(3), SlotState::Live);
    }

    #[test]
    fn entries_do_not_overlap_bitmaps() {
        let mut store = store(16, 2, 3);
        for index in 0..16 {
            store.entry_mut(index).fill(0xff);
        }
        for index in 0..16 {
            assert_eq!(store.state(index), SlotState::Empty);
            assert_eq!(store.key(index), &[0xff; 2]);
            assert_eq!(store.value(index), &[0xff; 3]);
        }
    }

    #[test]
    fn swap_exchanges_entry() {
        let mut store = store(8, 2, 2);
        store.entry_mut(5).copy_from_slice(b"abcd");
        let mut candidate = *b"wxyz";
        store.swap(5, &mut candidate);

        assert_eq!(store.entry(5), b"wxyz");
        assert_eq!(&candidate, b"abcd");
        store.value_mut(5).copy_from_slice(b"12");
        assert_eq!(store.key(5), b"wx");
        assert_eq!(store.value(5), b"12");
    }
}
