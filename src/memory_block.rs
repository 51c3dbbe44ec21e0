//! `MemoryBlock`: one OS-backed region served by first-fit bitfield scanning.
//!
//! Grounded on `Qentem::MemoryBlock` (`original_source/Include/Qentem/MemoryBlock.hpp`):
//! a single reservation carries its own allocation table instead of per-chunk
//! headers. The table lives at the front of the reservation; `data` is the
//! first chunk-aligned address after it. A set bit means the chunk at that
//! index is reserved.

use core::mem::size_of;

use crate::platform;
use crate::{stat_add, stat_inc};

const WORD_BITS: usize = usize::BITS as usize;

#[inline]
fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[inline]
fn bit_is_set(word: usize, bit: usize) -> bool {
    (word >> bit) & 1 != 0
}

/// A single OS-backed reservation, self-describing via an internal bitfield
/// table. Not `Clone`: a block owns exactly one OS mapping, released on drop.
pub struct MemoryBlock {
    base: *mut u8,
    data: *mut u8,
    capacity: usize,
    usable_size: usize,
    chunk_align: usize,
    total_chunks: usize,
    available: usize,
    table: *mut usize,
    table_size: usize,
    next_index: usize,
    /// Set once this block has been handed out whole, untracked by the
    /// bitfield table (an oversized request that can only serve itself).
    /// While set, `contains`/`is_empty` reason about `base..base+capacity`
    /// instead of `data..data+usable_size`.
    whole: bool,
}

unsafe impl Send for MemoryBlock {}

impl MemoryBlock {
    /// Reserve a new block able to serve at least `requested_capacity` bytes
    /// of chunks, rounded up to a whole number of OS pages. Returns `None` on
    /// OS reservation failure.
    pub fn new(requested_capacity: usize, chunk_align: usize) -> Option<Self> {
        let page = platform::page_size() as usize;
        let capacity = round_up(requested_capacity.max(page), page);

        let base = unsafe { platform::reserve(capacity, false) };
        if base.is_null() {
            log::warn!("MemoryBlock::new: OS reservation of {capacity} bytes failed");
            return None;
        }
        stat_inc!(os_reserve_count);
        stat_add!(os_reserve_bytes, capacity);

        let raw_chunks = capacity / chunk_align;
        let table_words = raw_chunks.div_ceil(WORD_BITS).max(1);
        let table_bytes = table_words * size_of::<usize>();
        let data_offset = round_up(table_bytes, chunk_align);
        let usable_size = capacity - data_offset;
        let total_chunks = usable_size / chunk_align;
        let table_size = total_chunks.div_ceil(WORD_BITS).max(1);

        let table = base as *mut usize;
        let data = unsafe { base.add(data_offset) };

        let mut block = Self {
            base,
            data,
            capacity,
            usable_size,
            chunk_align,
            total_chunks,
            available: total_chunks,
            table,
            table_size,
            next_index: 0,
            whole: false,
        };
        block.clear_table();

        stat_inc!(block_create_count);
        log::trace!(
            "MemoryBlock::new: capacity={capacity} chunk_align={chunk_align} total_chunks={total_chunks}"
        );
        Some(block)
    }

    fn table_slice(&self) -> &[usize] {
        unsafe { core::slice::from_raw_parts(self.table, self.table_size) }
    }

    fn table_slice_mut(&mut self) -> &mut [usize] {
        unsafe { core::slice::from_raw_parts_mut(self.table, self.table_size) }
    }

    pub fn clear_table(&mut self) {
        for word in self.table_slice_mut() {
            *word = 0;
        }
    }

    pub fn data_ptr(&self) -> *mut u8 {
        self.data
    }

    pub fn base_ptr(&self) -> *mut u8 {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn usable_size(&self) -> usize {
        self.usable_size
    }

    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    pub fn available_chunks(&self) -> usize {
        self.available
    }

    pub fn is_exhausted(&self) -> bool {
        self.available == 0
    }

    /// Whether every chunk this block can serve is currently free.
    pub fn is_empty(&self) -> bool {
        self.available == self.total_chunks
    }

    /// Whether this block was handed out whole, untracked by the bitfield
    /// table (see [`reserve_whole`](Self::reserve_whole)).
    pub fn is_whole(&self) -> bool {
        self.whole
    }

    /// Whether `ptr` falls inside this block's usable region.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let (start, end) = if self.whole {
            (self.base as usize, self.base as usize + self.capacity)
        } else {
            (self.data as usize, self.data as usize + self.usable_size)
        };
        let p = ptr as usize;
        p >= start && p < end
    }

    /// Hand out this block's entire capacity as a single untracked
    /// reservation, bypassing the bitfield table entirely. Grounded on
    /// `Reserver.hpp`'s `Reserve` phase that skips tracking once a freshly
    /// constructed block can only ever serve the one request that justified
    /// it: since `capacity` (not `usable_size`) is always rounded up to
    /// cover at least `bytes_needed`, returning a pointer anchored in
    /// `base..base+capacity` recovers the table-overhead bytes that
    /// `usable_size` would otherwise have subtracted away. Returns `None` if
    /// `align` can't be satisfied within this block's capacity.
    pub fn reserve_whole(&mut self, align: usize, bytes_needed: usize) -> Option<*mut u8> {
        let raw_addr = self.base as usize;
        let aligned_addr = if align <= 1 {
            raw_addr
        } else {
            (raw_addr + align - 1) & !(align - 1)
        };
        let skip = aligned_addr - raw_addr;
        if skip + bytes_needed > self.capacity {
            return None;
        }
        self.available = 0;
        self.whole = true;
        Some(aligned_addr as *mut u8)
    }

    /// Undo [`reserve_whole`](Self::reserve_whole): the block's bitfield
    /// table was never touched, so releasing it is just restoring full
    /// availability and dropping the untracked flag.
    pub fn release_whole(&mut self) {
        self.available = self.total_chunks;
        self.whole = false;
    }

    fn mark_range(&mut self, start_bit: usize, len: usize, set: bool) {
        let table = self.table_slice_mut();
        let mut remaining = len;
        let mut word_idx = start_bit / WORD_BITS;
        let mut bit_idx = start_bit % WORD_BITS;
        while remaining > 0 {
            let take = (WORD_BITS - bit_idx).min(remaining);
            let mask = if take == WORD_BITS {
                usize::MAX
            } else {
                ((1usize << take) - 1) << bit_idx
            };
            if set {
                table[word_idx] |= mask;
            } else {
                table[word_idx] &= !mask;
            }
            remaining -= take;
            word_idx += 1;
            bit_idx = 0;
        }
    }

    /// First-fit scan for a run of at least `chunks` consecutive free bits,
    /// starting from the `next_index` word hint, whose resulting address
    /// satisfies `align`. Skips whole reserved words (`word == MAX`) and
    /// consumes whole free words (`word == 0`) without a per-bit loop; only
    /// a partially-occupied word falls back to bit-by-bit inspection.
    ///
    /// When `align` is no stricter than this block's native chunk alignment,
    /// every free chunk boundary already satisfies it and the first run of
    /// exactly `chunks` free bits is used. Otherwise (`align >
    /// chunk_align`), a run is only usable once it's long enough to both
    /// reach an `align`-satisfying address *and* still cover `chunks` beyond
    /// it, mirroring `Reserver.hpp`'s `reserveFirstFit` leading-chunk skip.
    pub fn reserve_region(&mut self, chunks: usize, align: usize) -> Option<*mut u8> {
        if chunks == 0 || chunks > self.total_chunks || self.available < chunks {
            return None;
        }

        let total_chunks = self.total_chunks;
        let mut bit = (self.next_index * WORD_BITS).min(total_chunks);
        let mut run_start: Option<usize> = None;
        let mut run_len = 0usize;

        while bit < total_chunks {
            let word_idx = bit / WORD_BITS;
            let word = self.table_slice()[word_idx];

            if word == usize::MAX {
                run_start = None;
                run_len = 0;
                bit = (word_idx + 1) * WORD_BITS;
                continue;
            }

            if word == 0 {
                if run_start.is_none() {
                    run_start = Some(bit);
                }
                let bits_left_in_word = WORD_BITS - (bit % WORD_BITS);
                let bits_left_in_block = total_chunks - bit;
                let take = bits_left_in_word.min(bits_left_in_block);
                run_len += take;
                bit += take;
            } else if bit_is_set(word, bit % WORD_BITS) {
                run_start = None;
                run_len = 0;
                bit += 1;
            } else {
                if run_start.is_none() {
                    run_start = Some(bit);
                }
                run_len += 1;
                bit += 1;
            }

            if run_len >= chunks {
                let start = run_start.expect("run_len > 0 implies run_start is set");
                if let Some(aligned_start) =
                    Self::skip_to_alignment(self.data, self.chunk_align, start, run_len, chunks, align)
                {
                    self.mark_range(aligned_start, chunks, true);
                    self.available -= chunks;
                    self.next_index = (aligned_start + chunks) / WORD_BITS;
                    return Some(unsafe { self.data.add(aligned_start * self.chunk_align) });
                }
            }
        }

        None
    }

    /// Within a free run of `run_len` chunks starting at `start`, find the
    /// earliest chunk index whose address satisfies `align` and still
    /// leaves room for `chunks`. Returns `None` if even the full run can't
    /// satisfy both.
    fn skip_to_alignment(
        data: *mut u8,
        chunk_align: usize,
        start: usize,
        run_len: usize,
        chunks: usize,
        align: usize,
    ) -> Option<usize> {
        if align <= chunk_align {
            return Some(start);
        }
        let raw_addr = (data as usize) + start * chunk_align;
        let aligned_addr = (raw_addr + align - 1) & !(align - 1);
        let skip = (aligned_addr - raw_addr) / chunk_align;
        if run_len >= skip + chunks {
            Some(start + skip)
        } else {
            None
        }
    }

    /// Try to grow a reservation in place by `extra_chunks`, immediately
    /// following the `old_chunks` already reserved at `ptr`. Fails (without
    /// side effects) if the extra region runs past the block or any chunk in
    /// it is already reserved.
    pub fn try_expand(&mut self, ptr: *mut u8, old_chunks: usize, extra_chunks: usize) -> bool {
        if self.whole {
            return false;
        }
        if extra_chunks == 0 {
            return true;
        }
        let offset = (ptr as usize) - (self.data as usize);
        let start_bit = offset / self.chunk_align;
        let extra_start = start_bit + old_chunks;
        let extra_end = extra_start + extra_chunks;
        if extra_end > self.total_chunks {
            return false;
        }

        let table = self.table_slice();
        for bit in extra_start..extra_end {
            if bit_is_set(table[bit / WORD_BITS], bit % WORD_BITS) {
                return false;
            }
        }

        self.mark_range(extra_start, extra_chunks, true);
        self.available -= extra_chunks;
        true
    }

    /// Release a region previously returned by [`reserve_region`]. Caller
    /// guarantees `ptr` was returned by this exact block and `chunks` matches
    /// the original request.
    pub fn release_region(&mut self, ptr: *mut u8, chunks: usize) {
        let offset = (ptr as usize) - (self.data as usize);
        let start_bit = offset / self.chunk_align;
        self.mark_range(start_bit, chunks, false);
        self.available += chunks;
        self.next_index = self.next_index.min(start_bit / WORD_BITS);
    }

    /// Truncate a reservation in place, freeing the trailing
    /// `old_chunks - new_chunks` chunks back to the bitfield. Mirror image
    /// of [`try_expand`](Self::try_expand); fails for a whole-block
    /// reservation since that wasn't bitfield-tracked to begin with.
    pub fn shrink(&mut self, ptr: *mut u8, old_chunks: usize, new_chunks: usize) -> bool {
        if self.whole || new_chunks >= old_chunks {
            return false;
        }
        let offset = (ptr as usize) - (self.data as usize);
        let start_bit = offset / self.chunk_align;
        let freed_start = start_bit + new_chunks;
        let freed_len = old_chunks - new_chunks;
        self.mark_range(freed_start, freed_len, false);
        self.available += freed_len;
        self.next_index = self.next_index.min(freed_start / WORD_BITS);
        true
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        unsafe {
            platform::release(self.base, self.capacity);
        }
        stat_inc!(block_destroy_count);
        log::trace!("MemoryBlock::drop: released {} bytes", self.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_block_starts_fully_available() {
        let block = MemoryBlock::new(64 * 1024, 16).expect("reservation should succeed");
        assert_eq!(block.available_chunks(), block.total_chunks());
        assert!(!block.is_exhausted());
    }

    #[test]
    fn reserve_then_release_round_trips() {
        let mut block = MemoryBlock::new(64 * 1024, 16).expect("reservation should succeed");
        let total = block.available_chunks();

        let ptr = block.reserve_region(4, 16).expect("should have room for 4 chunks");
        assert_eq!(block.available_chunks(), total - 4);
        assert!(block.contains(ptr));

        block.release_region(ptr, 4);
        assert_eq!(block.available_chunks(), total);
    }

    #[test]
    fn first_fit_skips_reserved_run() {
        let mut block = MemoryBlock::new(64 * 1024, 16).expect("reservation should succeed");
        let first = block.reserve_region(2, 16).unwrap();
        let second = block.reserve_region(2, 16).unwrap();
        assert_ne!(first, second);
        block.release_region(first, 2);
        // next_index rewinds to the freed word, so the next reservation of
        // equal-or-smaller size reuses the freed run rather than growing the
        // high-water mark.
        let third = block.reserve_region(2, 16).unwrap();
        assert_eq!(first, third);
    }

    #[test]
    fn exhausts_when_no_run_large_enough() {
        let mut block = MemoryBlock::new(64 * 1024, 16).expect("reservation should succeed");
        let total = block.total_chunks();
        assert!(block.reserve_region(total + 1, 16).is_none());
    }

    #[test]
    fn try_expand_grows_in_place_when_free() {
        let mut block = MemoryBlock::new(64 * 1024, 16).expect("reservation should succeed");
        let ptr = block.reserve_region(2, 16).unwrap();
        assert!(block.try_expand(ptr, 2, 3));
        assert_eq!(block.available_chunks(), block.total_chunks() - 5);
    }

    #[test]
    fn try_expand_fails_when_neighbor_reserved() {
        let mut block = MemoryBlock::new(64 * 1024, 16).expect("reservation should succeed");
        let ptr = block.reserve_region(2, 16).unwrap();
        let _blocker = block.reserve_region(1, 16).unwrap();
        assert!(!block.try_expand(ptr, 2, 3));
    }

    #[test]
    fn crosses_word_boundary() {
        let mut block = MemoryBlock::new(64 * 1024, 16).expect("reservation should succeed");
        // Request a run wider than one table word so the free-word fast path
        // and the per-bit path both have to cooperate across the boundary.
        let chunks = WORD_BITS + 8;
        let ptr = block.reserve_region(chunks, 16);
        assert!(ptr.is_some());
    }

    #[test]
    fn reserve_region_honors_stricter_alignment() {
        let mut block = MemoryBlock::new(64 * 1024, 16).expect("reservation should succeed");
        // Force an odd starting offset so the aligned candidate isn't the
        // first free chunk, exercising the leading-chunk skip.
        let _spacer = block.reserve_region(1, 16).unwrap();
        let ptr = block.reserve_region(4, 128).expect("alignment should still be satisfiable");
        assert_eq!(ptr as usize % 128, 0);
    }

    #[test]
    fn reserve_whole_covers_the_full_capacity() {
        let mut block = MemoryBlock::new(64 * 1024, 16).expect("reservation should succeed");
        let capacity = block.capacity();
        let ptr = block
            .reserve_whole(16, capacity)
            .expect("whole-block reservation should fit its own capacity");
        assert!(block.is_exhausted());
        assert!(block.contains(ptr));
        assert!(block.is_whole());

        block.release_whole();
        assert!(!block.is_whole());
        assert!(block.is_empty());
    }

    #[test]
    fn shrink_frees_the_trailing_chunks() {
        let mut block = MemoryBlock::new(64 * 1024, 16).expect("reservation should succeed");
        let total = block.available_chunks();
        let ptr = block.reserve_region(8, 16).unwrap();
        assert!(block.shrink(ptr, 8, 3));
        assert_eq!(block.available_chunks(), total - 3);
    }
}
