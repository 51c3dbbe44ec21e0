//! `ReserverCore` and the `Reserver` façade.
//!
//! Grounded on `Qentem::Reserver`'s block-pool management
//! (`original_source/Include/Qentem/Reserver.hpp`'s `Reserve`/`Release`
//! entry points) and on the teacher's per-core cache split between an
//! "active" pool and a spilled-over pool (`thread_cache.rs`'s
//! free-list-vs-central-cache shape), reworked around whole blocks instead of
//! per-size-class spans: blocks that still have room live in `blocks`, full
//! ones move to `exhausted_blocks` until a release frees them back up.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::marker::PhantomData;

use crate::config::{DefaultConfig, ReserverConfig};
use crate::cpu::CpuHelper;
use crate::error::ReserverError;
use crate::memory_block::MemoryBlock;
use crate::{stat_add, stat_inc};
use crate::sync::SpinMutex;

/// One logical CPU's block pool. Never shared outside a `Reserver`'s
/// `cores` array; cross-core access always goes through that array's own
/// `SpinMutex`, never through a second handle to the same core.
struct ReserverCore<C: ReserverConfig> {
    blocks: Vec<MemoryBlock>,
    exhausted_blocks: Vec<MemoryBlock>,
    _config: PhantomData<C>,
}

impl<C: ReserverConfig> ReserverCore<C> {
    const fn new() -> Self {
        Self {
            blocks: Vec::new(),
            exhausted_blocks: Vec::new(),
            _config: PhantomData,
        }
    }

    /// Keep the block with the largest usable capacity at index 0, so the
    /// common case (reserve hits the leader) skips scanning the rest of the
    /// pool. Compares static usable size, not current availability: a
    /// block's usable size never changes after construction, so this only
    /// needs re-running when the active pool's membership changes (a block
    /// is inserted or reattached), not on every release.
    fn promote_leader(&mut self) {
        if self.blocks.len() < 2 {
            return;
        }
        let mut best = 0;
        for i in 1..self.blocks.len() {
            if self.blocks[i].usable_size() > self.blocks[best].usable_size() {
                best = i;
            }
        }
        if best != 0 {
            self.blocks.swap(0, best);
        }
    }

    fn reserve_chunks(&mut self, chunks: usize, align: usize) -> Option<*mut u8> {
        for i in 0..self.blocks.len() {
            if let Some(ptr) = self.blocks[i].reserve_region(chunks, align) {
                if self.blocks[i].is_exhausted() {
                    let block = self.blocks.swap_remove(i);
                    self.exhausted_blocks.push(block);
                    stat_inc!(block_detach_count);
                }
                return Some(ptr);
            }
        }

        let needed_bytes = chunks * C::CHUNK_ALIGN;
        let align_pad = align.saturating_sub(C::CHUNK_ALIGN);
        let block_size = needed_bytes.max(C::DEFAULT_BLOCK_SIZE) + align_pad;
        let mut block = MemoryBlock::new(block_size, C::CHUNK_ALIGN)?;

        if chunks < block.total_chunks() {
            // The block has room to spare beyond this request: track it
            // normally through the bitfield table and keep it active.
            let ptr = block.reserve_region(chunks, align)?;
            self.blocks.push(block);
            self.promote_leader();
            Some(ptr)
        } else {
            // This request consumes everything the block could ever serve
            // (or more, once table overhead is counted): don't bother
            // tracking it at all, hand back the block's raw capacity
            // untracked, and file it straight into `exhausted_blocks` —
            // mirrors `Reserver.hpp`'s untracked whole-block path.
            let ptr = block.reserve_whole(align, needed_bytes)?;
            self.exhausted_blocks.push(block);
            Some(ptr)
        }
    }

    fn release_chunks(&mut self, ptr: *mut u8, chunks: usize) -> bool {
        for i in 0..self.blocks.len() {
            if self.blocks[i].contains(ptr) {
                self.blocks[i].release_region(ptr, chunks);
                if i != 0 && self.blocks[i].is_empty() {
                    // An emptied non-leader block earns its keep back; drop
                    // it rather than let the active pool grow unbounded.
                    self.blocks.swap_remove(i);
                }
                return true;
            }
        }
        for i in 0..self.exhausted_blocks.len() {
            if self.exhausted_blocks[i].contains(ptr) {
                if self.exhausted_blocks[i].is_whole() {
                    self.exhausted_blocks[i].release_whole();
                } else {
                    self.exhausted_blocks[i].release_region(ptr, chunks);
                }

                let now_empty = self.exhausted_blocks[i].is_empty();
                let oversized = self.exhausted_blocks[i].capacity() > C::DEFAULT_BLOCK_SIZE;
                if now_empty && oversized {
                    // Atypically large block, fully drained: destroy it
                    // outright instead of keeping it around as dead weight.
                    self.exhausted_blocks.swap_remove(i);
                } else {
                    let block = self.exhausted_blocks.swap_remove(i);
                    self.blocks.push(block);
                    stat_inc!(block_reattach_count);
                    self.promote_leader();
                }
                return true;
            }
        }
        false
    }

    fn try_expand_chunks(&mut self, ptr: *mut u8, old_chunks: usize, extra_chunks: usize) -> bool {
        for block in self.blocks.iter_mut().chain(self.exhausted_blocks.iter_mut()) {
            if block.contains(ptr) {
                return block.try_expand(ptr, old_chunks, extra_chunks);
            }
        }
        false
    }

    fn shrink_chunks(&mut self, ptr: *mut u8, old_chunks: usize, new_chunks: usize) -> bool {
        for i in 0..self.blocks.len() {
            if self.blocks[i].contains(ptr) {
                return self.blocks[i].shrink(ptr, old_chunks, new_chunks);
            }
        }
        for i in 0..self.exhausted_blocks.len() {
            if self.exhausted_blocks[i].contains(ptr) {
                if !self.exhausted_blocks[i].shrink(ptr, old_chunks, new_chunks) {
                    return false;
                }
                // The block now has free chunks again; it no longer belongs
                // in the exhausted pool.
                let block = self.exhausted_blocks.swap_remove(i);
                self.blocks.push(block);
                stat_inc!(block_reattach_count);
                self.promote_leader();
                return true;
            }
        }
        false
    }

    fn owns(&self, ptr: *mut u8) -> bool {
        self.blocks.iter().any(|b| b.contains(ptr))
            || self.exhausted_blocks.iter().any(|b| b.contains(ptr))
    }
}

/// A per-logical-CPU memory reserver. Each `Reserver` owns one
/// [`ReserverCore`] per online CPU, each behind its own [`SpinMutex`];
/// normal-path reserve/release only ever touch the core matching the
/// calling thread's current CPU. Not a process-wide singleton: construct
/// one and keep it (e.g. behind a `static` or thread-local of your own)
/// the way the spec's thread-owned allocator model expects.
pub struct Reserver<C: ReserverConfig = DefaultConfig> {
    cores: Box<[SpinMutex<ReserverCore<C>>]>,
}

impl<C: ReserverConfig> Default for Reserver<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ReserverConfig> Reserver<C> {
    /// Build one core pool per online CPU reported by [`CpuHelper`].
    pub fn new() -> Self {
        let n = (CpuHelper::core_count() as usize).max(1);
        let mut cores = Vec::with_capacity(n);
        for _ in 0..n {
            cores.push(SpinMutex::new(ReserverCore::new()));
        }
        log::debug!("Reserver::new: {n} per-core pools, chunk_align={}", C::CHUNK_ALIGN);
        Self {
            cores: cores.into_boxed_slice(),
        }
    }

    #[inline]
    fn instance_index(&self) -> usize {
        (CpuHelper::current_core() as usize) % self.cores.len()
    }

    /// Round `bytes` up to a whole number of chunks. The only sizing
    /// operation callers need outside `reserve`/`release`/`try_expand`.
    #[inline]
    pub fn round_up_bytes(bytes: usize) -> usize {
        let align = C::CHUNK_ALIGN;
        (bytes + align - 1) & !(align - 1)
    }

    #[inline]
    fn chunks_for(bytes: usize) -> usize {
        Self::round_up_bytes(bytes) / C::CHUNK_ALIGN
    }

    /// Reserve at least `bytes` from the calling thread's current-core pool
    /// at the crate's natural chunk alignment, growing it with a fresh
    /// OS-backed block if no existing block has room.
    pub fn reserve(&self, bytes: usize) -> Result<*mut u8, ReserverError> {
        self.reserve_aligned(bytes, C::CHUNK_ALIGN)
    }

    /// Reserve at least `bytes`, aligned to `align` rather than the crate's
    /// natural chunk alignment. `align` must be a power of two and must not
    /// exceed what a single block can satisfy, or this returns
    /// [`ReserverError::InvalidAlignment`].
    pub fn reserve_aligned(&self, bytes: usize, align: usize) -> Result<*mut u8, ReserverError> {
        if align == 0 || (align & (align - 1)) != 0 || align > C::DEFAULT_BLOCK_SIZE {
            log::warn!("Reserver::reserve_aligned: invalid alignment {align}");
            return Err(ReserverError::InvalidAlignment);
        }
        let chunks = Self::chunks_for(bytes).max(1);
        let idx = self.instance_index();
        let mut core = self.cores[idx].lock();
        match core.reserve_chunks(chunks, align) {
            Some(ptr) => {
                stat_inc!(reserve_count);
                stat_add!(reserve_bytes, chunks * C::CHUNK_ALIGN);
                log::trace!(
                    "Reserver::reserve: {bytes} bytes (align={align}) -> {chunks} chunks on core {idx}"
                );
                Ok(ptr)
            }
            None => {
                log::warn!(
                    "Reserver::reserve: out of memory for {bytes} bytes (align={align}) on core {idx}"
                );
                Err(ReserverError::OutOfMemory)
            }
        }
    }

    /// Release a region previously returned by [`reserve`]. `bytes` must
    /// match the size originally requested. A null pointer is a no-op. If
    /// the calling thread has since moved cores, every other core's pool is
    /// probed before giving up with [`ReserverError::ForeignPointer`].
    pub fn release(&self, ptr: *mut u8, bytes: usize) -> Result<(), ReserverError> {
        if ptr.is_null() {
            return Ok(());
        }
        let chunks = Self::chunks_for(bytes).max(1);
        let idx = self.instance_index();

        {
            let mut core = self.cores[idx].lock();
            if core.release_chunks(ptr, chunks) {
                stat_inc!(release_count);
                return Ok(());
            }
        }

        stat_inc!(cross_core_release_count);
        for (i, slot) in self.cores.iter().enumerate() {
            if i == idx {
                continue;
            }
            let mut core = slot.lock();
            if core.release_chunks(ptr, chunks) {
                stat_inc!(release_count);
                return Ok(());
            }
        }

        stat_inc!(foreign_release_count);
        log::warn!("Reserver::release: foreign pointer {ptr:p}");
        Err(ReserverError::ForeignPointer)
    }

    /// Try to grow an existing reservation from `old_bytes` to `new_bytes`
    /// without moving it, by claiming the immediately following chunks in
    /// the same block. Returns `false` (without side effects) if they are
    /// not free, if `new_bytes <= old_bytes`, or if `ptr` is foreign.
    pub fn try_expand(&self, ptr: *mut u8, old_bytes: usize, new_bytes: usize) -> bool {
        if ptr.is_null() || new_bytes <= old_bytes {
            return false;
        }
        let old_chunks = Self::chunks_for(old_bytes).max(1);
        let new_chunks = Self::chunks_for(new_bytes).max(1);
        let extra_chunks = new_chunks - old_chunks;
        if extra_chunks == 0 {
            return true;
        }

        let idx = self.instance_index();
        if self.cores[idx].lock().try_expand_chunks(ptr, old_chunks, extra_chunks) {
            return true;
        }
        for (i, slot) in self.cores.iter().enumerate() {
            if i == idx {
                continue;
            }
            if slot.lock().try_expand_chunks(ptr, old_chunks, extra_chunks) {
                return true;
            }
        }
        false
    }

    /// Truncate an existing reservation from `old_bytes` down to `new_bytes`
    /// in place, freeing the trailing chunks back to their owning block.
    /// Mirror image of [`try_expand`](Self::try_expand). Returns `false`
    /// (without side effects) if `new_bytes >= old_bytes` or if `ptr` is
    /// foreign; a whole-block (untracked) reservation can't be shrunk and
    /// also reports `false`.
    pub fn shrink(&self, ptr: *mut u8, old_bytes: usize, new_bytes: usize) -> bool {
        if ptr.is_null() || new_bytes >= old_bytes {
            return false;
        }
        let old_chunks = Self::chunks_for(old_bytes).max(1);
        let new_chunks = Self::chunks_for(new_bytes).max(1);
        if new_chunks >= old_chunks {
            // Rounds to the same chunk count; nothing to free.
            return true;
        }

        let idx = self.instance_index();
        if self.cores[idx].lock().shrink_chunks(ptr, old_chunks, new_chunks) {
            return true;
        }
        for (i, slot) in self.cores.iter().enumerate() {
            if i == idx {
                continue;
            }
            if slot.lock().shrink_chunks(ptr, old_chunks, new_chunks) {
                return true;
            }
        }
        false
    }

    /// Whether any core pool in this reserver currently owns `ptr`. Mainly
    /// useful for tests and debug assertions.
    pub fn owns(&self, ptr: *mut u8) -> bool {
        self.cores.iter().any(|slot| slot.lock().owns(ptr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_release_round_trip() {
        let reserver: Reserver = Reserver::new();
        let ptr = reserver.reserve(128).expect("reserve should succeed");
        assert!(reserver.owns(ptr));
        reserver.release(ptr, 128).expect("release should succeed");
    }

    #[test]
    fn release_of_null_is_a_no_op() {
        let reserver: Reserver = Reserver::new();
        assert!(reserver.release(core::ptr::null_mut(), 64).is_ok());
    }

    #[test]
    fn release_of_foreign_pointer_is_an_error() {
        let reserver: Reserver = Reserver::new();
        let mut local = 0u8;
        let err = reserver
            .release(core::ptr::addr_of_mut!(local), 16)
            .unwrap_err();
        assert_eq!(err, ReserverError::ForeignPointer);
    }

    #[test]
    fn try_expand_grows_a_fresh_reservation() {
        let reserver: Reserver = Reserver::new();
        let ptr = reserver.reserve(16).expect("reserve should succeed");
        assert!(reserver.try_expand(ptr, 16, 64));
        reserver.release(ptr, 64).expect("release should succeed");
    }

    #[test]
    fn round_up_bytes_matches_chunk_align() {
        let rounded = Reserver::<DefaultConfig>::round_up_bytes(17);
        assert_eq!(rounded % DefaultConfig::CHUNK_ALIGN, 0);
        assert!(rounded >= 17);
    }

    #[test]
    fn large_reservation_grows_a_new_block() {
        let reserver: Reserver = Reserver::new();
        let ptr = reserver
            .reserve(DefaultConfig::DEFAULT_BLOCK_SIZE * 2)
            .expect("large reservation should still succeed via a dedicated block");
        assert!(reserver.owns(ptr));
    }

    #[test]
    fn oversized_reservation_round_trips_through_release() {
        let reserver: Reserver = Reserver::new();
        let bytes = DefaultConfig::DEFAULT_BLOCK_SIZE * 3;
        let ptr = reserver
            .reserve(bytes)
            .expect("oversized reservation should succeed via a dedicated block");
        assert!(reserver.owns(ptr));
        reserver.release(ptr, bytes).expect("release should succeed");
        assert!(!reserver.owns(ptr));
    }

    #[test]
    fn reserve_aligned_rejects_non_power_of_two() {
        let reserver: Reserver = Reserver::new();
        let err = reserver.reserve_aligned(64, 48).unwrap_err();
        assert_eq!(err, ReserverError::InvalidAlignment);
    }

    #[test]
    fn reserve_aligned_satisfies_a_stricter_alignment() {
        let reserver: Reserver = Reserver::new();
        let ptr = reserver
            .reserve_aligned(256, 128)
            .expect("a default-sized block should accommodate this alignment");
        assert_eq!(ptr as usize % 128, 0);
        reserver.release(ptr, 256).expect("release should succeed");
    }

    #[test]
    fn shrink_truncates_a_reservation_in_place() {
        let reserver: Reserver = Reserver::new();
        let ptr = reserver.reserve(128).expect("reserve should succeed");
        assert!(reserver.shrink(ptr, 128, 32));
        reserver.release(ptr, 32).expect("release should succeed");
    }
}
