//! Allocation statistics counters.
//!
//! All counters use `Relaxed` ordering — they are observational only and not
//! used as synchronization primitives. The reserver's own spinlocks provide
//! the ordering guarantees for correctness; these counters are purely for
//! monitoring.
//!
//! # Usage
//!
//! ```ignore
//! let snap = qentem_reserve::stats::snapshot();
//! println!("reserves: {}", snap.reserve_count);
//! ```
//!
//! Obtain a [`Snapshot`] with [`snapshot()`]. Individual counter loads are
//! individually atomic but not globally consistent with each other.

use core::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct Stats {
    // ---- Reserve / release ----
    /// Total calls to `ReserverCore::reserve` that returned a non-null pointer.
    pub reserve_count: AtomicU64,
    /// Total calls to `ReserverCore::release`/`Reserver::release` that found an owning block.
    pub release_count: AtomicU64,
    /// Sum of all requested byte sizes passed to `reserve`.
    pub reserve_bytes: AtomicU64,
    /// Times a release missed the current-core instance and had to probe siblings.
    pub cross_core_release_count: AtomicU64,
    /// Times a release found no owning block anywhere (foreign pointer).
    pub foreign_release_count: AtomicU64,

    // ---- Block lifecycle ----
    /// New `MemoryBlock`s created via `SystemMemory::reserve`.
    pub block_create_count: AtomicU64,
    /// `MemoryBlock`s returned to the OS.
    pub block_destroy_count: AtomicU64,
    /// Times a block moved from `blocks` to `exhausted_blocks`.
    pub block_detach_count: AtomicU64,
    /// Times a block moved from `exhausted_blocks` back to `blocks`.
    pub block_reattach_count: AtomicU64,

    // ---- OS ----
    /// Calls to `platform::reserve`.
    pub os_reserve_count: AtomicU64,
    /// Bytes requested from the OS via `platform::reserve`.
    pub os_reserve_bytes: AtomicU64,
}

impl Stats {
    const fn new() -> Self {
        Self {
            reserve_count: AtomicU64::new(0),
            release_count: AtomicU64::new(0),
            reserve_bytes: AtomicU64::new(0),
            cross_core_release_count: AtomicU64::new(0),
            foreign_release_count: AtomicU64::new(0),
            block_create_count: AtomicU64::new(0),
            block_destroy_count: AtomicU64::new(0),
            block_detach_count: AtomicU64::new(0),
            block_reattach_count: AtomicU64::new(0),
            os_reserve_count: AtomicU64::new(0),
            os_reserve_bytes: AtomicU64::new(0),
        }
    }
}

pub(crate) static STATS: Stats = Stats::new();

/// A point-in-time snapshot of all reserver statistics.
///
/// Fields are plain `u64` values loaded from the global atomic counters.
/// Individual fields are each atomically read, but the snapshot as a whole
/// is not globally consistent — concurrent reserves may race between loads.
/// For monitoring purposes this is always sufficient.
///
/// Obtain a snapshot with [`snapshot()`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    pub reserve_count: u64,
    pub release_count: u64,
    pub reserve_bytes: u64,
    pub cross_core_release_count: u64,
    pub foreign_release_count: u64,
    pub block_create_count: u64,
    pub block_destroy_count: u64,
    pub block_detach_count: u64,
    pub block_reattach_count: u64,
    pub os_reserve_count: u64,
    pub os_reserve_bytes: u64,
}

/// Load all counters with `Relaxed` ordering and return a [`Snapshot`].
pub fn snapshot() -> Snapshot {
    let s = &STATS;
    Snapshot {
        reserve_count: s.reserve_count.load(Ordering::Relaxed),
        release_count: s.release_count.load(Ordering::Relaxed),
        reserve_bytes: s.reserve_bytes.load(Ordering::Relaxed),
        cross_core_release_count: s.cross_core_release_count.load(Ordering::Relaxed),
        foreign_release_count: s.foreign_release_count.load(Ordering::Relaxed),
        block_create_count: s.block_create_count.load(Ordering::Relaxed),
        block_destroy_count: s.block_destroy_count.load(Ordering::Relaxed),
        block_detach_count: s.block_detach_count.load(Ordering::Relaxed),
        block_reattach_count: s.block_reattach_count.load(Ordering::Relaxed),
        os_reserve_count: s.os_reserve_count.load(Ordering::Relaxed),
        os_reserve_bytes: s.os_reserve_bytes.load(Ordering::Relaxed),
    }
}
