//! `CPUHelper` / `CPUSet`: logical-CPU topology discovery, thread pinning,
//! and textual CPU range-list parsing.
//!
//! Topology is discovered once (on first use) and cached behind an
//! `AtomicPtr`, the same lazy-singleton shape the teacher crate uses for its
//! per-CPU slab region and radix-tree nodes: a fast lock-free read once
//! initialized, a spinlock only on the one-time init race.

use alloc::boxed::Box;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::error::ReserverError;
use crate::sync::SpinMutex;

/// Upper bound on logical CPU ids this crate can track. Large enough for
/// every real multi-socket machine; matches the spec's "fixed-capacity
/// bitmap" requirement for `CPUSet`.
pub const MAX_CPU_CORES: usize = 1024;
const WORD_BITS: usize = usize::BITS as usize;
const WORD_SHIFT: u32 = usize::BITS.trailing_zeros();
const WORD_MASK: usize = WORD_BITS - 1;
const SET_WORDS: usize = MAX_CPU_CORES.div_ceil(WORD_BITS);

/// A fixed-capacity bitmap of logical-CPU ids.
#[derive(Clone, Copy)]
#[repr(align(64))]
pub struct CpuSet {
    mask: [usize; SET_WORDS],
}

impl Default for CpuSet {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuSet {
    pub const fn new() -> Self {
        Self {
            mask: [0; SET_WORDS],
        }
    }

    pub fn clear(&mut self) {
        self.mask = [0; SET_WORDS];
    }

    #[inline]
    fn index_offset(core: usize) -> (usize, u32) {
        (core >> WORD_SHIFT, (core & WORD_MASK) as u32)
    }

    pub fn set(&mut self, core: usize) {
        if core < MAX_CPU_CORES {
            let (index, offset) = Self::index_offset(core);
            self.mask[index] |= 1usize << offset;
        }
    }

    pub fn reset(&mut self, core: usize) {
        if core < MAX_CPU_CORES {
            let (index, offset) = Self::index_offset(core);
            self.mask[index] &= !(1usize << offset);
        }
    }

    pub fn is_set(&self, core: usize) -> bool {
        if core >= MAX_CPU_CORES {
            return false;
        }
        let (index, offset) = Self::index_offset(core);
        (self.mask[index] & (1usize << offset)) != 0
    }

    pub fn count(&self) -> u32 {
        self.mask.iter().map(|w| w.count_ones()).sum()
    }

    pub fn data(&self) -> &[usize] {
        &self.mask
    }

    pub const fn size() -> usize {
        SET_WORDS
    }

    pub const fn total_bytes() -> usize {
        SET_WORDS * core::mem::size_of::<usize>()
    }
}

/// Cached CPU topology, discovered once per process.
struct CpuTopology {
    online: CpuSet,
    core_count: u32,
    max_id: u32,
}

impl CpuTopology {
    #[cfg(all(target_os = "linux", feature = "std"))]
    fn discover() -> Self {
        let mut online = CpuSet::new();
        let mut core_count = 0u32;
        let mut max_id = 0u32;

        if let Ok(contents) = std::fs::read_to_string("/sys/devices/system/cpu/online") {
            for entry in contents.trim().split(',') {
                let entry = entry.trim();
                if entry.is_empty() {
                    continue;
                }
                if let Some((lo, hi)) = entry.split_once('-') {
                    if let (Ok(lo), Ok(hi)) = (lo.parse::<u32>(), hi.parse::<u32>()) {
                        for id in lo..=hi {
                            online.set(id as usize);
                            core_count += 1;
                            max_id = max_id.max(id);
                        }
                    }
                } else if let Ok(id) = entry.parse::<u32>() {
                    online.set(id as usize);
                    core_count += 1;
                    max_id = max_id.max(id);
                }
            }
        }

        if core_count == 0 {
            online.set(0);
            core_count = 1;
        }

        Self {
            online,
            core_count,
            max_id,
        }
    }

    #[cfg(not(all(target_os = "linux", feature = "std")))]
    fn discover() -> Self {
        let mut online = CpuSet::new();
        #[cfg(all(windows, feature = "std"))]
        let core_count = windows_core_count();
        #[cfg(not(all(windows, feature = "std")))]
        let core_count = 1u32;

        for id in 0..core_count {
            online.set(id as usize);
        }

        Self {
            online,
            core_count: core_count.max(1),
            max_id: core_count.saturating_sub(1),
        }
    }
}

#[cfg(all(windows, feature = "std"))]
fn windows_core_count() -> u32 {
    unsafe extern "system" {
        #[link_name = "GetActiveProcessorCount"]
        fn get_active_processor_count(group_number: u16) -> u32;
    }
    const ALL_PROCESSOR_GROUPS: u16 = 0xFFFF;
    let n = unsafe { get_active_processor_count(ALL_PROCESSOR_GROUPS) };
    if n == 0 { 1 } else { n }
}

static TOPOLOGY_PTR: AtomicPtr<CpuTopology> = AtomicPtr::new(ptr::null_mut());
static INIT_LOCK: SpinMutex<()> = SpinMutex::new(());

fn topology() -> &'static CpuTopology {
    let existing = TOPOLOGY_PTR.load(Ordering::Acquire);
    if !existing.is_null() {
        return unsafe { &*existing };
    }

    let _guard = INIT_LOCK.lock();
    let existing = TOPOLOGY_PTR.load(Ordering::Acquire);
    if !existing.is_null() {
        return unsafe { &*existing };
    }

    let topo = Box::into_raw(Box::new(CpuTopology::discover()));
    TOPOLOGY_PTR.store(topo, Ordering::Release);
    log::debug!(
        "cpu topology discovered: core_count={} max_id={}",
        unsafe { (*topo).core_count },
        unsafe { (*topo).max_id }
    );
    unsafe { &*topo }
}

/// Logical-CPU topology queries and thread affinity control.
pub struct CpuHelper;

impl CpuHelper {
    /// Number of logical CPUs online, discovered once and cached.
    #[inline]
    pub fn core_count() -> u32 {
        topology().core_count
    }

    /// Highest online CPU id seen at discovery time.
    #[inline]
    pub fn max_id() -> u32 {
        topology().max_id
    }

    /// The set of CPUs considered online at discovery time.
    #[inline]
    pub fn online_cpu_set() -> CpuSet {
        topology().online
    }

    /// The logical CPU the calling thread is currently running on, or `0`
    /// if unsupported on this platform.
    pub fn current_core() -> u32 {
        #[cfg(all(target_os = "linux", feature = "std"))]
        {
            unsafe extern "C" {
                fn sched_getcpu() -> i32;
            }
            let cpu = unsafe { sched_getcpu() };
            if cpu >= 0 { cpu as u32 } else { 0 }
        }
        #[cfg(all(windows, feature = "std"))]
        {
            unsafe extern "system" {
                #[link_name = "GetCurrentProcessorNumber"]
                fn get_current_processor_number() -> u32;
            }
            unsafe { get_current_processor_number() }
        }
        #[cfg(not(any(
            all(target_os = "linux", feature = "std"),
            all(windows, feature = "std")
        )))]
        {
            0
        }
    }

    /// Best-effort: pin the calling thread to `core_id`. Returns `false` if
    /// unsupported or the call failed.
    pub fn pin_to_core(core_id: u32) -> bool {
        #[cfg(all(target_os = "linux", feature = "std"))]
        {
            let mut set = CpuSet::new();
            set.set(core_id as usize);
            unsafe extern "C" {
                fn sched_setaffinity(pid: i32, cpusetsize: usize, mask: *const usize) -> i32;
            }
            unsafe { sched_setaffinity(0, CpuSet::total_bytes(), set.data().as_ptr()) == 0 }
        }
        #[cfg(not(all(target_os = "linux", feature = "std")))]
        {
            let _ = core_id;
            false
        }
    }

    /// Parse a comma-separated list of CPU ids and ranges (`"1,3-5,64"`)
    /// into a [`CpuSet`], rejecting malformed input or ids that are not
    /// online.
    pub fn range_to_bitmap(text: &str) -> Result<CpuSet, ReserverError> {
        let bytes = text.as_bytes();
        let mut set = CpuSet::new();
        let online = Self::online_cpu_set();
        let mut i = 0usize;

        while i < bytes.len() {
            while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b',') {
                i += 1;
            }
            if i >= bytes.len() {
                break;
            }

            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i == start {
                return Err(ReserverError::RangeParseError { offset: start });
            }
            let lo: usize = parse_digits(&bytes[start..i]);

            while i < bytes.len() && bytes[i] == b' ' {
                i += 1;
            }

            let hi = if i < bytes.len() && bytes[i] == b'-' {
                i += 1;
                while i < bytes.len() && bytes[i] == b' ' {
                    i += 1;
                }
                let start2 = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if i == start2 {
                    return Err(ReserverError::RangeParseError { offset: start2 });
                }
                let hi: usize = parse_digits(&bytes[start2..i]);
                if hi < lo {
                    return Err(ReserverError::RangeParseError { offset: start });
                }
                hi
            } else {
                lo
            };

            for id in lo..=hi {
                if id >= MAX_CPU_CORES || !online.is_set(id) {
                    return Err(ReserverError::RangeParseError { offset: start });
                }
                set.set(id);
            }

            if i < bytes.len() && bytes[i] != b',' && bytes[i] != b' ' {
                return Err(ReserverError::RangeParseError { offset: i });
            }
        }

        Ok(set)
    }
}

fn parse_digits(digits: &[u8]) -> usize {
    let mut value = 0usize;
    for &b in digits {
        value = value * 10 + (b - b'0') as usize;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_set_basic_ops() {
        let mut set = CpuSet::new();
        assert!(!set.is_set(3));
        set.set(3);
        assert!(set.is_set(3));
        assert_eq!(set.count(), 1);
        set.reset(3);
        assert!(!set.is_set(3));
        assert_eq!(set.count(), 0);
    }

    #[test]
    fn cpu_set_out_of_range_is_noop() {
        let mut set = CpuSet::new();
        set.set(MAX_CPU_CORES + 10);
        assert!(!set.is_set(MAX_CPU_CORES + 10));
    }

    #[test]
    fn core_count_is_at_least_one() {
        assert!(CpuHelper::core_count() >= 1);
    }

    #[test]
    fn range_to_bitmap_rejects_malformed_range() {
        // "7-3" is a descending range and must be rejected regardless of
        // online-set contents.
        assert!(CpuHelper::range_to_bitmap("7-3").is_err());
    }

    #[test]
    fn range_to_bitmap_rejects_non_digit() {
        assert!(CpuHelper::range_to_bitmap("abc").is_err());
    }

    #[test]
    fn range_to_bitmap_accepts_core_zero() {
        // Core 0 is always online.
        let set = CpuHelper::range_to_bitmap("0").expect("core 0 is online");
        assert!(set.is_set(0));
    }
}
