//! `SystemMemory`: page-aligned virtual memory straight from the OS, bypassing
//! the global allocator entirely. Mirrors `VirtualAlloc`/`mmap` on their
//! respective platforms; falls back to the Rust global allocator when neither
//! is available (freestanding/unknown targets).

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

use core::alloc::Layout;

/// The native virtual-memory page size, queried once and cached by the
/// platform backend.
#[inline]
pub fn page_size() -> usize {
    #[cfg(windows)]
    {
        windows::page_size()
    }
    #[cfg(unix)]
    {
        unix::page_size()
    }
    #[cfg(not(any(unix, windows)))]
    {
        4096
    }
}

/// Reserve `size` bytes of read+write page-aligned virtual memory.
///
/// `stack` hints that the region will be used as a downward-growing stack
/// (enables `MAP_STACK` on Linux where available); it has no effect elsewhere.
/// Returns a null pointer on failure.
///
/// # Safety
/// Caller must release the returned pointer exactly once via [`release`] with
/// the same `size`, and must not use the pointer afterwards.
#[inline]
pub unsafe fn reserve(size: usize, stack: bool) -> *mut u8 {
    #[cfg(windows)]
    {
        unsafe { windows::reserve(size, stack) }
    }
    #[cfg(unix)]
    {
        unsafe { unix::reserve(size, stack) }
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = stack;
        fallback_alloc(size)
    }
}

/// Return a region previously obtained from [`reserve`] to the OS.
///
/// # Safety
/// `ptr` must have been returned by [`reserve`] and `size` must match the
/// original reservation size. `ptr` must not be used after this call.
#[inline]
pub unsafe fn release(ptr: *mut u8, size: usize) {
    if ptr.is_null() {
        return;
    }
    #[cfg(windows)]
    {
        unsafe { windows::release(ptr, size) };
    }
    #[cfg(unix)]
    {
        unsafe { unix::release(ptr, size) };
    }
    #[cfg(not(any(unix, windows)))]
    {
        fallback_dealloc(ptr, size);
    }
}

/// Mark a page range inaccessible (a guard page). Best-effort: returns
/// `false` where the platform offers no such primitive.
///
/// # Safety
/// `ptr`/`size` must describe a live range obtained from [`reserve`].
#[inline]
pub unsafe fn protect_guard_page(ptr: *mut u8, size: usize) -> bool {
    #[cfg(windows)]
    {
        unsafe { windows::protect_guard_page(ptr, size) }
    }
    #[cfg(unix)]
    {
        unsafe { unix::protect_guard_page(ptr, size) }
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (ptr, size);
        false
    }
}

#[cfg(not(any(unix, windows)))]
unsafe fn fallback_alloc(size: usize) -> *mut u8 {
    let Ok(layout) = Layout::from_size_align(size, page_size()) else {
        return core::ptr::null_mut();
    };
    unsafe { alloc::alloc::alloc_zeroed(layout) }
}

#[cfg(not(any(unix, windows)))]
unsafe fn fallback_dealloc(ptr: *mut u8, size: usize) {
    if let Ok(layout) = Layout::from_size_align(size, page_size()) {
        unsafe { alloc::alloc::dealloc(ptr, layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_release_roundtrip() {
        let size = page_size();
        unsafe {
            let ptr = reserve(size, false);
            assert!(!ptr.is_null());
            for i in 0..size {
                *ptr.add(i) = (i & 0xFF) as u8;
            }
            for i in 0..size {
                assert_eq!(*ptr.add(i), (i & 0xFF) as u8);
            }
            release(ptr, size);
        }
    }

    #[test]
    fn reserve_multiple_pages() {
        let size = page_size() * 8;
        unsafe {
            let ptr = reserve(size, false);
            assert!(!ptr.is_null());
            *ptr = 0xAA;
            *ptr.add(size - 1) = 0xBB;
            assert_eq!(*ptr, 0xAA);
            assert_eq!(*ptr.add(size - 1), 0xBB);
            release(ptr, size);
        }
    }

    #[test]
    fn reserve_large_region() {
        let size = 1024 * 1024;
        unsafe {
            let ptr = reserve(size, false);
            assert!(!ptr.is_null());
            release(ptr, size);
        }
    }

    #[test]
    fn release_null_is_noop() {
        unsafe { release(core::ptr::null_mut(), 4096) };
    }

    #[test]
    fn page_size_is_sane_power_of_two() {
        let size = page_size();
        assert!(size >= 4096);
        assert_eq!(size & (size - 1), 0);
    }
}
