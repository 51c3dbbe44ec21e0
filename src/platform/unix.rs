//! Unix virtual memory implementation using mmap/munmap/mprotect.

use core::ffi::c_void;
use core::sync::atomic::{AtomicI32, Ordering};

const PROT_READ: i32 = 0x1;
const PROT_WRITE: i32 = 0x2;
const PROT_NONE: i32 = 0x0;
const MAP_PRIVATE: i32 = 0x02;
const MAP_ANONYMOUS: i32 = 0x20;
const MAP_FAILED: *mut c_void = !0usize as *mut c_void;
#[cfg(target_os = "linux")]
const MAP_STACK: i32 = 0x2_0000;
#[cfg(target_os = "linux")]
const SC_PAGESIZE: i32 = 30;
#[cfg(not(target_os = "linux"))]
const SC_PAGESIZE: i32 = 29;

unsafe extern "C" {
    fn mmap(
        addr: *mut c_void,
        length: usize,
        prot: i32,
        flags: i32,
        fd: i32,
        offset: i64,
    ) -> *mut c_void;

    fn munmap(addr: *mut c_void, length: usize) -> i32;
    fn mprotect(addr: *mut c_void, length: usize, prot: i32) -> i32;
    fn sysconf(name: i32) -> i64;
}

/// Cached page size; `-1` means "not yet queried".
static PAGE_SIZE: AtomicI32 = AtomicI32::new(-1);

pub fn page_size() -> usize {
    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached > 0 {
        return cached as usize;
    }
    let queried = unsafe { sysconf(SC_PAGESIZE) };
    let size = if queried > 0 { queried as i32 } else { 4096 };
    PAGE_SIZE.store(size, Ordering::Relaxed);
    size as usize
}

pub unsafe fn reserve(size: usize, stack: bool) -> *mut u8 {
    let mut flags = MAP_PRIVATE | MAP_ANONYMOUS;
    #[cfg(target_os = "linux")]
    if stack {
        flags |= MAP_STACK;
    }
    #[cfg(not(target_os = "linux"))]
    let _ = stack;

    let raw = unsafe {
        mmap(
            core::ptr::null_mut(),
            size,
            PROT_READ | PROT_WRITE,
            flags,
            -1,
            0,
        )
    };
    if raw == MAP_FAILED {
        return core::ptr::null_mut();
    }
    raw as *mut u8
}

pub unsafe fn release(ptr: *mut u8, size: usize) {
    unsafe {
        munmap(ptr as *mut c_void, size);
    }
}

pub unsafe fn protect_guard_page(ptr: *mut u8, size: usize) -> bool {
    unsafe { mprotect(ptr as *mut c_void, size, PROT_NONE) == 0 }
}
