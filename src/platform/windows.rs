//! Windows virtual memory implementation using VirtualAlloc/VirtualFree/VirtualProtect.

use core::ffi::c_void;
use core::sync::atomic::{AtomicU32, Ordering};

const MEM_COMMIT: u32 = 0x1000;
const MEM_RESERVE: u32 = 0x2000;
const MEM_RELEASE: u32 = 0x8000;
const PAGE_READWRITE: u32 = 0x04;
const PAGE_NOACCESS: u32 = 0x01;

#[repr(C)]
struct SystemInfo {
    w_processor_architecture: u16,
    w_reserved: u16,
    dw_page_size: u32,
    lp_minimum_application_address: *mut c_void,
    lp_maximum_application_address: *mut c_void,
    dw_active_processor_mask: usize,
    dw_number_of_processors: u32,
    dw_processor_type: u32,
    dw_allocation_granularity: u32,
    w_processor_level: u16,
    w_processor_revision: u16,
}

unsafe extern "system" {
    #[link_name = "VirtualAlloc"]
    fn virtual_alloc(
        lp_address: *mut c_void,
        dw_size: usize,
        fl_allocation_type: u32,
        fl_protect: u32,
    ) -> *mut c_void;

    #[link_name = "VirtualFree"]
    fn virtual_free(lp_address: *mut c_void, dw_size: usize, dw_free_type: u32) -> i32;

    #[link_name = "VirtualProtect"]
    fn virtual_protect(
        lp_address: *mut c_void,
        dw_size: usize,
        fl_new_protect: u32,
        lp_old_protect: *mut u32,
    ) -> i32;

    #[link_name = "GetSystemInfo"]
    fn get_system_info(lp_system_info: *mut SystemInfo);
}

static PAGE_SIZE: AtomicU32 = AtomicU32::new(0);

pub fn page_size() -> usize {
    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached as usize;
    }
    let mut info: SystemInfo = unsafe { core::mem::zeroed() };
    unsafe { get_system_info(&mut info) };
    let size = if info.dw_page_size != 0 {
        info.dw_page_size
    } else {
        4096
    };
    PAGE_SIZE.store(size, Ordering::Relaxed);
    size as usize
}

pub unsafe fn reserve(size: usize, _stack: bool) -> *mut u8 {
    let ptr = unsafe {
        virtual_alloc(
            core::ptr::null_mut(),
            size,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        )
    };
    ptr as *mut u8
}

pub unsafe fn release(ptr: *mut u8, _size: usize) {
    unsafe {
        virtual_free(ptr as *mut c_void, 0, MEM_RELEASE);
    }
}

pub unsafe fn protect_guard_page(ptr: *mut u8, size: usize) -> bool {
    let mut old_protect: u32 = 0;
    unsafe { virtual_protect(ptr as *mut c_void, size, PAGE_NOACCESS, &mut old_protect) != 0 }
}
