//! Anonymous private mappings backing the host memory sources.

use std::{
    ffi::c_void,
    ptr::{self, NonNull},
};

pub const OS_PAGE_SIZE: usize = 4096;

const PROT_READ_WRITE: i32 = 0x1 | 0x2;

#[cfg(target_os = "linux")]
const MAP_PRIVATE_ANON: i32 = 0x02 | 0x20;
#[cfg(any(target_os = "macos", target_os = "ios"))]
const MAP_PRIVATE_ANON: i32 = 0x02 | 0x1000;

// SAFETY: posix declarations
unsafe extern "C" {
    fn mmap(addr: *mut c_void, len: usize, prot: i32, flags: i32, fd: i32, offset: isize)
    -> *mut c_void;
    fn munmap(addr: *mut c_void, len: usize) -> i32;
}

/// Maps `size` bytes of zeroed, page aligned memory. Returns `None` if the
/// kernel refuses or `size` is zero.
#[must_use]
pub fn map_memory(size: usize) -> Option<NonNull<u8>> {
    if size == 0 {
        return None;
    }
    // SAFETY: no fixed address is requested, so no existing mapping changes
    let raw = unsafe {
        mmap(ptr::null_mut(), size, PROT_READ_WRITE, MAP_PRIVATE_ANON, -1, 0)
    };
    // MAP_FAILED
    if raw.addr() == usize::MAX {
        return None;
    }
    NonNull::new(raw.cast())
}

/// # Safety
/// `ptr` and `size` must describe a mapping from [`map_memory`] that is not
/// used afterwards.
pub unsafe fn unmap_memory(ptr: NonNull<u8>, size: usize) {
    // SAFETY: the caller hands back a live mapping of this length
    let _ = unsafe { munmap(ptr.as_ptr().cast(), size) };
}
