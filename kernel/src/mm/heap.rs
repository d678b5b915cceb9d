//! Header-tagged page-granular kernel heap allocator (spec §3, §4.2).
//!
//! Deliberately not `linked_list_allocator`: the heap header carries a
//! magic value checked on free, and allocations are always rounded up to
//! whole pages supplied by [`super::vmm::alloc_kernel_pages`], so a
//! generic free-list allocator doesn't fit this shape. Grounded in
//! `original_source/src/memory/heap.c` (`heap_alloc`/`heap_free`).

use core::alloc::{GlobalAlloc, Layout};

use super::vmm;
use crate::sync::SpinLock;

pub const HEAP_MAGIC: u32 = 0xDEAD_BEEF;
const PAGE_SIZE: usize = 4096;

/// Prefixed to every returned pointer; links into a doubly-linked
/// active-allocation list. A magic mismatch on free signals corruption.
#[repr(C)]
struct Header {
    size: usize,
    magic: u32,
    prev: *mut Header,
    next: *mut Header,
}

struct HeapState {
    active_head: *mut Header,
}

// SAFETY: all access to `HeapState` goes through `HEAP`'s SpinLock.
unsafe impl Send for HeapState {}

static HEAP: SpinLock<HeapState> = SpinLock::new("heap", HeapState { active_head: core::ptr::null_mut() });

pub struct KernelHeap;

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let header_size = core::mem::size_of::<Header>();
        let total = header_size + layout.size();
        let pages = total.div_ceil(PAGE_SIZE);

        let Some(base) = vmm::alloc_kernel_pages(pages) else {
            return core::ptr::null_mut();
        };
        let header_ptr = base as *mut Header;

        let mut state = HEAP.lock();
        // SAFETY: `base` was just mapped for `pages` fresh pages.
        unsafe {
            (*header_ptr).size = total;
            (*header_ptr).magic = HEAP_MAGIC;
            (*header_ptr).prev = core::ptr::null_mut();
            (*header_ptr).next = state.active_head;
            if !state.active_head.is_null() {
                (*state.active_head).prev = header_ptr;
            }
        }
        state.active_head = header_ptr;
        drop(state);

        // SAFETY: `header_size` bytes past `header_ptr` are within the
        // mapped range (`pages * PAGE_SIZE >= header_size + layout.size()`).
        unsafe { (base as *mut u8).add(header_size) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let header_size = core::mem::size_of::<Header>();
        // SAFETY: `ptr` was returned by `alloc`, so the header immediately
        // precedes it.
        let header_ptr = unsafe { ptr.sub(header_size) as *mut Header };

        let mut state = HEAP.lock();
        // SAFETY: `header_ptr` was initialized by `alloc` and is still live.
        unsafe {
            // Double-free / corrupt pointer is a programmer error (spec §7):
            // logged, the page is leaked rather than touched, never a halt.
            if (*header_ptr).magic != HEAP_MAGIC {
                log::error!("heap: bad magic on free at {:p}, leaking", ptr);
                return;
            }

            let prev = (*header_ptr).prev;
            let next = (*header_ptr).next;
            if !prev.is_null() {
                (*prev).next = next;
            } else {
                state.active_head = next;
            }
            if !next.is_null() {
                (*next).prev = prev;
            }

            let total = (*header_ptr).size;
            let pages = total.div_ceil(PAGE_SIZE);
            drop(state);
            vmm::free_kernel_pages(header_ptr as u64, pages);
        }
    }
}

/// Walks the active-allocation list, asserting every header's magic is
/// intact. Used by the boot-time self-test battery (spec §8, property 2).
pub fn check_active_allocations() -> bool {
    let state = HEAP.lock();
    let mut cur = state.active_head;
    while !cur.is_null() {
        // SAFETY: every node on the list was installed by `alloc` and is
        // still live while the list holds a pointer to it.
        unsafe {
            if (*cur).magic != HEAP_MAGIC {
                return false;
            }
            cur = (*cur).next;
        }
    }
    true
}

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: KernelHeap = KernelHeap;

#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error(layout: Layout) -> ! {
    panic!("kernel heap allocation failed: {:?}", layout);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_is_stable() {
        // size(8) + magic(4, +4 padding to align `prev`) + prev(8) + next(8).
        assert_eq!(core::mem::size_of::<Header>(), 32);
    }
}
