//! Memory management: physical frame allocator, virtual memory manager,
//! kernel heap, and the page-fault handler (spec §3, §4.1–§4.2, §4.4).

pub mod frame_allocator;
pub mod heap;
pub mod page_fault;
pub mod page_table;
pub mod vmm;

pub use frame_allocator::{FrameAddr, ReservedRegion, UsableRegion, FRAME_SIZE};
pub use page_table::PageFlags;

/// Brings up the PMM then the VMM over the boot handoff's memory map.
/// The heap allocator needs no separate init call: its `GlobalAlloc` impl
/// lazily draws on `vmm::alloc_kernel_pages` as soon as both are live.
///
/// # Safety
/// Must run exactly once, after the bootloader has handed off a valid
/// memory map and HHDM offset, and before any code allocates.
pub unsafe fn init(usable: &[UsableRegion], reserved: &[ReservedRegion], hhdm_offset: u64) {
    // SAFETY: forwarding the caller's precondition.
    unsafe {
        frame_allocator::init(usable, reserved, hhdm_offset);
        vmm::init(hhdm_offset);
    }
    log::info!(
        "mm: {} KiB total, {} KiB reserved",
        frame_allocator::total_memory() / 1024,
        frame_allocator::reserved_memory() / 1024
    );
}
