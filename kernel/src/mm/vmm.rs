//! Virtual memory manager: 4-level page-table walker on top of the
//! bootloader's HHDM, the MMIO bump-pointer window, and the kernel-heap
//! virtual arena (spec §4.2).
//!
//! The bootloader has already enabled paging and left a PML4 in CR3; this
//! module extends that address space, it never replaces it. Grounded in
//! `original_source/src/memory/vmm.c` (`vmm_map_page`, `vmm_map_mmio`,
//! `vmm_alloc_kernel_pages`).

use x86_64::{registers::control::Cr3, structures::paging::PageTable as X86PageTable, PhysAddr};

use super::{frame_allocator, page_table::PageFlags};
use crate::sync::SpinLock;

pub const FRAME_SIZE: u64 = 4096;
/// Start of the MMIO bump-pointer window (spec §4.2).
pub const MMIO_WINDOW_BASE: u64 = 0xFFFF_FFFF_C000_0000;
/// Base of the kernel heap's 64 MiB virtual arena (spec §3).
pub const HEAP_BASE: u64 = 0xFFFF_FFFF_4000_0000;
pub const HEAP_SIZE: u64 = 64 * 1024 * 1024;

const MAX_ARENA_RECORDS: usize = 512;

#[derive(Debug, Clone, Copy)]
struct ArenaRecord {
    virt: u64,
    size: u64,
    free: bool,
}

struct Inner {
    hhdm_offset: u64,
    mmio_next: u64,
    /// Fixed-capacity table of heap-arena records (spec §3): never
    /// overlapping, free union disjoint, total union covers the arena.
    records: [ArenaRecord; MAX_ARENA_RECORDS],
    record_count: usize,
}

static VMM: SpinLock<Option<Inner>> = SpinLock::new("vmm", None);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    OutOfFrames,
    AlreadyMapped,
    NotMapped,
}

/// # Safety
/// `hhdm_offset` must be the bootloader-provided HHDM offset and paging
/// must already be enabled with the current CR3 reachable through it.
pub unsafe fn init(hhdm_offset: u64) {
    let mut inner = Inner {
        hhdm_offset,
        mmio_next: MMIO_WINDOW_BASE,
        records: [ArenaRecord { virt: 0, size: 0, free: false }; MAX_ARENA_RECORDS],
        record_count: 1,
    };
    inner.records[0] = ArenaRecord { virt: HEAP_BASE, size: HEAP_SIZE, free: true };
    *VMM.lock() = Some(inner);
    log::info!(
        "vmm: hhdm offset {:#x}, heap arena {:#x}..{:#x}",
        hhdm_offset,
        HEAP_BASE,
        HEAP_BASE + HEAP_SIZE
    );
}

fn hhdm_offset() -> u64 {
    VMM.lock().as_ref().expect("vmm not initialized").hhdm_offset
}

fn current_pml4_phys() -> u64 {
    Cr3::read().0.start_address().as_u64()
}

fn to_x86_flags(flags: PageFlags) -> x86_64::structures::paging::PageTableFlags {
    use x86_64::structures::paging::PageTableFlags as F;
    let mut out = F::empty();
    if flags.contains(PageFlags::PRESENT) {
        out |= F::PRESENT;
    }
    if flags.contains(PageFlags::WRITABLE) {
        out |= F::WRITABLE;
    }
    if flags.contains(PageFlags::USER) {
        out |= F::USER_ACCESSIBLE;
    }
    if flags.contains(PageFlags::WRITE_THROUGH) {
        out |= F::WRITE_THROUGH;
    }
    if flags.contains(PageFlags::NO_CACHE) {
        out |= F::NO_CACHE;
    }
    if flags.contains(PageFlags::NO_EXECUTE) {
        out |= F::NO_EXECUTE;
    }
    out
}

/// Clears and frees every intermediate table entry this call created,
/// in reverse order, so a failed walk leaves no partial commit behind
/// (spec §4.2).
fn rollback_created(created: &[Option<(u64, usize, u64)>], offset: u64) {
    for &(parent_table_phys, level_index, frame_phys) in created.iter().rev().flatten() {
        // SAFETY: `parent_table_phys` is a live table this same call wrote
        // `entry` into moments ago; no other walker can observe it yet.
        let table = unsafe { &mut *((parent_table_phys + offset) as *mut X86PageTable) };
        table[level_index].set_unused();
        frame_allocator::free_frame(frame_allocator::FrameAddr(frame_phys));
    }
}

/// Walks PML4 -> PDPT -> PD -> PT, allocating and zeroing any missing
/// intermediate table from the PMM. If a later allocation fails, every
/// intermediate table this call created is rolled back before returning
/// `OutOfFrames` — no partial commit is left visible (spec §4.2).
pub fn map_page(phys: u64, virt: u64, flags: PageFlags) -> Result<(), MapError> {
    let idx = super::page_table::VirtAddrIndices::new(virt);
    let offset = hhdm_offset();

    let mut created: [Option<(u64, usize, u64)>; 3] = [None; 3];
    let mut created_count = 0;

    let mut table_phys = current_pml4_phys();
    for level_index in [idx.pml4, idx.pdpt, idx.pd] {
        let parent_table_phys = table_phys;
        let table = unsafe { &mut *((table_phys + offset) as *mut X86PageTable) };
        let entry = &mut table[level_index];
        if entry.is_unused() {
            let Some(frame) = frame_allocator::alloc_frame() else {
                rollback_created(&created[..created_count], offset);
                return Err(MapError::OutOfFrames);
            };
            // SAFETY: `frame` was just allocated and is reachable via HHDM.
            unsafe {
                core::ptr::write_bytes((frame.as_u64() + offset) as *mut u8, 0, FRAME_SIZE as usize);
            }
            entry.set_addr(
                PhysAddr::new(frame.as_u64()),
                x86_64::structures::paging::PageTableFlags::PRESENT
                    | x86_64::structures::paging::PageTableFlags::WRITABLE,
            );
            created[created_count] = Some((parent_table_phys, level_index, frame.as_u64()));
            created_count += 1;
        }
        table_phys = entry.addr().as_u64();
    }

    let pt = unsafe { &mut *((table_phys + offset) as *mut X86PageTable) };
    let leaf = &mut pt[idx.pt];
    if !leaf.is_unused() {
        rollback_created(&created[..created_count], offset);
        return Err(MapError::AlreadyMapped);
    }
    leaf.set_addr(PhysAddr::new(phys), to_x86_flags(flags));
    x86_64::instructions::tlb::flush(x86_64::VirtAddr::new(virt));
    Ok(())
}

/// Clears the leaf mapping for `virt` (single page) and flushes the TLB.
pub fn unmap(virt: u64) -> Result<(), MapError> {
    let idx = super::page_table::VirtAddrIndices::new(virt);
    let offset = hhdm_offset();
    let mut table_phys = current_pml4_phys();
    for level_index in [idx.pml4, idx.pdpt, idx.pd] {
        let table = unsafe { &*((table_phys + offset) as *mut X86PageTable) };
        let entry = &table[level_index];
        if entry.is_unused() {
            return Err(MapError::NotMapped);
        }
        table_phys = entry.addr().as_u64();
    }
    let pt = unsafe { &mut *((table_phys + offset) as *mut X86PageTable) };
    let leaf = &mut pt[idx.pt];
    if leaf.is_unused() {
        return Err(MapError::NotMapped);
    }
    leaf.set_unused();
    x86_64::instructions::tlb::flush(x86_64::VirtAddr::new(virt));
    Ok(())
}

/// Walks the tables without modifying them; returns the mapped physical
/// address (with the page offset reapplied) or `None` if unmapped.
pub fn phys_of(virt: u64) -> Option<u64> {
    let idx = super::page_table::VirtAddrIndices::new(virt);
    let offset = hhdm_offset();
    let mut table_phys = current_pml4_phys();
    for level_index in [idx.pml4, idx.pdpt, idx.pd] {
        let table = unsafe { &*((table_phys + offset) as *mut X86PageTable) };
        let entry = &table[level_index];
        if entry.is_unused() {
            return None;
        }
        table_phys = entry.addr().as_u64();
    }
    let pt = unsafe { &*((table_phys + offset) as *mut X86PageTable) };
    let leaf = &pt[idx.pt];
    if leaf.is_unused() {
        return None;
    }
    Some(leaf.addr().as_u64() + idx.offset)
}

/// Maps `size` bytes of MMIO space uncached at a fresh bump-pointer window,
/// returning the virtual base (spec §4.2).
pub fn map_mmio(phys: u64, size: u64) -> Result<u64, MapError> {
    let pages = size.div_ceil(FRAME_SIZE);
    let base = {
        let mut guard = VMM.lock();
        let inner = guard.as_mut().expect("vmm not initialized");
        let base = inner.mmio_next;
        inner.mmio_next += pages * FRAME_SIZE;
        base
    };
    let aligned_phys = phys & !(FRAME_SIZE - 1);
    for i in 0..pages {
        map_page(
            aligned_phys + i * FRAME_SIZE,
            base + i * FRAME_SIZE,
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::NO_CACHE | PageFlags::WRITE_THROUGH,
        )?;
    }
    Ok(base + (phys - aligned_phys))
}

/// Maps `n` fresh physical frames into the kernel-heap virtual arena and
/// returns the virtual base. Used by the heap allocator to grow (spec §3).
pub fn alloc_kernel_pages(n: usize) -> Option<u64> {
    let want = n as u64 * FRAME_SIZE;
    let base = {
        let mut guard = VMM.lock();
        let inner = guard.as_mut().expect("vmm not initialized");
        let idx = (0..inner.record_count).find(|&i| inner.records[i].free && inner.records[i].size >= want)?;
        let record = inner.records[idx];
        if record.size > want && inner.record_count < MAX_ARENA_RECORDS {
            inner.records[idx] = ArenaRecord { virt: record.virt, size: want, free: false };
            inner.records[inner.record_count] =
                ArenaRecord { virt: record.virt + want, size: record.size - want, free: true };
            inner.record_count += 1;
        } else {
            inner.records[idx].free = false;
        }
        record.virt
    };

    for i in 0..n as u64 {
        let frame = frame_allocator::alloc_frame()?;
        if map_page(frame.as_u64(), base + i * FRAME_SIZE, PageFlags::PRESENT | PageFlags::WRITABLE).is_err() {
            return None;
        }
    }
    Some(base)
}

/// Returns a page range to the arena as free and unmaps it.
pub fn free_kernel_pages(virt: u64, n: usize) {
    for i in 0..n as u64 {
        let page = virt + i * FRAME_SIZE;
        if let Some(phys) = phys_of(page) {
            let _ = unmap(page);
            frame_allocator::free_frame(frame_allocator::FrameAddr(phys & !(FRAME_SIZE - 1)));
        }
    }
    let mut guard = VMM.lock();
    let inner = guard.as_mut().expect("vmm not initialized");
    if let Some(idx) = (0..inner.record_count).find(|&i| inner.records[i].virt == virt) {
        inner.records[idx].free = true;
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn mmio_window_base_is_page_aligned() {
        assert_eq!(super::MMIO_WINDOW_BASE % super::FRAME_SIZE, 0);
    }
}
