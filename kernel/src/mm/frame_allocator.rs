//! Physical frame allocator: a 4 KiB frame bitmap over the single largest
//! usable region reported at boot handoff (spec §4.1).
//!
//! Single-threaded at init (the scheduler is not up yet); a [`SpinLock`]
//! protects the bitmap afterwards. Grounded in
//! `original_source/src/memory/pmm.c` (`physical_memory_init` picks the
//! largest usable region and reserves every other memmap region that
//! overlaps it, plus the bitmap's own storage).

extern crate alloc;

use crate::sync::SpinLock;

pub const FRAME_SIZE: usize = 4096;

/// A physical frame address, always 4 KiB aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameAddr(pub u64);

impl FrameAddr {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

struct Bitmap {
    /// Bit `i` set iff frame `base + i * FRAME_SIZE` is allocated,
    /// reserved, or holds the bitmap itself.
    bits: &'static mut [u8],
    base: u64,
    frame_count: usize,
    total_memory: u64,
    reserved_memory: u64,
    used_memory: u64,
}

impl Bitmap {
    #[inline]
    fn is_set(&self, idx: usize) -> bool {
        self.bits[idx / 8] & (1 << (idx % 8)) != 0
    }

    #[inline]
    fn set(&mut self, idx: usize) {
        self.bits[idx / 8] |= 1 << (idx % 8);
    }

    #[inline]
    fn clear(&mut self, idx: usize) {
        self.bits[idx / 8] &= !(1 << (idx % 8));
    }

    fn addr_to_index(&self, addr: u64) -> Option<usize> {
        if addr < self.base {
            return None;
        }
        let idx = ((addr - self.base) / FRAME_SIZE as u64) as usize;
        if idx >= self.frame_count {
            return None;
        }
        Some(idx)
    }

    fn alloc_frame(&mut self) -> Option<FrameAddr> {
        for idx in 0..self.frame_count {
            if !self.is_set(idx) {
                self.set(idx);
                self.used_memory += FRAME_SIZE as u64;
                return Some(FrameAddr(self.base + (idx * FRAME_SIZE) as u64));
            }
        }
        None
    }

    fn alloc_contiguous(&mut self, n: usize) -> Option<FrameAddr> {
        if n == 0 {
            return None;
        }
        let mut run_start = None;
        let mut run_len = 0usize;
        for idx in 0..self.frame_count {
            if self.is_set(idx) {
                run_start = None;
                run_len = 0;
                continue;
            }
            if run_start.is_none() {
                run_start = Some(idx);
            }
            run_len += 1;
            if run_len == n {
                let start = run_start.unwrap();
                for i in start..start + n {
                    self.set(i);
                }
                self.used_memory += (n * FRAME_SIZE) as u64;
                return Some(FrameAddr(self.base + (start * FRAME_SIZE) as u64));
            }
        }
        None
    }

    fn free_frame(&mut self, addr: FrameAddr) {
        if let Some(idx) = self.addr_to_index(addr.0) {
            if self.is_set(idx) {
                self.clear(idx);
                self.used_memory = self.used_memory.saturating_sub(FRAME_SIZE as u64);
            }
        }
        // Address outside the bitmap: silently ignored (idempotence, §4.1).
    }

    fn free_contiguous(&mut self, addr: FrameAddr, n: usize) {
        for i in 0..n {
            self.free_frame(FrameAddr(addr.0 + (i * FRAME_SIZE) as u64));
        }
    }

    fn reserve_region(&mut self, base: u64, len: u64) {
        let aligned_base = base & !(FRAME_SIZE as u64 - 1);
        let end = base + len;
        let aligned_end = (end + FRAME_SIZE as u64 - 1) & !(FRAME_SIZE as u64 - 1);
        let mut addr = aligned_base;
        while addr < aligned_end {
            if let Some(idx) = self.addr_to_index(addr) {
                if !self.is_set(idx) {
                    self.set(idx);
                    self.reserved_memory += FRAME_SIZE as u64;
                }
            }
            addr += FRAME_SIZE as u64;
        }
    }

    fn free_count(&self) -> usize {
        let mut free = 0;
        for idx in 0..self.frame_count {
            if !self.is_set(idx) {
                free += 1;
            }
        }
        free
    }
}

static PMM: SpinLock<Option<Bitmap>> = SpinLock::new("pmm", None);

/// One usable memmap region as reported by the boot handoff.
#[derive(Debug, Clone, Copy)]
pub struct UsableRegion {
    pub base: u64,
    pub length: u64,
}

/// A reserved (non-usable) memmap region.
#[derive(Debug, Clone, Copy)]
pub struct ReservedRegion {
    pub base: u64,
    pub length: u64,
}

/// Initialize the PMM bitmap over the single largest usable region, then
/// reserve every other memmap region that overlaps the bitmap's address
/// range plus the bitmap's own backing storage.
///
/// # Safety
/// `hhdm_offset` must be the bootloader-provided HHDM offset; the bitmap
/// storage is carved out of the largest usable region itself and accessed
/// through the HHDM alias.
pub unsafe fn init(usable: &[UsableRegion], reserved: &[ReservedRegion], hhdm_offset: u64) {
    let largest = usable
        .iter()
        .max_by_key(|r| r.length)
        .expect("no usable memory region reported by bootloader");

    let frame_count = (largest.length / FRAME_SIZE as u64) as usize;
    let bitmap_bytes = frame_count.div_ceil(8);
    let bitmap_frames = bitmap_bytes.div_ceil(FRAME_SIZE);
    let bitmap_phys = largest.base;

    // SAFETY: `bitmap_phys + hhdm_offset` is mapped by the bootloader's
    // HHDM for every usable physical frame, and the bitmap occupies
    // `bitmap_frames` whole frames at the start of the largest region.
    let bitmap_ptr = (bitmap_phys + hhdm_offset) as *mut u8;
    let bits = unsafe { core::slice::from_raw_parts_mut(bitmap_ptr, bitmap_bytes) };
    bits.fill(0);

    let mut bitmap = Bitmap {
        bits,
        base: largest.base,
        frame_count,
        total_memory: largest.length,
        reserved_memory: 0,
        used_memory: 0,
    };

    bitmap.reserve_region(bitmap_phys, (bitmap_frames * FRAME_SIZE) as u64);

    for region in reserved {
        bitmap.reserve_region(region.base, region.length);
    }
    for region in usable {
        if region.base != largest.base {
            bitmap.reserve_region(region.base, region.length);
        }
    }

    *PMM.lock() = Some(bitmap);
    log::info!(
        "pmm: {} frames over {} KiB at {:#x}",
        frame_count,
        largest.length / 1024,
        largest.base
    );
}

pub fn alloc_frame() -> Option<FrameAddr> {
    PMM.lock().as_mut()?.alloc_frame()
}

pub fn alloc_contiguous(n: usize) -> Option<FrameAddr> {
    PMM.lock().as_mut()?.alloc_contiguous(n)
}

pub fn free_frame(addr: FrameAddr) {
    if let Some(bitmap) = PMM.lock().as_mut() {
        bitmap.free_frame(addr);
    }
}

pub fn free_contiguous(addr: FrameAddr, n: usize) {
    if let Some(bitmap) = PMM.lock().as_mut() {
        bitmap.free_contiguous(addr, n);
    }
}

pub fn reserve_region(base: u64, len: u64) {
    if let Some(bitmap) = PMM.lock().as_mut() {
        bitmap.reserve_region(base, len);
    }
}

pub fn total_memory() -> u64 {
    PMM.lock().as_ref().map(|b| b.total_memory).unwrap_or(0)
}

pub fn reserved_memory() -> u64 {
    PMM.lock().as_ref().map(|b| b.reserved_memory).unwrap_or(0)
}

pub fn used_memory() -> u64 {
    PMM.lock().as_ref().map(|b| b.used_memory).unwrap_or(0)
}

pub fn free_memory() -> u64 {
    PMM.lock()
        .as_ref()
        .map(|b| (b.free_count() * FRAME_SIZE) as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;

    use super::*;

    fn make_bitmap(frame_count: usize, storage: &'static mut [u8]) -> Bitmap {
        Bitmap {
            bits: storage,
            base: 0x1000_0000,
            frame_count,
            total_memory: (frame_count * FRAME_SIZE) as u64,
            reserved_memory: 0,
            used_memory: 0,
        }
    }

    #[test]
    fn alloc_and_free_round_trips() {
        let storage: &'static mut [u8] = Box::leak(Box::new([0u8; 16]));
        let mut bm = make_bitmap(100, storage);
        let free_before = bm.free_count();
        let a = bm.alloc_frame().unwrap();
        assert_eq!(bm.free_count(), free_before - 1);
        bm.free_frame(a);
        assert_eq!(bm.free_count(), free_before);
    }

    #[test]
    fn contiguous_alloc_finds_run() {
        let storage: &'static mut [u8] = Box::leak(Box::new([0u8; 16]));
        let mut bm = make_bitmap(100, storage);
        bm.alloc_frame(); // frame 0
        let run = bm.alloc_contiguous(4).unwrap();
        assert_eq!(run.0, bm.base + FRAME_SIZE as u64);
    }

    #[test]
    fn free_outside_bitmap_is_ignored() {
        let storage: &'static mut [u8] = Box::leak(Box::new([0u8; 16]));
        let mut bm = make_bitmap(100, storage);
        bm.free_frame(FrameAddr(0xdead_0000));
    }
}
