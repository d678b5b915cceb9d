//! Page-fault (#PF, vector 14) handling (spec §4.4).
//!
//! Reached via the common IDT trampoline with the CPU-pushed error code and
//! CR2. Grounded in `original_source/src/memory/fault.c`.

use bitflags::bitflags;

use super::{page_table::PageFlags, vmm};

bitflags! {
    /// Bits of the CPU-pushed page-fault error code.
    struct ErrorCode: u64 {
        const PRESENT         = 1 << 0;
        const WRITE           = 1 << 1;
        const USER            = 1 << 2;
        const RESERVED_WRITE  = 1 << 3;
        const INSTRUCTION_FETCH = 1 << 4;
    }
}

/// Lower/upper bound of the MMIO virtual window treated as auto-mappable
/// (spec §4.4 — distinct from the VMM's own bump-pointer window, which
/// starts well above this range; both are uncached device space).
const MMIO_FAULT_WINDOW_START: u64 = 0xE000_0000;
const MMIO_FAULT_WINDOW_END: u64 = 0x1_0000_0000;

/// Called by the IDT vector-14 stub. Returns normally if the fault was
/// repaired in-handler; halts with interrupts disabled otherwise.
pub fn handle(error_code: u64, faulting_addr: u64) {
    let code = ErrorCode::from_bits_truncate(error_code);
    let is_user = code.contains(ErrorCode::USER);

    if !is_user && (MMIO_FAULT_WINDOW_START..MMIO_FAULT_WINDOW_END).contains(&faulting_addr) {
        let page = faulting_addr & !0xFFF;
        if vmm::map_page(page, page, PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::NO_CACHE | PageFlags::WRITE_THROUGH).is_ok() {
            return;
        }
    }

    log::error!(
        "page fault: addr={:#x} present={} write={} user={} fetch={}",
        faulting_addr,
        code.contains(ErrorCode::PRESENT),
        code.contains(ErrorCode::WRITE),
        is_user,
        code.contains(ErrorCode::INSTRUCTION_FETCH),
    );

    crate::arch::halt_loop();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmio_window_bounds_are_page_aligned() {
        assert_eq!(MMIO_FAULT_WINDOW_START % 4096, 0);
        assert_eq!(MMIO_FAULT_WINDOW_END % 4096, 0);
    }

    #[test]
    fn error_code_decodes_write_bit() {
        let code = ErrorCode::from_bits_truncate(0b10);
        assert!(code.contains(ErrorCode::WRITE));
        assert!(!code.contains(ErrorCode::USER));
    }
}
