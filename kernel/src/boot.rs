//! Limine boot handoff: base-revision check, memory map, and the HHDM
//! offset (spec §6 "Boot handoff & early console").
//!
//! Grounded in `original_source/src/memory/pmm.c`'s
//! `physical_memory_init`, which walks a `struct limine_memmap_response`
//! the same way this module walks the `limine` crate's typed request
//! responses. A framebuffer request is declared because the bootloader
//! protocol expects one alongside memmap/HHDM, but the response is never
//! read: graphics output is an explicit Non-goal (spec §1), so this
//! kernel's only console is the debug byte-port.

use limine::request::{FramebufferRequest, HhdmRequest, MemoryMapRequest, RequestsEndMarker, RequestsStartMarker};
use limine::BaseRevision;
use limine::memory_map::EntryType;

use crate::mm::{ReservedRegion, UsableRegion};

#[used]
#[link_section = ".requests_start_marker"]
static _START_MARKER: RequestsStartMarker = RequestsStartMarker::new();

#[used]
#[link_section = ".requests_end_marker"]
static _END_MARKER: RequestsEndMarker = RequestsEndMarker::new();

#[used]
#[link_section = ".requests"]
static BASE_REVISION: BaseRevision = BaseRevision::new();

#[used]
#[link_section = ".requests"]
static MEMMAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

#[used]
#[link_section = ".requests"]
static HHDM_REQUEST: HhdmRequest = HhdmRequest::new();

#[used]
#[link_section = ".requests"]
static FRAMEBUFFER_REQUEST: FramebufferRequest = FramebufferRequest::new();

/// Fixed capacity for the region arrays handed to `mm::init`. The memmap
/// on real QEMU/Bochs machines never exceeds a few dozen entries.
const MAX_REGIONS: usize = 64;

pub struct Handoff {
    pub hhdm_offset: u64,
    pub usable: [UsableRegion; MAX_REGIONS],
    pub usable_count: usize,
    pub reserved: [ReservedRegion; MAX_REGIONS],
    pub reserved_count: usize,
}

/// Reads and validates the Limine requests. Panics if the bootloader
/// didn't honor the base revision or omitted a required response — there
/// is no recovering from a boot protocol mismatch (spec §7, hardware
/// fault class).
pub fn handoff() -> Handoff {
    assert!(BASE_REVISION.is_supported(), "boot: bootloader does not support requested base revision");

    let hhdm_offset = HHDM_REQUEST.get_response().expect("boot: no HHDM response").offset();

    let memmap = MEMMAP_REQUEST.get_response().expect("boot: no memory map response");

    let mut usable = [UsableRegion { base: 0, length: 0 }; MAX_REGIONS];
    let mut usable_count = 0;
    let mut reserved = [ReservedRegion { base: 0, length: 0 }; MAX_REGIONS];
    let mut reserved_count = 0;

    for entry in memmap.entries() {
        match entry.entry_type {
            EntryType::USABLE => {
                if usable_count < MAX_REGIONS {
                    usable[usable_count] = UsableRegion { base: entry.base, length: entry.length };
                    usable_count += 1;
                }
            }
            _ => {
                if reserved_count < MAX_REGIONS {
                    reserved[reserved_count] = ReservedRegion { base: entry.base, length: entry.length };
                    reserved_count += 1;
                }
            }
        }
    }

    if let Some(fb_response) = FRAMEBUFFER_REQUEST.get_response() {
        log::info!("boot: {} framebuffer(s) present, unused (graphics is out of scope)", fb_response.framebuffers().count());
    }

    log::info!(
        "boot: hhdm_offset={:#x}, {} usable region(s), {} reserved region(s)",
        hhdm_offset, usable_count, reserved_count
    );

    Handoff { hhdm_offset, usable, usable_count, reserved, reserved_count }
}
