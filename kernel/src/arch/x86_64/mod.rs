//! x86_64 CPU plumbing: GDT/TSS, IDT, PIC remap, PIT programming, and the
//! debug-console byte port (spec §4.3, §4.5, §6).

pub mod context;
pub mod gdt;
pub mod idt;
pub mod pit;
pub mod serial;

pub use ::x86_64::instructions;

/// Brings up the GDT/TSS, then the IDT and PIC (interrupts left masked),
/// then programs the PIT for a 1 kHz tick. Interrupts are enabled by the
/// caller once the rest of boot has run.
pub fn init() {
    gdt::init();
    idt::init();
    pit::init_1khz();
    log::info!("arch: GDT/TSS, IDT, and PIT initialized");
}
