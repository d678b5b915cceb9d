//! PIC remap and IRQ line masking (spec §4.3).
//!
//! The 8259 pair is remapped to vectors 0x20–0x2F via the standard
//! ICW1–ICW4 sequence (delegated to the `pic8259` crate) with all lines
//! initially masked; drivers unmask the lines they own explicitly by
//! writing the data-port mask register directly. Grounded in
//! `original_source/src/cpu/pic.c`.

use pic8259::ChainedPics;
use x86_64::instructions::port::Port;

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = 40;

const PIC1_DATA: u16 = 0x21;
const PIC2_DATA: u16 = 0xA1;

/// IRQ line numbers relative to `PIC_1_OFFSET` (vector = offset + line).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Irq {
    Timer = 0,
    Keyboard = 1,
    Cascade = 2,
    PrimaryAta = 14,
    SecondaryAta = 15,
}

static PICS: crate::sync::SpinLock<ChainedPics> =
    // SAFETY: PIC_1_OFFSET/PIC_2_OFFSET land entirely within the spare
    // vector range and do not collide with CPU exceptions.
    crate::sync::SpinLock::new("pic", unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

/// # Safety
/// Must run once, before the IDT is loaded and before any IRQ line is
/// unmasked.
pub unsafe fn init() {
    // SAFETY: the PIC pair is only remapped here, under the PICS lock, and
    // ICW4_8086 plus an all-mask write is what `initialize` performs.
    unsafe {
        PICS.lock().initialize();
    }
}

fn set_masked(irq: Irq, masked: bool) {
    let line = irq as u8;
    let (port_addr, bit) = if line < 8 { (PIC1_DATA, line) } else { (PIC2_DATA, line - 8) };
    // SAFETY: toggling one mask bit on an already-remapped PIC data port;
    // no memory-safety implications, only which lines reach the CPU.
    unsafe {
        let mut port = Port::<u8>::new(port_addr);
        let cur: u8 = port.read();
        let next = if masked { cur | (1 << bit) } else { cur & !(1 << bit) };
        port.write(next);
    }
}

pub fn unmask(irq: Irq) {
    set_masked(irq, false);
}

pub fn mask(irq: Irq) {
    set_masked(irq, true);
}

/// Sends EOI for the given vector (32..=47). Must be called at the end of
/// every IRQ handler.
pub fn end_of_interrupt(vector: u8) {
    // SAFETY: `vector` is a real IRQ vector delivered to an IDT handler
    // currently executing; EOI is always valid to send in that context.
    unsafe {
        PICS.lock().notify_end_of_interrupt(vector);
    }
}
