//! IDT: 256 gates, vectors 0–31 exceptions, 32–47 remapped IRQs, the
//! remainder spare (spec §4.3).
//!
//! Each handler lands through the `x86_64` crate's `extern "x86-interrupt"`
//! trampoline, which saves/restores the interrupt frame and executes
//! `iretq` on return — the idiomatic-Rust equivalent of the common
//! assembly trampoline described in `original_source/src/cpu/idt.c`.

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use super::gdt::DOUBLE_FAULT_IST_INDEX;
use crate::irq::Irq;

const IRQ_TIMER_VECTOR: u8 = crate::irq::PIC_1_OFFSET;
const IRQ_KEYBOARD_VECTOR: u8 = crate::irq::PIC_1_OFFSET + 1;

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();

        idt.divide_error.set_handler_fn(divide_error_handler);
        idt.debug.set_handler_fn(debug_handler);
        idt.non_maskable_interrupt.set_handler_fn(nmi_handler);
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.overflow.set_handler_fn(overflow_handler);
        idt.bound_range_exceeded.set_handler_fn(bound_range_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.device_not_available.set_handler_fn(device_not_available_handler);
        // SAFETY: the double-fault stack index names a valid IST slot set
        // up by `gdt::init`'s TSS.
        unsafe {
            idt.double_fault.set_handler_fn(double_fault_handler).set_stack_index(DOUBLE_FAULT_IST_INDEX);
        }
        idt.invalid_tss.set_handler_fn(invalid_tss_handler);
        idt.segment_not_present.set_handler_fn(segment_not_present_handler);
        idt.stack_segment_fault.set_handler_fn(stack_segment_fault_handler);
        idt.general_protection_fault.set_handler_fn(general_protection_fault_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.x87_floating_point.set_handler_fn(x87_fp_handler);
        idt.alignment_check.set_handler_fn(alignment_check_handler);
        idt.machine_check.set_handler_fn(machine_check_handler);
        idt.simd_floating_point.set_handler_fn(simd_fp_handler);

        idt[IRQ_TIMER_VECTOR as usize].set_handler_fn(timer_interrupt_handler);
        idt[IRQ_KEYBOARD_VECTOR as usize].set_handler_fn(keyboard_interrupt_handler);

        idt
    };
}

pub fn init() {
    IDT.load();
    // SAFETY: the PIC pair has not yet been remapped; this runs once,
    // before any IRQ line is unmasked, from a single-threaded boot context.
    unsafe {
        crate::irq::init();
    }
}

extern "x86-interrupt" fn divide_error_handler(frame: InterruptStackFrame) {
    log::error!("divide error\n{:#?}", frame);
    crate::arch::halt_loop();
}

extern "x86-interrupt" fn debug_handler(_frame: InterruptStackFrame) {}

extern "x86-interrupt" fn nmi_handler(frame: InterruptStackFrame) {
    log::error!("non-maskable interrupt\n{:#?}", frame);
}

extern "x86-interrupt" fn breakpoint_handler(frame: InterruptStackFrame) {
    log::warn!("breakpoint\n{:#?}", frame);
}

extern "x86-interrupt" fn overflow_handler(frame: InterruptStackFrame) {
    log::error!("overflow\n{:#?}", frame);
    crate::arch::halt_loop();
}

extern "x86-interrupt" fn bound_range_handler(frame: InterruptStackFrame) {
    log::error!("bound range exceeded\n{:#?}", frame);
    crate::arch::halt_loop();
}

extern "x86-interrupt" fn invalid_opcode_handler(frame: InterruptStackFrame) {
    log::error!("invalid opcode at {:#x}", frame.instruction_pointer.as_u64());
    crate::arch::halt_loop();
}

extern "x86-interrupt" fn device_not_available_handler(frame: InterruptStackFrame) {
    log::error!("device not available\n{:#?}", frame);
    crate::arch::halt_loop();
}

extern "x86-interrupt" fn double_fault_handler(frame: InterruptStackFrame, _error_code: u64) -> ! {
    log::error!("double fault\n{:#?}", frame);
    crate::arch::halt_loop();
}

extern "x86-interrupt" fn invalid_tss_handler(frame: InterruptStackFrame, error_code: u64) {
    log::error!("invalid TSS, selector {:#x}\n{:#?}", error_code, frame);
    crate::arch::halt_loop();
}

extern "x86-interrupt" fn segment_not_present_handler(frame: InterruptStackFrame, error_code: u64) {
    log::error!("segment not present, selector {:#x}\n{:#?}", error_code, frame);
    crate::arch::halt_loop();
}

extern "x86-interrupt" fn stack_segment_fault_handler(frame: InterruptStackFrame, error_code: u64) {
    log::error!("stack segment fault, selector {:#x}\n{:#?}", error_code, frame);
    crate::arch::halt_loop();
}

extern "x86-interrupt" fn general_protection_fault_handler(frame: InterruptStackFrame, error_code: u64) {
    log::error!("general protection fault, code {:#x}\n{:#?}", error_code, frame);
    crate::arch::halt_loop();
}

extern "x86-interrupt" fn page_fault_handler(_frame: InterruptStackFrame, error_code: PageFaultErrorCode) {
    let faulting_addr = x86_64::registers::control::Cr2::read()
        .map(|a| a.as_u64())
        .unwrap_or(0);
    crate::mm::page_fault::handle(error_code.bits(), faulting_addr);
}

extern "x86-interrupt" fn x87_fp_handler(frame: InterruptStackFrame) {
    log::error!("x87 floating point exception\n{:#?}", frame);
    crate::arch::halt_loop();
}

extern "x86-interrupt" fn alignment_check_handler(frame: InterruptStackFrame, _error_code: u64) {
    log::error!("alignment check\n{:#?}", frame);
    crate::arch::halt_loop();
}

extern "x86-interrupt" fn machine_check_handler(frame: InterruptStackFrame) -> ! {
    log::error!("machine check\n{:#?}", frame);
    crate::arch::halt_loop();
}

extern "x86-interrupt" fn simd_fp_handler(frame: InterruptStackFrame) {
    log::error!("SIMD floating point exception\n{:#?}", frame);
    crate::arch::halt_loop();
}

extern "x86-interrupt" fn timer_interrupt_handler(_frame: InterruptStackFrame) {
    crate::timer::tick();
    crate::irq::end_of_interrupt(IRQ_TIMER_VECTOR);
}

extern "x86-interrupt" fn keyboard_interrupt_handler(_frame: InterruptStackFrame) {
    crate::drivers::keyboard::handle_scancode();
    crate::irq::end_of_interrupt(IRQ_KEYBOARD_VECTOR);
}

#[allow(dead_code)]
const _: Irq = Irq::Keyboard;
