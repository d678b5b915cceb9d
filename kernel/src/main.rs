//! cgos entry point: Limine handoff, subsystem bring-up, then the shell
//! (spec §2 control/data flow, §6 boot sequence).

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(cgos_kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;

use cgos_kernel::{arch, boot, debug, drivers, fs, mm, net, sched, shell};

#[no_mangle]
extern "C" fn _start() -> ! {
    debug::init();
    log::info!("cgos v{}", env!("CARGO_PKG_VERSION"));

    let handoff = boot::handoff();

    // SAFETY: this is the one and only call, made before any allocation
    // and with a valid boot handoff in hand.
    unsafe {
        mm::init(&handoff.usable[..handoff.usable_count], &handoff.reserved[..handoff.reserved_count], handoff.hhdm_offset);
    }

    arch::x86_64::init();
    sched::init();
    drivers::init(handoff.hhdm_offset);
    net::init();
    fs::init();

    // ATA stays masked: `drivers::ata::init` clears nIEN and the driver is
    // polling-only (spec §4.12), and the IDT has no handler for vector 0x2E.
    // Timer (IRQ0) and keyboard (IRQ1) are already unmasked by
    // `arch::x86_64::init`/`drivers::init` above.
    x86_64::instructions::interrupts::enable();

    #[cfg(test)]
    test_main();

    #[cfg(feature = "self_test")]
    if !cgos_kernel::self_test::run() {
        log::error!("cgos: self-test battery failed");
    }

    log::info!("cgos: boot sequence complete");
    shell::run();
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::error!("panic: {}", info);
    arch::halt_loop();
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    cgos_kernel::test_panic_handler(info)
}
