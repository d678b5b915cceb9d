//! Host-side `#[test]` support and the QEMU isa-debug-exit harness used by
//! `cargo test --target x86_64-unknown-none` (the `qemu_exit` feature).
//!
//! Grounded in the teacher's own test harness: a custom `test_runner` that
//! logs through the debug console instead of a VGA buffer, and exits QEMU
//! with a status code the `basic_boot` integration test's runner script
//! greps for.

use core::panic::PanicInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

/// Writes the exit code to the isa-debug-exit port and never returns;
/// QEMU is configured (see `tools/qemu-run.sh`) to map this to its own
/// process exit code.
#[cfg(feature = "qemu_exit")]
pub fn exit_qemu(exit_code: QemuExitCode) -> ! {
    use x86_64::instructions::port::Port;
    // SAFETY: port 0xf4 is the isa-debug-exit device configured in
    // `tools/qemu-run.sh`; writing to it is only ever observed by QEMU.
    unsafe {
        Port::new(0xf4).write(exit_code as u32);
    }
    crate::arch::halt_loop();
}

#[cfg(not(feature = "qemu_exit"))]
pub fn exit_qemu(_exit_code: QemuExitCode) -> ! {
    crate::arch::halt_loop();
}

pub trait Testable {
    fn run(&self);
}

impl<T: Fn()> Testable for T {
    fn run(&self) {
        log::info!("{}...", core::any::type_name::<T>());
        self();
        log::info!("  [ok]");
    }
}

#[cfg(target_os = "none")]
pub fn test_runner(tests: &[&dyn Testable]) {
    log::info!("running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}

pub fn test_panic_handler(info: &PanicInfo) -> ! {
    log::error!("[failed]\n{}", info);
    exit_qemu(QemuExitCode::Failed)
}
