//! cgos kernel library: the kernel core as a linkable crate, so
//! `#[cfg(test)]` unit tests can run on the host target while the real
//! boot binary (`main.rs`) links the same modules for `x86_64-unknown-none`.

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]
#![feature(custom_test_frameworks)]
#![feature(abi_x86_interrupt)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]
#![cfg_attr(target_os = "none", test_runner(crate::test_runner))]
#![cfg_attr(target_os = "none", reexport_test_harness_main = "test_main")]

#[cfg(feature = "alloc")]
extern crate alloc;

// Bare-metal target: the real kernel heap backs `GlobalAlloc` through
// `mm::vmm::alloc_kernel_pages`, registered as the `#[global_allocator]`
// in `mm::heap` itself.
// Host target (tests/coverage): delegate to the system allocator so
// Vec/String/alloc-using unit tests compile and run normally.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

pub mod arch;
pub mod boot;
pub mod debug;
pub mod drivers;
pub mod fs;
pub mod intrinsics;
pub mod irq;
pub mod mm;
pub mod net;
pub mod sched;
#[cfg(feature = "self_test")]
pub mod self_test;
pub mod shell;
pub mod sync;
pub mod test_framework;
pub mod timer;
pub mod utils;

pub use test_framework::{exit_qemu, test_panic_handler, QemuExitCode, Testable};
#[cfg(target_os = "none")]
pub use test_framework::test_runner;

#[cfg(all(test, target_os = "none"))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    debug::init();
    test_main();
    arch::halt_loop();
}

#[cfg(all(test, target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_framework::test_panic_handler(info)
}
