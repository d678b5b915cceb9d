//! Debug console byte port (spec §6): QEMU's `isa-debug-exit`/`debugcon`
//! device at I/O port 0xE9 echoes every byte written to it to the host's
//! stderr, with no handshake or status register to poll. Grounded in
//! `original_source/src/debug/console.c`.

use x86_64::instructions::port::Port;

const DEBUG_PORT: u16 = 0xE9;

pub fn write_byte(byte: u8) {
    // SAFETY: port 0xE9 is write-only and side-effect-free beyond echoing
    // the byte to the host; safe to call from any context, including IRQ
    // handlers and panic paths.
    unsafe {
        Port::new(DEBUG_PORT).write(byte);
    }
}

pub fn write_str(s: &str) {
    for byte in s.bytes() {
        write_byte(byte);
    }
}
