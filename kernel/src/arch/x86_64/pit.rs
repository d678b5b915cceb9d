//! PIT (8253/8254) channel 0 programming (spec §4.5).
//!
//! Channel 0 is programmed in mode 3 (square wave) with divisor
//! `⌈1_193_182 / 1000⌉`, producing one interrupt per millisecond on IRQ0.
//! Grounded in `original_source/src/cpu/pit.c`.

use x86_64::instructions::port::Port;

const PIT_BASE_FREQUENCY_HZ: u32 = 1_193_182;
const COMMAND_PORT: u16 = 0x43;
const CHANNEL0_DATA_PORT: u16 = 0x40;

/// Channel 0, lobyte/hibyte access mode, mode 3 (square wave generator).
const COMMAND_CHANNEL0_MODE3: u8 = 0x36;

pub fn init_1khz() {
    let divisor = PIT_BASE_FREQUENCY_HZ.div_ceil(1000) as u16;

    // SAFETY: ports 0x43/0x40 are the PIT's well-known command and channel-0
    // data ports; this is the standard two-byte divisor load sequence.
    unsafe {
        let mut command: Port<u8> = Port::new(COMMAND_PORT);
        let mut data: Port<u8> = Port::new(CHANNEL0_DATA_PORT);
        command.write(COMMAND_CHANNEL0_MODE3);
        data.write((divisor & 0xFF) as u8);
        data.write((divisor >> 8) as u8);
    }

    crate::irq::unmask(crate::irq::Irq::Timer);
    log::info!("pit: channel 0 programmed for 1 kHz (divisor {})", divisor);
}
