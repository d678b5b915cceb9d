//! Monotonic tick counter driven by the PIT at 1 kHz (spec §4.5).
//!
//! Single writer (the timer IRQ handler), so `get_ticks` reads the counter
//! without locking. Grounded in `original_source/src/cpu/pit.c`.

use core::sync::atomic::{AtomicU64, Ordering};

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Called once per PIT interrupt (IRQ0). Also drives the scheduler tick.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    crate::sched::timer_tick();
}

/// Reads the tick counter without locking (single writer, per spec §4.5).
pub fn get_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Busy-waits on the tick counter for `n` milliseconds (1 tick == 1 ms).
pub fn sleep_ms(n: u64) {
    let deadline = get_ticks() + n;
    while get_ticks() < deadline {
        crate::sync::fences::cpu_relax();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_counter_is_monotonic() {
        let before = get_ticks();
        tick();
        assert!(get_ticks() > before);
    }
}
