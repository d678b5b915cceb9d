//! Preemptive multi-level adaptive scheduler (spec §4.7).

pub mod queue;
pub mod scheduler;
pub mod task;

pub use scheduler::{
    block_current, current_tid, reap_terminated, sleep_until, thread_exit, timer_tick, unblock, yield_now,
};
pub use task::{EntryFn, ThreadId};

/// Creates the idle thread. Call once after the timer and IRQs are set up
/// but before interrupts are enabled.
pub fn init() {
    scheduler::init();
}

/// Spawns a new kernel thread at the given base priority (0 = realtime,
/// 6 = idle) and enqueues it ready.
pub fn spawn(name: &str, entry: EntryFn, arg: usize, priority: u8) -> Option<ThreadId> {
    scheduler::spawn(name, entry, arg, priority)
}
