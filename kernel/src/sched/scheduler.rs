//! Core scheduler: thread creation, pick-next, tick handler, yield,
//! sleep/block/unblock, and termination (spec §4.7).
//!
//! Grounded in `original_source/src/sched/scheduler.c`. The global state
//! (thread table, queues, current thread) is guarded by one spinlock and
//! touched from both thread context and the timer IRQ, per spec §5.

use crate::arch::x86_64::{context, gdt};
use crate::sync::SpinLock;

use super::queue::{BlockedQueue, ReadyQueues, SleepQueue, ThreadTable};
use super::task::{EntryFn, Thread, ThreadId, ThreadState, PRIORITY_IDLE};

struct Scheduler {
    table: ThreadTable,
    ready: ReadyQueues,
    sleeping: SleepQueue,
    blocked: BlockedQueue,
    current: Option<ThreadId>,
    idle: Option<ThreadId>,
}

impl Scheduler {
    const fn new() -> Self {
        Self {
            table: ThreadTable::new(),
            ready: ReadyQueues::new(),
            sleeping: SleepQueue::new(),
            blocked: BlockedQueue::new(),
            current: None,
            idle: None,
        }
    }
}

static SCHED: SpinLock<Scheduler> = SpinLock::new("sched", Scheduler::new());

extern "C" fn idle_entry(_arg: usize) -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

/// Creates the idle thread. Called once at boot; the idle thread never
/// enters a ready queue (spec §8 boundary behavior) and runs only via
/// [`pick_next`]'s fallback.
pub fn init() {
    let tid = spawn_with_priority("idle", idle_entry, 0, PRIORITY_IDLE).expect("failed to create idle thread");
    let mut sched = SCHED.lock();
    sched.idle = Some(tid);
    if let Some(t) = sched.table.get_mut(tid) {
        t.state = ThreadState::Ready;
    }
    log::info!("sched: scheduler initialized");
}

/// Creates a thread at its own priority as its base priority, enqueues it
/// ready, and returns its ID.
pub fn spawn(name: &str, entry: EntryFn, arg: usize, priority: u8) -> Option<ThreadId> {
    let tid = spawn_with_priority(name, entry, arg, priority)?;
    let mut sched = SCHED.lock();
    sched.ready.push(&mut sched.table, tid);
    Some(tid)
}

fn spawn_with_priority(name: &str, entry: EntryFn, arg: usize, priority: u8) -> Option<ThreadId> {
    let stack_base = super::task::alloc_kernel_stack()?;
    let stack_top = stack_base + super::task::KERNEL_STACK_SIZE as u64;
    let saved_rsp = context::prepare_initial_stack(stack_top, entry as u64, arg as u64);

    let mut sched = SCHED.lock();
    sched.table.insert(|tid| {
        let mut t = Thread::new(tid, name, entry, arg, priority, stack_base);
        t.saved_rsp = saved_rsp;
        t
    })
}

/// Picks the next thread to run (lowest-index non-empty ready queue, FIFO
/// within a level; idle thread otherwise) and performs the context switch.
/// Must be called with interrupts disabled.
fn pick_next_and_switch() {
    let (old_tid, old_rsp_slot, new_tid, new_rsp, new_stack_top) = {
        let mut sched = SCHED.lock();
        let next = sched.ready.pop_next(&mut sched.table).unwrap_or_else(|| sched.idle.unwrap());
        let old = sched.current;
        sched.current = Some(next);

        if let Some(t) = sched.table.get_mut(next) {
            t.state = ThreadState::Running;
            t.begin_slice();
        }

        let old_rsp_slot = old
            .and_then(|o| sched.table.get_mut(o))
            .map(|t| core::ptr::addr_of_mut!(t.saved_rsp))
            .unwrap_or(core::ptr::null_mut());
        let new_rsp = sched.table.get(next).map(|t| t.saved_rsp).unwrap_or(0);
        let new_stack_top = sched
            .table
            .get(next)
            .map(|t| t.stack_base + t.stack_size)
            .unwrap_or(0);

        (old, old_rsp_slot, next, new_rsp, new_stack_top)
    };

    if old_tid == Some(new_tid) {
        return;
    }

    gdt::set_kernel_stack(new_stack_top);

    let mut scratch: u64 = 0;
    let slot = if old_rsp_slot.is_null() { &mut scratch as *mut u64 } else { old_rsp_slot };

    // SAFETY: `slot` targets either the outgoing thread's TCB `saved_rsp`
    // field or a throwaway local (first dispatch has no outgoing thread);
    // `new_rsp` was produced by `prepare_initial_stack` or a prior switch.
    unsafe {
        context::switch(slot, new_rsp);
    }
}

/// Called once per PIT tick (spec §4.7 tick handler). Advances the current
/// thread's usage counters, wakes expired sleepers, and preempts when the
/// slice is exhausted.
pub fn timer_tick() {
    let now = crate::timer::get_ticks();
    let should_switch = {
        let mut sched = SCHED.lock();

        let woken = sched.sleeping.drain_expired(&mut sched.table, now);
        for tid in woken.iter() {
            sched.ready.push(&mut sched.table, tid);
        }

        let Some(cur) = sched.current else { return };
        let is_idle = sched.idle == Some(cur);

        let mut expired = false;
        if let Some(t) = sched.table.get_mut(cur) {
            t.total_ticks += 1;
            if !is_idle {
                t.ticks_used_this_slice += 1;
                if t.ticks_remaining > 0 {
                    t.ticks_remaining -= 1;
                }
                expired = t.ticks_remaining == 0;
            }
        }

        if expired {
            let usage = sched
                .table
                .get(cur)
                .map(|t| (t.ticks_used_this_slice * 100 / t.slice_length.max(1)) as u8)
                .unwrap_or(0);
            if let Some(t) = sched.table.get_mut(cur) {
                t.record_cpu_usage(usage);
                t.adjust_priority();
            }
            sched.ready.push(&mut sched.table, cur);
        }

        expired
    };

    if should_switch {
        pick_next_and_switch();
    }
}

/// Voluntary yield (spec §4.7): records usage for the partial slice,
/// adjusts priority, re-enqueues (unless terminated), and reschedules.
pub fn yield_now() {
    crate::sync::with_irqs_disabled(|| {
        {
            let mut sched = SCHED.lock();
            let Some(cur) = sched.current else { return };
            if sched.idle == Some(cur) {
                drop(sched);
                pick_next_and_switch();
                return;
            }
            let usage = sched
                .table
                .get(cur)
                .map(|t| (t.ticks_used_this_slice * 100 / t.slice_length.max(1)) as u8)
                .unwrap_or(0);
            if let Some(t) = sched.table.get_mut(cur) {
                if t.state != ThreadState::Terminated {
                    t.record_cpu_usage(usage);
                    t.adjust_priority();
                }
            }
            let terminated = sched.table.get(cur).map(|t| t.state == ThreadState::Terminated).unwrap_or(true);
            if !terminated {
                sched.ready.push(&mut sched.table, cur);
            }
        }
        pick_next_and_switch();
    });
}

/// Puts the current thread to sleep until `wake_time` (absolute ticks).
pub fn sleep_until(wake_time: u64) {
    crate::sync::with_irqs_disabled(|| {
        {
            let mut sched = SCHED.lock();
            let Some(cur) = sched.current else { return };
            sched.sleeping.insert(&mut sched.table, cur, wake_time);
        }
        pick_next_and_switch();
    });
}

/// Blocks the current thread (e.g. waiting on a resource). The caller is
/// responsible for calling [`unblock`] from elsewhere once the resource is
/// available.
pub fn block_current() {
    crate::sync::with_irqs_disabled(|| {
        {
            let mut sched = SCHED.lock();
            let Some(cur) = sched.current else { return };
            sched.blocked.push(&mut sched.table, cur);
        }
        pick_next_and_switch();
    });
}

/// Moves a blocked thread back onto its priority's ready queue.
pub fn unblock(tid: ThreadId) {
    crate::sync::with_irqs_disabled(|| {
        let mut sched = SCHED.lock();
        if sched.blocked.remove(&mut sched.table, tid) {
            sched.ready.push(&mut sched.table, tid);
        }
    });
}

/// Terminates the current thread and switches away. Never returns.
pub fn thread_exit() -> ! {
    crate::sync::with_irqs_disabled(|| {
        let mut sched = SCHED.lock();
        if let Some(cur) = sched.current {
            if let Some(t) = sched.table.get_mut(cur) {
                t.state = ThreadState::Terminated;
            }
        }
    });
    pick_next_and_switch();
    unreachable!("terminated thread resumed");
}

/// Reclaims the stacks and slots of every terminated thread. Not IRQ-safe
/// to call with the reaped thread still `current`; run from a dedicated
/// low-priority reaper or between dispatches.
pub fn reap_terminated() {
    let mut sched = SCHED.lock();
    let mut to_reap = [0u64; super::queue::MAX_THREADS];
    let mut count = 0;
    for tid in 1..=(super::queue::MAX_THREADS as u64) {
        if sched.current == Some(tid) {
            continue;
        }
        if let Some(t) = sched.table.get(tid) {
            if t.state == ThreadState::Terminated {
                to_reap[count] = t.stack_base;
                count += 1;
            }
        }
    }
    for i in 0..count {
        let base = to_reap[i];
        super::task::free_kernel_stack(base);
    }
    for tid in 1..=(super::queue::MAX_THREADS as u64) {
        if sched.table.get(tid).map(|t| t.state == ThreadState::Terminated).unwrap_or(false) && sched.current != Some(tid) {
            sched.table.remove(tid);
        }
    }
}

pub fn current_tid() -> Option<ThreadId> {
    SCHED.lock().current
}

#[cfg(test)]
mod tests {
    #[test]
    fn idle_never_in_ready_queue() {
        // The idle thread is created and tracked, but `spawn_with_priority`
        // never calls `ReadyQueues::push` for it; `init` only marks it
        // Ready in its TCB, matching spec §8's boundary behavior.
    }
}
