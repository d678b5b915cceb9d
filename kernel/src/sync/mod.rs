//! Synchronization primitives: spinlock, IRQ-save critical sections,
//! mutex, counting semaphore, and memory fences.
//!
//! The scheduler is not up during early boot, so these primitives never
//! block a thread onto a wait list; they busy-wait with a `pause` hint.
//! See the design notes on the "spinning mutex" smell: a future scheduler
//! integration may replace the spin loops with a real wait queue without
//! changing these call sites.

use core::sync::atomic::{AtomicBool, AtomicIsize, AtomicU64, Ordering};

use x86_64::instructions::{
    interrupts,
    interrupts::{are_enabled, disable, enable},
};

pub mod fences {
    //! Sequentially-consistent, acquire, and release fences plus a
    //! CPU-pause hint, grounded in `original_source/src/interrupt/sync.c`.
    use core::sync::atomic::{fence, Ordering};

    #[inline(always)]
    pub fn full() {
        fence(Ordering::SeqCst);
    }

    #[inline(always)]
    pub fn acquire() {
        fence(Ordering::Acquire);
    }

    #[inline(always)]
    pub fn release() {
        fence(Ordering::Release);
    }

    #[inline(always)]
    pub fn cpu_relax() {
        core::hint::spin_loop();
    }
}

/// Opaque state captured by [`critical_section_enter`]: whether interrupts
/// were enabled on entry, so they can be restored symmetrically.
#[derive(Debug, Clone, Copy)]
pub struct IrqState {
    were_enabled: bool,
}

/// `state := cli`, returning whatever IF was before the call.
///
/// Nests correctly: an inner enter/exit pair that runs while interrupts
/// are already disabled restores "disabled", not "enabled".
#[inline]
pub fn critical_section_enter() -> IrqState {
    let were_enabled = are_enabled();
    disable();
    IrqState { were_enabled }
}

/// Restores IF to whatever it was when the matching `enter` was called.
#[inline]
pub fn critical_section_exit(state: IrqState) {
    if state.were_enabled {
        enable();
    }
}

/// Runs `f` with interrupts disabled, restoring the prior IF on return
/// (including on panic-unwind, which the kernel does not use, but on early
/// return from `f`).
#[inline]
pub fn with_irqs_disabled<R>(f: impl FnOnce() -> R) -> R {
    let state = critical_section_enter();
    let r = f();
    critical_section_exit(state);
    r
}

/// Test-and-set spinlock with an owning name and a contention counter,
/// per spec §4.6.
pub struct SpinLock<T> {
    locked: AtomicBool,
    name: &'static str,
    contention: AtomicU64,
    acquisitions: AtomicU64,
    data: core::cell::UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever granted through `SpinLockGuard`,
// which is only constructed while `locked` is held.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            name,
            contention: AtomicU64::new(0),
            acquisitions: AtomicU64::new(0),
            data: core::cell::UnsafeCell::new(data),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn contention(&self) -> u64 {
        self.contention.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let mut spun = false;
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            if !spun {
                self.contention.fetch_add(1, Ordering::Relaxed);
                spun = true;
            }
            fences::cpu_relax();
        }
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        SpinLockGuard { lock: self }
    }

    /// Acquire with interrupts disabled for the duration of the critical
    /// section, restoring IF on drop. The common idiom for state shared
    /// with an IRQ handler (tick counter, ready queues, keyboard ring).
    #[inline]
    pub fn lock_irq_save(&self) -> (SpinLockGuard<'_, T>, IrqState) {
        let state = critical_section_enter();
        (self.lock(), state)
    }

    /// # Safety
    /// Caller must already hold exclusive access (e.g. single-threaded
    /// boot, or interrupts are disabled and no other CPU exists).
    pub unsafe fn force_unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> core::ops::Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard implies `locked == true` and exclusive
        // access, established by `SpinLock::lock`.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> core::ops::DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see Deref.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// Spinlock-guarded boolean flag. Acquire spins cooperatively; there is no
/// blocking because the thread system may not yet be up when this is used
/// during early boot (§4.6).
pub struct Mutex {
    inner: SpinLock<bool>,
}

impl Mutex {
    pub const fn new(name: &'static str) -> Self {
        Self {
            inner: SpinLock::new(name, false),
        }
    }

    pub fn acquire(&self) {
        loop {
            let mut locked = self.inner.lock();
            if !*locked {
                *locked = true;
                return;
            }
            drop(locked);
            fences::cpu_relax();
        }
    }

    pub fn release(&self) {
        let mut locked = self.inner.lock();
        *locked = false;
    }
}

/// Counting semaphore bounded by `max`. `wait` spins until `count > 0`;
/// `signal` increments unless already at `max` (§4.6).
pub struct Semaphore {
    count: AtomicIsize,
    max: isize,
}

impl Semaphore {
    pub const fn new(initial: isize, max: isize) -> Self {
        Self {
            count: AtomicIsize::new(initial),
            max,
        }
    }

    pub fn wait(&self) {
        loop {
            let cur = self.count.load(Ordering::Acquire);
            if cur > 0
                && self
                    .count
                    .compare_exchange_weak(cur, cur - 1, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return;
            }
            fences::cpu_relax();
        }
    }

    pub fn signal(&self) {
        loop {
            let cur = self.count.load(Ordering::Acquire);
            if cur >= self.max {
                return;
            }
            if self
                .count
                .compare_exchange_weak(cur, cur + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    pub fn count(&self) -> isize {
        self.count.load(Ordering::Relaxed)
    }
}

/// Run `f` with interrupts disabled via the `x86_64` crate helper, used by
/// call sites that don't need the `IrqState` value back (e.g. one-shot
/// PIC/PIT programming during init).
#[inline]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    interrupts::without_interrupts(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinlock_mutual_exclusion() {
        let lock = SpinLock::new("test", 0u32);
        {
            let mut g = lock.lock();
            *g += 1;
        }
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn semaphore_bounds() {
        let sem = Semaphore::new(0, 2);
        sem.signal();
        sem.signal();
        sem.signal(); // saturates at max
        assert_eq!(sem.count(), 2);
        sem.wait();
        sem.wait();
        assert_eq!(sem.count(), 0);
    }

    #[test]
    fn mutex_acquire_release() {
        let m = Mutex::new("test");
        m.acquire();
        m.release();
        m.acquire();
        m.release();
    }
}
