//! Spin locks: non-sleeping mutual exclusion that disables interrupts on
//! the holding hart.

use core::hint::spin_loop;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use super::{Guard, Lock, RawLock};
use crate::proc::{mycpu, Cpu};
use crate::riscv::{intr_get, intr_off, intr_on};

/// Mutual exclusion lock that busy-waits.
pub struct RawSpinlock {
    name: &'static str,

    /// Null when unlocked; otherwise the owning hart's `Cpu`.
    ///
    /// Doubles as the `holding()` witness, so acquisition records it with
    /// `Ordering::Acquire` and release clears it with `Ordering::Release`.
    locked: AtomicPtr<Cpu>,
}

pub type Spinlock<T> = Lock<RawSpinlock, T>;
pub type SpinlockGuard<'s, T> = Guard<'s, RawSpinlock, T>;

impl RawSpinlock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            locked: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl RawLock for RawSpinlock {
    /// Disables interrupts on this hart, then spins until the lock is free.
    ///
    /// Interrupts must be off *before* we start spinning, or a timer
    /// interrupt that tries to acquire a lock we already hold on this hart
    /// would deadlock it against itself.
    fn acquire(&self) {
        // SAFETY: push_off/pop_off always nest correctly because every
        // `acquire` is paired with exactly one `release`.
        unsafe { push_off() };
        assert!(!self.holding(), "acquire: {} already held", self.name);

        let me = mycpu();
        while self
            .locked
            .compare_exchange_weak(ptr::null_mut(), me, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
    }

    fn release(&self) {
        assert!(self.holding(), "release: {} not held", self.name);
        self.locked.store(ptr::null_mut(), Ordering::Release);
        // SAFETY: matches the `push_off` in `acquire`.
        unsafe { pop_off() };
    }

    /// Whether this hart holds the lock. Safe to call with interrupts on or
    /// off; temporarily disables them either way to read `mycpu()` safely.
    fn holding(&self) -> bool {
        unsafe { push_off() };
        let r = self.locked.load(Ordering::Relaxed) == mycpu();
        unsafe { pop_off() };
        r
    }
}

impl<T> Spinlock<T> {
    pub const fn new_named(name: &'static str, data: T) -> Self {
        Lock::new(RawSpinlock::new(name), data)
    }
}

/// `push_off`/`pop_off` are like `intr_off`/`intr_on`, except matched: it
/// takes two `pop_off`s to undo two `push_off`s. If interrupts were already
/// off before the first `push_off`, `pop_off` leaves them off.
///
/// # Safety
///
/// Every `push_off` must be paired with exactly one later `pop_off` on the
/// same hart, with no intervening `yield_`.
pub unsafe fn push_off() {
    let was_enabled = unsafe { intr_get() };
    unsafe { intr_off() };

    let cpu = unsafe { &mut *mycpu() };
    if cpu.noff == 0 {
        cpu.interrupt_enabled = was_enabled;
    }
    cpu.noff += 1;
}

/// See [`push_off`].
///
/// # Safety
///
/// Must be paired with a preceding `push_off` on the same hart.
pub unsafe fn pop_off() {
    assert!(!unsafe { intr_get() }, "pop_off: interruptible");
    let cpu = unsafe { &mut *mycpu() };
    assert!(cpu.noff >= 1, "pop_off: unbalanced");
    cpu.noff -= 1;
    if cpu.noff == 0 && cpu.interrupt_enabled {
        unsafe { intr_on() };
    }
}
