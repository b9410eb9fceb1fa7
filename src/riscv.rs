//! RISC-V register and CSR access primitives.
//!
//! Everything here is a thin, `#[inline]` wrapper around a single CSR
//! instruction. The higher layers (spinlock, page allocator, ...) only ever
//! call the named accessors below, never raw `asm!`.
#![allow(dead_code)]

use core::arch::asm;

/// Bytes per page.
pub const PGSIZE: usize = 4096;

/// Bits of offset within a page.
pub const PGSHIFT: usize = 12;

/// Round `sz` up to the next page boundary.
pub const fn pgroundup(sz: usize) -> usize {
    (sz + PGSIZE - 1) & !(PGSIZE - 1)
}

/// Round `addr` down to the enclosing page boundary.
pub const fn pgrounddown(addr: usize) -> usize {
    addr & !(PGSIZE - 1)
}

// Supervisor Status Register, sstatus.
const SSTATUS_SIE: usize = 1 << 1;

/// Supervisor Interrupt Enable CSR bits.
const SIE_SEIE: usize = 1 << 9;
const SIE_STIE: usize = 1 << 5;
const SIE_SSIE: usize = 1 << 1;

cfg_if::cfg_if! {
    if #[cfg(not(test))] {
        #[inline]
        unsafe fn r_sstatus() -> usize {
            let x: usize;
            unsafe { asm!("csrr {}, sstatus", out(reg) x, options(nomem, nostack)) };
            x
        }

        #[inline]
        unsafe fn w_sstatus(x: usize) {
            unsafe { asm!("csrw sstatus, {}", in(reg) x, options(nomem, nostack)) };
        }

        #[inline]
        unsafe fn r_sie() -> usize {
            let x: usize;
            unsafe { asm!("csrr {}, sie", out(reg) x, options(nomem, nostack)) };
            x
        }

        #[inline]
        unsafe fn w_sie(x: usize) {
            unsafe { asm!("csrw sie, {}", in(reg) x, options(nomem, nostack)) };
        }

        /// Read `tp`, the thread pointer, which this kernel uses to hold the
        /// current hart's id (the index into the `Cpu` array).
        #[inline]
        pub unsafe fn r_tp() -> usize {
            let x: usize;
            unsafe { asm!("mv {}, tp", out(reg) x, options(nomem, nostack)) };
            x
        }

        /// Write `tp`.
        ///
        /// # Safety
        ///
        /// Must only be called once per hart, during early boot, before any code
        /// relies on `tp` holding the hart id.
        #[inline]
        pub unsafe fn w_tp(x: usize) {
            unsafe { asm!("mv tp, {}", in(reg) x, options(nomem, nostack)) };
        }

        /// Flush the whole TLB.
        #[inline]
        pub unsafe fn sfence_vma() {
            unsafe { asm!("sfence.vma zero, zero", options(nostack)) };
        }
    } else {
        // Host unit tests run on whatever architecture the developer's
        // machine has, not riscv64, so there is no real `sstatus`/`tp` to
        // read. Each host OS thread stands in for one hart: `tp` becomes a
        // thread-local counter and `sstatus.SIE` a thread-local flag, giving
        // the lock and scheduler-contract tests the same push_off/pop_off
        // nesting behavior they'd see on real hardware.
        use std::cell::Cell;
        use std::sync::atomic::{AtomicUsize, Ordering};

        /// Assigns each OS thread a distinct fake hart id on first use, so
        /// tests that run concurrently don't all collide on "hart 0".
        static NEXT_FAKE_HART: AtomicUsize = AtomicUsize::new(0);

        std::thread_local! {
            static FAKE_SSTATUS: Cell<usize> = const { Cell::new(SSTATUS_SIE) };
            static FAKE_TP: Cell<usize> = Cell::new(
                NEXT_FAKE_HART.fetch_add(1, Ordering::Relaxed) % crate::param::NCPU
            );
        }

        #[inline]
        unsafe fn r_sstatus() -> usize {
            FAKE_SSTATUS.with(|s| s.get())
        }

        #[inline]
        unsafe fn w_sstatus(x: usize) {
            FAKE_SSTATUS.with(|s| s.set(x));
        }

        #[inline]
        unsafe fn r_sie() -> usize {
            0
        }

        #[inline]
        unsafe fn w_sie(_x: usize) {}

        pub unsafe fn r_tp() -> usize {
            FAKE_TP.with(|tp| tp.get())
        }

        pub unsafe fn w_tp(x: usize) {
            FAKE_TP.with(|tp| tp.set(x));
        }

        pub unsafe fn sfence_vma() {}
    }
}

/// Enable device interrupts on the current hart.
///
/// # Safety
///
/// Must not be called while a spinlock is held: a lock's `push_off`/`pop_off`
/// nesting is the only code allowed to flip this flag.
#[inline]
pub unsafe fn intr_on() {
    unsafe {
        w_sie(r_sie() | SIE_SEIE | SIE_STIE | SIE_SSIE);
        w_sstatus(r_sstatus() | SSTATUS_SIE);
    }
}

/// Disable device interrupts on the current hart.
///
/// # Safety
///
/// See [`intr_on`].
#[inline]
pub unsafe fn intr_off() {
    unsafe { w_sstatus(r_sstatus() & !SSTATUS_SIE) };
}

/// Are device interrupts currently enabled on this hart?
#[inline]
pub unsafe fn intr_get() -> bool {
    unsafe { r_sstatus() & SSTATUS_SIE != 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pgroundup_rounds_to_page_boundary() {
        assert_eq!(pgroundup(0), 0);
        assert_eq!(pgroundup(1), PGSIZE);
        assert_eq!(pgroundup(PGSIZE), PGSIZE);
        assert_eq!(pgroundup(PGSIZE + 1), 2 * PGSIZE);
    }

    #[test]
    fn pgrounddown_rounds_to_page_boundary() {
        assert_eq!(pgrounddown(0), 0);
        assert_eq!(pgrounddown(PGSIZE - 1), 0);
        assert_eq!(pgrounddown(PGSIZE), PGSIZE);
        assert_eq!(pgrounddown(PGSIZE + 1), PGSIZE);
    }
}
