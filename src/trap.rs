//! Trap gate contract.
//!
//! The trampoline assembly that actually swaps `stvec`, saves/restores the
//! user registers, and jumps here is an external collaborator (out of
//! scope, see the crate's top-level docs): it is expected to call
//! [`user_trap`] with interrupts still disabled and the user program
//! counter already stashed in the current process's [`Trapframe`]. This
//! module owns everything from there on: `scause` decoding, dispatch to the
//! syscall table (also external) vs. the device/timer paths, and stepping
//! the saved PC for a completed syscall.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::lock::Spinlock;
use crate::proc::{myproc, yield_};
use crate::riscv::intr_on;

/// Per-process saved user register file. Populated by the trampoline; only
/// the fields `exec` (§4.8) and the trap dispatcher need are named here.
#[repr(C)]
#[derive(Default, Clone, Copy)]
pub struct Trapframe {
    pub epc: usize,
    pub sp: usize,
    pub a0: usize,
}

/// `scause` values this kernel understands (RISC-V privileged spec, supervisor mode).
mod scause {
    /// Environment call from U-mode.
    pub const USER_ECALL: usize = 8;
    /// Interrupt bit plus supervisor-timer cause code.
    pub const SUPERVISOR_TIMER: usize = (1 << 63) | 1;
    /// Interrupt bit plus supervisor-external (PLIC) cause code.
    pub const SUPERVISOR_EXTERNAL: usize = (1 << 63) | 9;
}

pub enum Trap {
    Syscall,
    Timer,
    External,
    Unknown(usize),
}

impl Trap {
    pub fn decode(scause: usize) -> Self {
        match scause {
            scause::USER_ECALL => Trap::Syscall,
            scause::SUPERVISOR_TIMER => Trap::Timer,
            scause::SUPERVISOR_EXTERNAL => Trap::External,
            other => Trap::Unknown(other),
        }
    }
}

/// Ticks since boot. Only hart 0 increments this (see [`handle_timer`]), so
/// a plain `AtomicUsize` with `Relaxed` ordering is enough: readers only
/// care about rough elapsed time, never about happens-before some other
/// write.
pub static TICKS: AtomicUsize = AtomicUsize::new(0);
pub static TICKS_CHANNEL: crate::proc::WaitChannel = crate::proc::WaitChannel::new();

/// Dispatches a trap taken from user mode.
///
/// # Safety
///
/// Must be called by the trampoline with the user PC already saved into the
/// current process's trapframe and `stvec` already pointed at the kernel
/// vector. Returns once the syscall/interrupt has been handled and it is
/// safe to resume (or re-enter) user mode.
pub unsafe fn user_trap(scause: usize, hartid: usize) {
    debug_assert!(unsafe { !crate::riscv::intr_get() });

    match Trap::decode(scause) {
        Trap::Syscall => {
            if let Some(p) = myproc() {
                if crate::proc::killed(p) {
                    return;
                }
                // Advance past the `ecall` instruction so a restarted user
                // process doesn't re-issue the same syscall.
                let tf = current_trapframe(p);
                unsafe { (*tf).epc += 4 };
            }
            // Interrupts are safe to re-enable once the cause has been read
            // and the PC stepped; the syscall table itself is external.
            unsafe { intr_on() };
        }
        Trap::Timer => {
            handle_timer(hartid);
            unsafe { intr_on() };
            yield_();
        }
        Trap::External => {
            // PLIC dispatch (UART / virtio) lives in the driver layer; this
            // kernel only owns acknowledging that *a* device trap happened.
            unsafe { intr_on() };
        }
        Trap::Unknown(cause) => panic!("user_trap: unexpected scause {:#x}", cause),
    }
}

/// Returns a pointer to `p`'s trapframe. Population of the trapframe's
/// fields beyond what this crate touches (all the general-purpose
/// registers) is the trampoline's job.
fn current_trapframe(p: &crate::proc::Proc) -> *mut Trapframe {
    p.trapframe()
}

fn handle_timer(hartid: usize) {
    static TICK_LOCK: Spinlock<()> = Spinlock::new_named("ticks", ());
    if hartid == 0 {
        let _guard = TICK_LOCK.lock();
        TICKS.fetch_add(1, Ordering::Relaxed);
        TICKS_CHANNEL.wakeup();
    }
}
