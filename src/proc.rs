//! Trap/scheduler interface: per-hart state, the process table, and the
//! sleep/wakeup condition-variable primitive everything else in this crate
//! (sleep-locks, the buffer cache, the log, pipes) is built on.
//!
//! The scheduling *policy* (how `scheduler()` picks the next runnable
//! process) and process *lifecycle* (`fork`/`exit`/`wait`) are external to
//! the subsystems this crate specifies; what's implemented here is exactly
//! the contract of §4.7: `sleep`, `wakeup`, `yield_`, `killed`/`set_killed`,
//! `myproc`/`mycpu`.

use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

use array_macro::array;

use crate::lock::spinlock::RawSpinlock;
use crate::lock::{Guard, RawLock, Spinlock};
use crate::param::{MAXPROCNAME, NCPU, NPROC};
use crate::riscv::intr_get;
use crate::trap::Trapframe;
use crate::vm::PageTable;

/// Callee-saved register file swapped by `swtch`. The trampoline/context
/// switch assembly (external, see the crate's top-level docs) is the only
/// code that reads or writes these fields; the kernel only ever moves a
/// `Context` by reference into `swtch`.
#[repr(C)]
#[derive(Default, Clone, Copy)]
pub struct Context {
    ra: usize,
    sp: usize,
    s: [usize; 12],
}

extern "C" {
    /// Saves the current callee-saved registers into `old`, then loads them
    /// from `new` and returns into whatever called `swtch` the last time
    /// `new` was the save target. Implemented in hand-written assembly
    /// (`swtch.S`), out of scope for this crate.
    fn swtch(old: *mut Context, new: *mut Context);
}

// Host unit tests link this lib into a standalone test binary, which never
// exercises `sched`/`yield_` (see `mod tests` below) but still needs the
// `swtch` symbol to resolve; the real definition lives in `swtch.S`,
// assembled only as part of the full kernel image.
#[cfg(test)]
#[no_mangle]
extern "C" fn swtch(_old: *mut Context, _new: *mut Context) {
    unreachable!("swtch is not exercised by host unit tests")
}

/// Per-hart state. Indexed by `cpuid()`, i.e. the hart's `tp` register.
pub struct Cpu {
    /// The process running on this hart, if any.
    proc: *mut Proc,

    /// `scheduler()`'s own context, switched to when a process yields or sleeps.
    context: Context,

    /// Depth of nested `push_off` calls.
    pub noff: i32,

    /// Whether interrupts were enabled before the outermost `push_off`.
    pub interrupt_enabled: bool,
}

impl Cpu {
    const fn new() -> Self {
        Self {
            proc: ptr::null_mut(),
            context: Context {
                ra: 0,
                sp: 0,
                s: [0; 12],
            },
            noff: 0,
            interrupt_enabled: false,
        }
    }
}

static mut CPUS: [Cpu; NCPU] = array![_ => Cpu::new(); NCPU];

/// Which hart is this? Caller must have interrupts disabled: `tp` is only
/// stable across a hart that cannot be preempted mid-read.
///
/// # Safety
///
/// Interrupts must already be disabled on the calling hart.
pub unsafe fn cpuid() -> usize {
    unsafe { crate::riscv::r_tp() }
}

/// Returns this hart's `Cpu`.
///
/// # Safety
///
/// Interrupts must already be disabled on the calling hart (see [`cpuid`]).
pub fn mycpu() -> *mut Cpu {
    // SAFETY: callers of `mycpu` are always already inside a region with
    // interrupts disabled (either via `push_off`, or because they are
    // themselves implementing `push_off`/`pop_off`).
    let id = unsafe { cpuid() };
    unsafe { ptr::addr_of_mut!(CPUS[id]) }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Procstate {
    Unused,
    Used,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

pub type Pid = i32;

/// Fields of `Proc` guarded by `Proc::info`'s spinlock.
pub struct ProcInfo {
    pub state: Procstate,

    /// Non-null iff `state == Sleeping`: the channel this process is parked on.
    waitchannel: *const WaitChannel,

    pub xstate: i32,
    pub pid: Pid,
}

/// Fields private to the owning process; no lock is needed to access them
/// from the process's own thread of control (e.g. inside a syscall or
/// during `exec`).
pub struct ProcData {
    pub pagetable: Option<PageTable>,
    pub sz: usize,
    trapframe: *mut Trapframe,
}

pub struct Proc {
    pub info: Spinlock<ProcInfo>,
    data: core::cell::UnsafeCell<ProcData>,
    context: core::cell::UnsafeCell<Context>,
    killed: AtomicBool,
    pub name: [u8; MAXPROCNAME],
}

// SAFETY: `data` and `context` are only touched by the process's own kernel
// thread (for `data`) or while `info`'s spinlock is held and the process is
// not `Running` (for `context`), matching xv6's original synchronization
// discipline.
unsafe impl Sync for Proc {}

impl Proc {
    const fn new() -> Self {
        Self {
            info: Spinlock::new_named(
                "proc",
                ProcInfo {
                    state: Procstate::Unused,
                    waitchannel: ptr::null(),
                    xstate: 0,
                    pid: 0,
                },
            ),
            data: core::cell::UnsafeCell::new(ProcData {
                pagetable: None,
                sz: 0,
                trapframe: ptr::null_mut(),
            }),
            context: core::cell::UnsafeCell::new(Context {
                ra: 0,
                sp: 0,
                s: [0; 12],
            }),
            killed: AtomicBool::new(false),
            name: [0; MAXPROCNAME],
        }
    }

    /// Raw pointer to this process's trapframe, as installed by the
    /// (external) process-creation code.
    pub fn trapframe(&self) -> *mut Trapframe {
        // SAFETY: reading the pointer value itself races with nothing; only
        // dereferencing it would need the usual "not concurrently running"
        // discipline.
        unsafe { (*self.data.get()).trapframe }
    }

    /// # Safety
    ///
    /// Only the process's own kernel thread may call this.
    pub unsafe fn data_mut(&self) -> &mut ProcData {
        unsafe { &mut *self.data.get() }
    }
}

static mut PROCS: [Proc; NPROC] = array![_ => Proc::new(); NPROC];

/// Returns the process running on this hart, if any.
pub fn myproc() -> Option<&'static Proc> {
    // SAFETY: `push_off`/`pop_off` around the read of `mycpu()` keep this
    // hart from migrating mid-read; `proc` itself is only ever written by
    // this hart's own scheduler loop.
    unsafe {
        crate::lock::spinlock::push_off();
        let p = (*mycpu()).proc;
        crate::lock::spinlock::pop_off();
        p.as_ref()
    }
}

pub fn killed(p: &Proc) -> bool {
    p.killed.load(Ordering::Relaxed)
}

pub fn set_killed(p: &Proc) {
    p.killed.store(true, Ordering::Relaxed);
}

/// Gives up the CPU for one scheduling round. Must be called with no
/// spinlocks held.
pub fn yield_() {
    let p = myproc().expect("yield_: no current process");
    let mut info = p.info.lock();
    info.state = Procstate::Runnable;
    // SAFETY: `info` is held, the process is no longer `Running`, and this
    // hart's `push_off` count is exactly 1 (the one behind `info`'s lock).
    unsafe { sched(p, &mut info) };
}

/// Switches from the current process back into this hart's scheduler loop.
/// Returns once the scheduler runs this process again.
///
/// # Safety
///
/// `info` must be `p`'s own locked `ProcInfo`, `info.state` must already be
/// something other than `Running`, and no other spinlock may be held.
unsafe fn sched(p: &Proc, info: &mut Guard<'_, RawSpinlock, ProcInfo>) {
    assert!(p.info.raw().holding(), "sched: proc lock not held");
    assert_ne!(info.state, Procstate::Running, "sched: still running");
    assert!(unsafe { !intr_get() }, "sched: interruptible");

    let c = mycpu();
    assert_eq!(unsafe { (*c).noff }, 1, "sched: other locks held");
    let interrupt_enabled = unsafe { (*c).interrupt_enabled };

    unsafe { swtch(p.context.get(), ptr::addr_of_mut!((*c).context)) };

    unsafe { (*c).interrupt_enabled = interrupt_enabled };
}

/// Runs `p` on this hart until it yields, sleeps, or is preempted.
/// Called only from the scheduler loop.
///
/// # Safety
///
/// Caller must hold `p.info` locked with `state == Runnable`, and must be
/// the scheduler's own context (i.e. about to call `swtch` into `p`).
pub unsafe fn run(p: &'static Proc, info: &mut Guard<'_, RawSpinlock, ProcInfo>) {
    let c = mycpu();
    unsafe { (*c).proc = p as *const Proc as *mut Proc };
    info.state = Procstate::Running;
    unsafe { swtch(ptr::addr_of_mut!((*c).context), p.context.get()) };
    unsafe { (*c).proc = ptr::null_mut() };
}

/// A condition-variable-like rendezvous point. Per the design notes, a
/// `WaitChannel` is deliberately non-zero-sized so two distinct channels
/// never alias the same address and spuriously wake each other's waiters.
pub struct WaitChannel {
    _non_zero_sized: u8,
}

impl WaitChannel {
    pub const fn new() -> Self {
        Self { _non_zero_sized: 0 }
    }

    /// Atomically releases `guard`'s lock, parks the current process on
    /// this channel, and reacquires the lock once woken. Spurious wakes are
    /// allowed; callers must loop on their predicate.
    pub fn sleep<R: RawLock, T>(&self, guard: &mut Guard<'_, R, T>) {
        let p = myproc().expect("sleep: no current process");

        // Must hold p.info before releasing `guard`, or a wakeup() between
        // the release and the state change below would be missed.
        let mut info = p.info.lock();
        guard.reacquire_after(|| {
            info.waitchannel = self as *const WaitChannel;
            info.state = Procstate::Sleeping;
            // SAFETY: `info` is held and `state` is no longer `Running`;
            // `push_off` from acquiring `info` brought this hart's nesting
            // to exactly 1.
            unsafe { sched(p, &mut info) };
            info.waitchannel = ptr::null();
            drop(info);
        });
    }

    /// Wakes every process sleeping on this channel. Must be called without
    /// holding any process's `info` lock.
    pub fn wakeup(&self) {
        for p in unsafe { PROCS.iter() } {
            let mut info = p.info.lock();
            if info.state == Procstate::Sleeping && info.waitchannel == self as *const WaitChannel
            {
                info.state = Procstate::Runnable;
            }
        }
    }
}

/// Test-only helpers for exercising code that needs a live `&'static Proc`
/// (exec's trapframe commit, in particular) without a real scheduler.
#[cfg(test)]
pub mod test_support {
    use super::*;

    /// Hands back `PROCS[0]` with a freshly leaked trapframe installed.
    /// Only safe to call from a single test at a time within a process,
    /// which host unit tests already assume for any other shared static.
    pub fn fresh_proc_for_exec_test() -> &'static Proc {
        let p = unsafe { &PROCS[0] };
        let tf = Box::leak(Box::new(crate::trap::Trapframe::default()));
        unsafe { p.data_mut().trapframe = tf as *mut _ };
        p
    }

    /// Binds this hart's `Cpu::proc` to `PROCS[0]`, the same assignment
    /// `run()` makes before switching into a process. Tests that exercise a
    /// sleep-lock need this: its holder is a pid, and a pid only exists by
    /// way of a current process. Idempotent.
    pub fn bind_current_proc_for_test() {
        let p = unsafe { &PROCS[0] };
        unsafe { (*mycpu()).proc = p as *const Proc as *mut Proc };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_channel_is_non_zero_sized() {
        assert!(core::mem::size_of::<WaitChannel>() > 0);
    }

    #[test]
    fn distinct_wait_channels_have_distinct_addresses() {
        let a = WaitChannel::new();
        let b = WaitChannel::new();
        assert_ne!(&a as *const _, &b as *const _);
    }
}
