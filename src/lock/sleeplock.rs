//! Sleep locks: long-term mutual exclusion safe to hold across a call to
//! [`WaitChannel::sleep`](crate::proc::WaitChannel::sleep), unlike a
//! [`Spinlock`](super::spinlock::Spinlock). The buffer cache uses one per
//! buffer to guard payload I/O, which can block on the disk for a long time.

use super::spinlock::RawSpinlock;
use super::{Guard, Lock, RawLock};
use crate::proc::{myproc, Pid, WaitChannel};

#[derive(PartialEq, Eq)]
enum Holder {
    Unlocked,
    Held(Pid),
}

struct State {
    holder: Holder,
}

/// Long-term lock for processes. Acquiring blocks by sleeping (yielding the
/// hart) rather than spinning, so it must never be taken while a spinlock is
/// held.
pub struct RawSleeplock {
    name: &'static str,
    state: Lock<RawSpinlock, State>,
    channel: WaitChannel,
}

pub type Sleeplock<T> = Lock<RawSleeplock, T>;
pub type SleeplockGuard<'s, T> = Guard<'s, RawSleeplock, T>;

impl RawSleeplock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Lock::new(
                RawSpinlock::new("sleeplock"),
                State {
                    holder: Holder::Unlocked,
                },
            ),
            channel: WaitChannel::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl RawLock for RawSleeplock {
    fn acquire(&self) {
        let pid = current_pid();
        let mut guard = self.state.lock();
        while guard.holder != Holder::Unlocked {
            self.channel.sleep(&mut guard);
        }
        guard.holder = Holder::Held(pid);
    }

    fn release(&self) {
        let mut guard = self.state.lock();
        assert!(
            guard.holder != Holder::Unlocked,
            "release: {} not held",
            self.name
        );
        guard.holder = Holder::Unlocked;
        self.channel.wakeup();
    }

    fn holding(&self) -> bool {
        self.state.lock().holder == Holder::Held(current_pid())
    }
}

/// The current process's pid. Every call site runs on behalf of some
/// process — a sleep-lock acquired/queried with no current process is a
/// programmer error, not a state this lock needs to represent.
fn current_pid() -> Pid {
    myproc().expect("sleeplock: no current process").info.lock().pid
}

impl<T> Sleeplock<T> {
    pub const fn new_named(name: &'static str, data: T) -> Self {
        Lock::new(RawSleeplock::new(name), data)
    }
}
