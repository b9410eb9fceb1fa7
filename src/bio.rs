//! Buffer cache: an LRU-ordered cache of disk blocks, used both directly by
//! callers that need a block's current contents and by the log (§`log`) to
//! hold dirty blocks pinned between `log_write` and commit.
//!
//! Caching disk blocks in memory cuts down on disk traffic and gives
//! multiple processes touching the same block a single point of
//! synchronization. Only one process may hold a given buffer's payload
//! lock at a time, so callers should `release` as soon as they're done.

use core::ops::{Deref, DerefMut};

use array_macro::array;

use crate::disk::BlockDevice;
use crate::lock::sleeplock::SleeplockGuard;
use crate::lock::{Sleeplock, Spinlock};
use crate::param::{BSIZE, NBUF};

/// No buffer at this slot has a real identity yet, or this is the list
/// sentinel's own "index" when read as a pointer.
const NONE: usize = usize::MAX;

/// Metadata for one cache slot: identity, reference count, and this slot's
/// place in the LRU list. Guarded by the pool spinlock ([`BCACHE`]).
struct BufMeta {
    dev: u32,
    blockno: u32,
    refcnt: u32,
    valid: bool,
    prev: usize,
    next: usize,
}

impl BufMeta {
    const fn new() -> Self {
        Self {
            dev: 0,
            blockno: 0,
            refcnt: 0,
            valid: false,
            prev: NONE,
            next: NONE,
        }
    }
}

/// A block's cached payload. `#[repr(align(4))]` so callers may reinterpret
/// it as an array of `u32`s (the log header does exactly this).
#[repr(align(4))]
pub struct BufData {
    inner: [u8; BSIZE],
}

impl Deref for BufData {
    type Target = [u8; BSIZE];
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for BufData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// The pool's identity/refcnt/LRU-list state. `head`/`tail` name the
/// most-/least-recently-released slots; `prev`/`next` chase toward the
/// tail/head respectively. `NONE` terminates the list in both directions.
struct BcacheIndex {
    meta: [BufMeta; NBUF],
    head: usize,
    tail: usize,
}

impl BcacheIndex {
    const fn new() -> Self {
        Self {
            meta: array![_ => BufMeta::new(); NBUF],
            head: NONE,
            tail: NONE,
        }
    }

    fn unlink(&mut self, i: usize) {
        let (prev, next) = (self.meta[i].prev, self.meta[i].next);
        if prev != NONE {
            self.meta[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NONE {
            self.meta[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.meta[i].prev = NONE;
        self.meta[i].next = NONE;
    }

    /// Moves slot `i` to the MRU end (the head).
    fn push_front(&mut self, i: usize) {
        self.meta[i].prev = NONE;
        self.meta[i].next = self.head;
        if self.head != NONE {
            self.meta[self.head].prev = i;
        }
        self.head = i;
        if self.tail == NONE {
            self.tail = i;
        }
    }

    /// Scans MRU toward LRU for a `(dev, blockno)` match, whether or not the
    /// slot currently has any live holder — an idle-but-valid slot (P1)
    /// still owns that identity until it's recycled by [`find_victim`].
    fn find(&self, dev: u32, blockno: u32) -> Option<usize> {
        let mut i = self.head;
        while i != NONE {
            let m = &self.meta[i];
            if m.dev == dev && m.blockno == blockno {
                return Some(i);
            }
            i = m.next;
        }
        None
    }

    /// Scans LRU toward MRU for the first slot with `refcnt == 0`.
    fn find_victim(&self) -> Option<usize> {
        let mut i = self.tail;
        while i != NONE {
            if self.meta[i].refcnt == 0 {
                return Some(i);
            }
            i = self.meta[i].prev;
        }
        None
    }
}

static BCACHE: Spinlock<BcacheIndex> = Spinlock::new_named("bcache", BcacheIndex::new());
static BUF_DATA: [Sleeplock<BufData>; NBUF] =
    array![_ => Sleeplock::new_named("buffer", BufData { inner: [0; BSIZE] }); NBUF];

/// Wires every slot into the initial LRU list and must run before any
/// `get`/`read` call.
///
/// # Safety
///
/// Must be called exactly once, before any other thread touches the cache.
pub unsafe fn init() {
    let mut bc = BCACHE.lock();
    for i in 0..NBUF {
        bc.push_front(i);
    }
}

/// A cached block, locked for exclusive access to its payload.
pub struct Buf {
    index: usize,
    dev: u32,
    blockno: u32,
    guard: Option<SleeplockGuard<'static, BufData>>,
}

impl Buf {
    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    fn guard(&self) -> &SleeplockGuard<'static, BufData> {
        self.guard.as_ref().expect("Buf: guard already released")
    }

    fn guard_mut(&mut self) -> &mut SleeplockGuard<'static, BufData> {
        self.guard.as_mut().expect("Buf: guard already released")
    }

    /// Writes this buffer's payload to `dev` synchronously, outside any
    /// lock but the payload's own sleep-lock (already held by this handle).
    pub fn write(&mut self, dev: &(impl BlockDevice + ?Sized)) {
        dev.write_block(self.dev, self.blockno, &self.guard());
    }

    /// Releases the payload lock, then drops the pool refcount; if that
    /// reaches zero, moves the slot back to the MRU head.
    pub fn release(mut self) {
        self.guard.take();
        let mut bc = BCACHE.lock();
        let m = &mut bc.meta[self.index];
        m.refcnt -= 1;
        if m.refcnt == 0 {
            bc.unlink(self.index);
            bc.push_front(self.index);
        }
    }

    /// Bumps the pool refcount without touching the payload lock, keeping
    /// this block resident past an ordinary `release`. Used by the log to
    /// hold dirty buffers across a transaction boundary.
    pub fn pin(&self) {
        BCACHE.lock().meta[self.index].refcnt += 1;
    }

    /// Undoes a [`Buf::pin`].
    pub fn unpin(&self) {
        BCACHE.lock().meta[self.index].refcnt -= 1;
    }
}

impl Deref for Buf {
    type Target = BufData;
    fn deref(&self) -> &Self::Target {
        self.guard()
    }
}

impl DerefMut for Buf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard_mut()
    }
}

impl Drop for Buf {
    fn drop(&mut self) {
        if self.guard.take().is_some() {
            let mut bc = BCACHE.lock();
            let m = &mut bc.meta[self.index];
            m.refcnt -= 1;
            if m.refcnt == 0 {
                bc.unlink(self.index);
                bc.push_front(self.index);
            }
        }
    }
}

/// Finds or allocates the cache slot for `(dev, blockno)` and locks its
/// payload. Panics if every slot is pinned (refcnt > 0) — a capacity
/// assertion, not a recoverable condition.
fn get(dev: u32, blockno: u32) -> Buf {
    let index = {
        let mut bc = BCACHE.lock();
        if let Some(i) = bc.find(dev, blockno) {
            bc.meta[i].refcnt += 1;
            i
        } else {
            let i = bc.find_victim().expect("bio: no buffers");
            let m = &mut bc.meta[i];
            m.dev = dev;
            m.blockno = blockno;
            m.valid = false;
            m.refcnt = 1;
            i
        }
    };
    let guard = BUF_DATA[index].lock();
    Buf {
        index,
        dev,
        blockno,
        guard: Some(guard),
    }
}

/// Returns a buffer whose payload matches the current on-disk contents of
/// `(dev, blockno)`, reading from `disk` only if the slot wasn't already
/// valid.
pub fn read(dev: u32, blockno: u32, disk: &(impl BlockDevice + ?Sized)) -> Buf {
    let mut buf = get(dev, blockno);
    let valid = BCACHE.lock().meta[buf.index].valid;
    if !valid {
        disk.read_block(dev, blockno, &mut buf.guard_mut().inner);
        BCACHE.lock().meta[buf.index].valid = true;
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::mock::MemDisk;

    fn setup() {
        // SAFETY: host tests are single-threaded and each test rebuilds its
        // own disk, but the cache itself is a process-wide static; reinit
        // is idempotent (it only relinks an already-valid slot set).
        unsafe { init() };
        crate::proc::test_support::bind_current_proc_for_test();
    }

    #[test]
    fn read_caches_identity_and_reuses_slot_on_second_read() {
        setup();
        let disk = MemDisk::new();
        disk.write_block(7, 3, &[9u8; BSIZE]);

        let a = read(7, 3, &disk);
        assert_eq!(a.blockno(), 3);
        assert_eq!(a[0], 9);
        let index = a.index;
        a.release();

        let b = read(7, 3, &disk);
        assert_eq!(b.index, index, "re-reading the same block should hit cache");
        b.release();
    }

    #[test]
    fn release_only_relinks_when_refcnt_reaches_zero() {
        setup();
        let disk = MemDisk::new();
        let a1 = read(1, 1, &disk);
        let index = a1.index;
        a1.pin();
        a1.release();

        // refcnt is now 1 (pinned), so a second call for the same block
        // must still find it rather than recycling a fresh slot.
        let a2 = read(1, 1, &disk);
        assert_eq!(a2.index, index);
        a2.unpin();
        a2.release();
    }

    #[test]
    fn write_then_read_round_trips_through_the_mock_disk() {
        setup();
        let disk = MemDisk::new();
        {
            let mut buf = read(2, 5, &disk);
            buf[0] = 0x42;
            buf.write(&disk);
            buf.release();
        }
        assert_eq!(disk.contents(2, 5)[0], 0x42);
    }
}
