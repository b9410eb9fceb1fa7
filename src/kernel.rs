//! The kernel singleton: subsystem wiring performed once at boot, and the
//! handshake between hart 0 (which does that wiring) and every other hart
//! (which waits for it to finish before touching shared state).
//!
//! The scheduler loop itself — picking the next runnable process and
//! switching into it — is an external collaborator (see the crate's
//! top-level docs); this module's job ends at `INITED.store`, at which
//! point every hart is free to enter that loop.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::disk::BlockDevice;
use crate::log::Log;
use crate::param::{LOGSIZE, ROOTDEV};
use crate::uart::Uart;
use crate::{bio, kalloc, printf};

/// Block 0 is the boot block; the log occupies the blocks right after it.
const LOG_START: u32 = 1;
const LOG_SIZE: u32 = (LOGSIZE + 1) as u32;

static INITED: AtomicBool = AtomicBool::new(false);
static mut LOG: Option<Log> = None;

/// The filesystem's write-ahead log, wired up by [`init`].
///
/// # Panics
///
/// If called before [`init`] has run on hart 0.
pub fn log() -> &'static Log {
    // SAFETY: written exactly once, by hart 0, strictly before `INITED` is
    // published; every caller reaches this function only after either
    // being hart 0 past that write, or having synchronized on `INITED`.
    unsafe { LOG.as_ref() }.expect("kernel::log: called before kernel::init")
}

/// Runs on every hart right after `start()` drops into supervisor mode.
/// Hart 0 performs the one-time subsystem wiring and publishes `INITED`;
/// every other hart spins on it before proceeding. The `Release`/`Acquire`
/// pair here is the one full fence standing between "boot hart initialized
/// everything" and "secondary harts may read it".
///
/// # Safety
///
/// Must run exactly once per hart, before anything touches `kalloc`,
/// `bio`, or [`log`]; `uart` and `disk` must already be mapped and usable.
pub unsafe fn init(uart: &'static dyn Uart, disk: &'static dyn BlockDevice) {
    if unsafe { crate::proc::cpuid() } == 0 {
        printf::init(uart);
        crate::println!("kernel is booting");
        unsafe { kalloc::init() };
        unsafe { bio::init() };
        let log = Log::new(ROOTDEV, LOG_START, LOG_SIZE, disk);
        unsafe { LOG = Some(log) };
        INITED.store(true, Ordering::Release);
    } else {
        while !INITED.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
    }
}
