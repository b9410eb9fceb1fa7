//! Binary entry point. `start.rs`'s `start()` is the real hardware entry
//! (linked in by `entry.S`, external to this crate); this binary only wires
//! the supervisor-mode `main` that `start()` jumps to via `mret`.
#![no_std]
#![no_main]

use kernel::riscv::intr_on;
use kernel::uart::MemMappedUart;

/// Real UART and disk backends belong to driver code external to this
/// crate (see the crate's top-level docs); wiring them in and handing the
/// result to `kernel::init` is this binary's entire job.
static UART: MemMappedUart = unsafe { MemMappedUart::new() };

#[no_mangle]
pub unsafe extern "C" fn main() -> ! {
    unsafe { intr_on() };

    // The on-disk log's `BlockDevice` is provided by a virtio driver out of
    // this crate's scope; until one is linked in, boot stops short of
    // `kernel::init` rather than dereferencing a device that isn't there.
    loop {
        core::hint::spin_loop();
    }
}
