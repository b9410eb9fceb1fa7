//! The freestanding panic handler.
//!
//! Gated off in two independent situations that both link a panic runtime
//! of their own: host unit tests (`cfg(test)`, where `std`'s handler
//! applies), and an in-kernel QEMU integration harness built with the
//! `test` Cargo feature, which still wants a `no_std` binary but supplies
//! its own handler.

use core::sync::atomic::Ordering;

#[cfg(not(any(test, feature = "test")))]
#[panic_handler]
fn panic_handler(info: &core::panic::PanicInfo<'_>) -> ! {
    crate::printf::PANICKED.store(true, Ordering::Release);
    crate::println!("{}", info);
    loop {
        core::hint::spin_loop();
    }
}
