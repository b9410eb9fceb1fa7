//! `print!`/`println!`, backed by a single `Spinlock`-protected console
//! sink so concurrent writers on different harts never interleave a line.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::lock::Spinlock;
use crate::uart::Uart;

/// Set once, by whichever code wires up the real console
/// ([`MemMappedUart`](crate::uart::MemMappedUart) outside tests, a
/// [`MockUart`](crate::uart::mock::MockUart) inside them). `print!` before
/// this is set silently drops output rather than panicking — useful for
/// early boot and for unit tests that never call `init`.
static SINK: Spinlock<Option<&'static dyn Uart>> = Spinlock::new_named("console", None);

/// Set by the panic handler so a second panic on another hart doesn't
/// interleave with the first one's report.
pub static PANICKED: AtomicBool = AtomicBool::new(false);

pub fn init(uart: &'static dyn Uart) {
    *SINK.lock() = Some(uart);
}

struct ConsoleWriter;

impl Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(uart) = *SINK.lock() {
            for b in s.bytes() {
                uart.putc(b);
            }
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments<'_>) {
    let _ = ConsoleWriter.write_fmt(args);
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::printf::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uart::mock::MockUart;

    #[test]
    fn println_writes_a_trailing_newline_through_the_sink() {
        let uart = Box::leak(Box::new(MockUart::new()));
        init(uart);
        println!("hello {}", 42);
        assert_eq!(&uart.written.lock().unwrap()[..], b"hello 42\n");
    }

    #[test]
    fn print_before_init_drops_output_instead_of_panicking() {
        // SAFETY-equivalent: resetting a test-only static between tests.
        *SINK.lock() = None;
        print!("nobody hears this");
    }
}
