//! The external interface `exec` consumes to read a program image. Path
//! resolution and the backing file system are out of scope for this crate;
//! only the read contract is specified here.

/// A readable program image. Implemented by whatever file-system layer
/// resolves a path to bytes; this crate only calls `read_at`.
pub trait Executable {
    /// Reads up to `buf.len()` bytes starting at `offset`, returning the
    /// number actually read (short only at end-of-file).
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, ExecError>;
}

/// Failure modes of [`crate::exec::exec`]. On any of these, the caller's
/// existing address space is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// The image's ELF header failed the magic-number or program-header
    /// sanity checks.
    NotAnExecutable,
    /// More arguments than `MAXARG`.
    TooManyArgs,
    /// A program header named a segment outside a sane address range, or a
    /// write targeted an address with no backing page.
    BadAddress,
    /// The frame allocator ran out of pages while building the new table.
    OutOfMemory,
    /// The image would need more pages than this kernel's address-space cap.
    AddressSpaceTooLarge,
    /// The underlying image could not be read.
    ReadFailed,
}
