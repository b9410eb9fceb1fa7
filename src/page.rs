//! A physical page-frame handle.
//!
//! Represented as the frame's physical address rather than as an owned
//! `[u8; PGSIZE]` array: a `Page` never lives on the stack or gets copied,
//! it only ever names a frame that the allocator's free list (or a
//! page table, once mapped) is responsible for.

use crate::riscv::PGSIZE;

/// A handle to one free or allocated physical frame. Move-only and
/// `#[must_use]`: forgetting to call [`Page::addr`] and hand the frame to an
/// owner (a page table, or back to the allocator via `Kmem::free`) is a
/// compile-time-visible bug, not a silent leak.
#[must_use]
pub struct Page {
    addr: usize,
}

impl Page {
    /// Wraps a physical address as an owned frame handle.
    ///
    /// # Safety
    ///
    /// `addr` must be page-aligned and must name a frame not currently
    /// owned by anything else (not on the free list, not mapped, not
    /// another live `Page`).
    pub unsafe fn from_usize(addr: usize) -> Self {
        debug_assert_eq!(addr % PGSIZE, 0, "Page::from_usize: unaligned address");
        Self { addr }
    }

    /// Consumes the handle, returning its physical address. The caller
    /// becomes responsible for the frame.
    pub fn into_usize(self) -> usize {
        self.addr
    }

    /// Physical address of this frame, without consuming the handle.
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Mutable pointer to the start of the frame.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.addr as *mut u8
    }

    /// Fills the whole frame with `byte`.
    pub fn fill(&mut self, byte: u8) {
        // SAFETY: `addr` names PGSIZE bytes of memory this handle owns
        // exclusively.
        unsafe { core::ptr::write_bytes(self.as_mut_ptr(), byte, PGSIZE) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_from_usize_into_usize() {
        let mut buf = [0u8; PGSIZE];
        let addr = buf.as_mut_ptr() as usize;
        // Host test buffers are not guaranteed page-aligned; round down to
        // exercise the representation, not the (debug-only) alignment check.
        let addr = addr & !(PGSIZE - 1);
        if addr == 0 {
            return;
        }
        // SAFETY: test-only, no allocator or page table is tracking this
        // address, and we never dereference it.
        let page = unsafe { Page::from_usize(addr) };
        assert_eq!(page.into_usize(), addr);
    }
}
