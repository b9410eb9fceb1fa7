//! A process's user address space.
//!
//! Full SV39 page-table walking (the three-level tree, PTE permission
//! bits, `satp` installation) is outside this crate's scope: what `exec`
//! needs is a *fresh, independently freeable* address space it can build up
//! page by page and then swap in atomically. `PageTable` provides exactly
//! that: a flat, page-indexed mapping from a process's virtual address
//! range `[0, size)` onto physical frames, with an explicit hole for the
//! stack's guard page.

use arrayvec::ArrayVec;

use crate::file::{Executable, ExecError};
use crate::kalloc::KMEM;
use crate::page::Page;
use crate::riscv::{pgroundup, PGSIZE};

/// Upper bound on a process's mapped page count in this teaching kernel
/// (64 MiB of address space). A real SV39 table has no such cap; this one
/// exists only because the flat array below needs a fixed capacity.
const MAX_USER_PAGES: usize = 16384;

pub struct PageTable {
    /// Slot `i` backs virtual address `i * PGSIZE`. `None` is unmapped —
    /// either never allocated, or explicitly cleared (the guard page).
    pages: ArrayVec<Option<Page>, MAX_USER_PAGES>,
}

impl PageTable {
    pub fn new() -> Self {
        Self {
            pages: ArrayVec::new(),
        }
    }

    /// Total mapped size in bytes (page-aligned).
    pub fn size(&self) -> usize {
        self.pages.len() * PGSIZE
    }

    /// Grows the mapped range to `new_size` bytes (rounded up to a page),
    /// zero-filling every newly allocated page. Returns the new, rounded
    /// size.
    pub fn alloc(&mut self, new_size: usize) -> Result<usize, ExecError> {
        let new_size = pgroundup(new_size);
        let new_pages = new_size / PGSIZE;
        if new_pages > MAX_USER_PAGES {
            return Err(ExecError::AddressSpaceTooLarge);
        }
        while self.pages.len() < new_pages {
            let mut page = KMEM.lock().alloc().ok_or(ExecError::OutOfMemory)?;
            page.fill(0);
            self.pages.push(Some(page));
        }
        Ok(new_size)
    }

    /// Unmaps the page at `vaddr`, freeing its frame back to the allocator.
    /// Used to carve out the stack's guard page.
    pub fn clear(&mut self, vaddr: usize) {
        let i = vaddr / PGSIZE;
        if let Some(slot) = self.pages.get_mut(i) {
            if let Some(page) = slot.take() {
                KMEM.lock().free(page);
            }
        }
    }

    fn page_bytes(&mut self, i: usize) -> Result<&mut [u8; PGSIZE], ExecError> {
        self.pages
            .get_mut(i)
            .and_then(|slot| slot.as_mut())
            .map(|page| {
                // SAFETY: `page` owns exactly PGSIZE bytes at its address.
                unsafe { &mut *(page.as_mut_ptr() as *mut [u8; PGSIZE]) }
            })
            .ok_or(ExecError::BadAddress)
    }

    /// Copies `bytes` into the mapped range starting at `vaddr`, splitting
    /// the write across page boundaries as needed.
    pub fn copy_out_bytes(&mut self, vaddr: usize, bytes: &[u8]) -> Result<(), ExecError> {
        let mut remaining = bytes;
        let mut addr = vaddr;
        while !remaining.is_empty() {
            let i = addr / PGSIZE;
            let off = addr % PGSIZE;
            let take = remaining.len().min(PGSIZE - off);
            let page = self.page_bytes(i)?;
            page[off..off + take].copy_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            addr += take;
        }
        Ok(())
    }

    /// Loads `len` bytes from `exe` at file offset `file_off` into the
    /// mapped range starting at `vaddr`, one page at a time.
    pub fn load_executable(
        &mut self,
        vaddr: usize,
        exe: &impl Executable,
        file_off: usize,
        len: usize,
    ) -> Result<(), ExecError> {
        let mut remaining = len;
        let mut addr = vaddr;
        let mut off = file_off;
        while remaining > 0 {
            let i = addr / PGSIZE;
            let page_off = addr % PGSIZE;
            let take = remaining.min(PGSIZE - page_off);
            let page = self.page_bytes(i)?;
            let n = exe.read_at(off, &mut page[page_off..page_off + take])?;
            if n != take {
                return Err(ExecError::BadAddress);
            }
            remaining -= take;
            addr += take;
            off += take;
        }
        Ok(())
    }

    /// Frees every mapped frame. Consumes the table so it cannot be used
    /// afterward.
    pub fn free(mut self) {
        let mut kmem = KMEM.lock();
        for slot in self.pages.drain(..) {
            if let Some(page) = slot {
                kmem.free(page);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::ExecError;

    struct FakeExe(Vec<u8>);

    impl Executable for FakeExe {
        fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, ExecError> {
            let end = (offset + buf.len()).min(self.0.len());
            if offset >= end {
                return Ok(0);
            }
            let n = end - offset;
            buf[..n].copy_from_slice(&self.0[offset..end]);
            Ok(n)
        }
    }

    #[test]
    fn alloc_grows_in_whole_pages_and_zero_fills() {
        let mut pt = PageTable::new();
        let size = pt.alloc(1).unwrap();
        assert_eq!(size, PGSIZE);
        assert_eq!(pt.size(), PGSIZE);
        pt.free();
    }

    #[test]
    fn copy_out_bytes_splits_writes_across_a_page_boundary() {
        let mut pt = PageTable::new();
        pt.alloc(2 * PGSIZE).unwrap();
        let data = [0xABu8; 8];
        let vaddr = PGSIZE - 4;
        pt.copy_out_bytes(vaddr, &data).unwrap();
        assert_eq!(pt.page_bytes(0).unwrap()[PGSIZE - 4..], [0xAB; 4]);
        assert_eq!(pt.page_bytes(1).unwrap()[..4], [0xAB; 4]);
        pt.free();
    }

    #[test]
    fn clear_unmaps_the_guard_page() {
        let mut pt = PageTable::new();
        pt.alloc(2 * PGSIZE).unwrap();
        pt.clear(0);
        assert!(matches!(
            pt.copy_out_bytes(0, &[1]),
            Err(ExecError::BadAddress)
        ));
        pt.free();
    }

    #[test]
    fn load_executable_reads_through_the_executable_trait() {
        let mut pt = PageTable::new();
        pt.alloc(PGSIZE).unwrap();
        let exe = FakeExe(vec![1, 2, 3, 4]);
        pt.load_executable(0, &exe, 0, 4).unwrap();
        assert_eq!(&pt.page_bytes(0).unwrap()[..4], &[1, 2, 3, 4]);
        pt.free();
    }
}
