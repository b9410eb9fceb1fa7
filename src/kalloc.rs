//! Physical page allocator: whole 4 KiB frames for user processes, kernel
//! stacks, page-table pages, and pipe buffers.

use core::mem;
use core::ptr;

use crate::lock::Spinlock;
use crate::memlayout::PHYSTOP;
use crate::page::Page;
use crate::riscv::{pgrounddown, pgroundup, PGSIZE};

/// Poison byte written across a frame handed out by [`Kmem::alloc`], to turn
/// reads of not-yet-initialized memory into visibly wrong values instead of
/// stale previous-owner data.
const ALLOC_POISON: u8 = 0x5a;

/// Poison byte written across a frame taken back by [`Kmem::free`], to turn
/// a write through a dangling handle into a crash against known garbage
/// instead of silent corruption of the next owner's data.
const FREE_POISON: u8 = 0x1a;

extern "C" {
    /// First address past the kernel image, defined by the linker script.
    static mut end: [u8; 0];
}

struct Run {
    next: *mut Run,
}

/// Intrusive free list threaded through the free frames themselves: the
/// first word of each free frame holds the address of the next free frame.
/// This is the allocator's one real `unsafe` primitive; everything above it
/// is safe.
///
/// # Invariants
///
/// The list has no cycle, and every node on it is a page-aligned address of
/// a currently-unowned frame within `[kernel_end, PHYSTOP)`.
pub struct Kmem {
    head: *mut Run,
}

// SAFETY: all access is mediated by the `Spinlock<Kmem>` this type is always
// stored behind.
unsafe impl Send for Kmem {}

impl Kmem {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
        }
    }

    /// Frees every page-aligned frame in `[pa_start, pa_end)`.
    ///
    /// # Safety
    ///
    /// None of the frames in the range may already be owned (on this free
    /// list, mapped, or held by a live `Page`).
    pub unsafe fn init(&mut self, pa_start: usize, pa_end: usize) {
        let pa_start = pgroundup(pa_start);
        let pa_end = pgrounddown(pa_end);
        for pa in num_iter::range_step(pa_start, pa_end, PGSIZE) {
            // SAFETY: caller guarantees the whole range is unowned, and each
            // `pa` is page-aligned by construction.
            self.free(unsafe { Page::from_usize(pa) });
        }
    }

    /// Returns `page`'s frame to the free list.
    pub fn free(&mut self, mut page: Page) {
        let pa = page.addr();
        assert_eq!(pa % PGSIZE, 0, "Kmem::free: unaligned page {:#x}", pa);
        // SAFETY: reading only the address of a static variable.
        let kernel_end = unsafe { end.as_ptr() as usize };
        assert!(
            (kernel_end..PHYSTOP).contains(&pa),
            "Kmem::free: {:#x} outside kernel_end..PHYSTOP",
            pa
        );

        page.fill(FREE_POISON);
        let r = pa as *mut Run;
        // SAFETY: `r` names PGSIZE bytes of memory this call exclusively
        // owns (via `page`), large enough to hold a `Run`; linking it onto
        // `head` cannot create a cycle because `page` was not already on
        // the list (invariant upheld by every caller).
        unsafe { (*r).next = self.head };
        self.head = r;
        mem::forget(page);
    }

    /// Removes and returns the head of the free list, or `None` if empty.
    /// The returned frame is filled with [`ALLOC_POISON`].
    pub fn alloc(&mut self) -> Option<Page> {
        if self.head.is_null() {
            return None;
        }
        // SAFETY: `head` is non-null, so by the list invariant it points at
        // a live, exclusively-owned frame.
        let next = unsafe { (*self.head).next };
        let pa = mem::replace(&mut self.head, next) as usize;
        // SAFETY: `pa` was just unlinked from the free list, so nothing
        // else names this frame.
        let mut page = unsafe { Page::from_usize(pa) };
        page.fill(ALLOC_POISON);
        Some(page)
    }
}

pub static KMEM: Spinlock<Kmem> = Spinlock::new_named("kmem", Kmem::new());

/// Initializes the allocator with every frame between the end of the kernel
/// image and the top of physical memory.
///
/// # Safety
///
/// Must be called exactly once, before any other code touches `KMEM`.
pub unsafe fn init() {
    // SAFETY: reading only the address of a static variable.
    let pa_start = unsafe { end.as_ptr() as usize };
    // SAFETY: caller's contract: called once, before anything else owns
    // frames in this range.
    unsafe { KMEM.lock().init(pa_start, PHYSTOP) };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_kmem_over(pool: &mut [u8]) -> Kmem {
        let mut kmem = Kmem::new();
        let base = pool.as_mut_ptr() as usize;
        let start = pgroundup(base);
        let pool_end = pgrounddown(base + pool.len());
        assert!(pool_end > start, "test pool too small or misaligned");
        for pa in num_iter::range_step(start, pool_end, PGSIZE) {
            // SAFETY: `pool` is exclusively owned by this test and large
            // enough to cover every frame in `[start, end)`.
            kmem.free(unsafe { Page::from_usize(pa) });
        }
        kmem
    }

    #[test]
    fn alloc_returns_none_once_free_list_is_exhausted() {
        let mut pool = vec![0u8; PGSIZE * 4];
        let mut kmem = fresh_kmem_over(&mut pool);
        let mut count = 0;
        while let Some(page) = kmem.alloc() {
            mem::forget(page);
            count += 1;
            assert!(count <= 4, "allocated more frames than were freed");
        }
        assert!(count >= 2, "expected at least two frames in a 4-page pool");
    }

    #[test]
    fn freed_page_is_reused_by_a_later_alloc() {
        let mut pool = vec![0u8; PGSIZE * 4];
        let mut kmem = fresh_kmem_over(&mut pool);
        let page = kmem.alloc().expect("pool should not be empty");
        let addr = page.addr();
        kmem.free(page);
        let reused = kmem.alloc().expect("freed frame should be reusable");
        assert_eq!(reused.addr(), addr);
        mem::forget(reused);
    }

    #[test]
    fn alloc_fills_frame_with_poison() {
        let mut pool = vec![0u8; PGSIZE * 2];
        let mut kmem = fresh_kmem_over(&mut pool);
        let mut page = kmem.alloc().expect("pool should not be empty");
        let slice =
            unsafe { core::slice::from_raw_parts(page.as_mut_ptr(), PGSIZE) };
        assert!(slice.iter().all(|&b| b == ALLOC_POISON));
        mem::forget(page);
    }
}
