//! Exec: replace a process's address space with a freshly loaded program
//! image, atomically.
//!
//! Everything up to the final swap operates on a page table nobody else
//! can observe; a failure at any point before that swap just frees the
//! half-built table and leaves the caller's current image running. Only
//! the swap itself is the commit point.

use itertools::izip;
use zerocopy::FromBytes;

use crate::elf::{ElfHdr, ProgHdr};
use crate::file::{Executable, ExecError};
use crate::param::MAXARG;
use crate::proc::Proc;
use crate::riscv::{pgroundup, PGSIZE};
use crate::trap::Trapframe;
use crate::vm::PageTable;

/// Loads `exe` into a fresh address space, sets up `argv` on its stack, and
/// swaps it in as `proc`'s page table. Returns `argc`, which the caller
/// places in the syscall return register.
///
/// On any error, `proc`'s existing page table is untouched.
pub fn exec(proc: &Proc, exe: &impl Executable, argv: &[&[u8]]) -> Result<usize, ExecError> {
    if argv.len() > MAXARG {
        return Err(ExecError::TooManyArgs);
    }

    let mut header_bytes = [0u8; core::mem::size_of::<ElfHdr>()];
    let n = exe
        .read_at(0, &mut header_bytes)
        .map_err(|_| ExecError::ReadFailed)?;
    if n != header_bytes.len() {
        return Err(ExecError::NotAnExecutable);
    }
    let elf = ElfHdr::read_from(&header_bytes[..]).ok_or(ExecError::NotAnExecutable)?;
    if !elf.is_valid() {
        return Err(ExecError::NotAnExecutable);
    }

    let mut mem = PageTable::new();
    match load_segments(&mut mem, exe, &elf) {
        Ok(()) => {}
        Err(e) => {
            mem.free();
            return Err(e);
        }
    }

    let (sp, argc) = match push_stack(&mut mem, argv) {
        Ok(r) => r,
        Err(e) => {
            mem.free();
            return Err(e);
        }
    };

    // Commit point: swap the page table and hand the old one to the
    // allocator. Everything above this line is reversible (and was
    // reversed, via `mem.free()`, on every error path).
    let tf = proc.trapframe();
    // SAFETY: `tf` is this process's own trapframe, not concurrently
    // accessed (this code runs on the process's own kernel thread inside a
    // syscall).
    unsafe {
        (*tf).epc = elf.entry;
        (*tf).sp = sp;
    }

    // SAFETY: only the owning process's kernel thread touches `data_mut`.
    let data = unsafe { proc.data_mut() };
    let old = core::mem::replace(&mut data.pagetable, Some(mem));
    data.sz = sp;
    if let Some(old) = old {
        old.free();
    }

    Ok(argc)
}

fn load_segments(mem: &mut PageTable, exe: &impl Executable, elf: &ElfHdr) -> Result<(), ExecError> {
    for i in 0..elf.phnum as usize {
        let off = elf.phoff + i * core::mem::size_of::<ProgHdr>();
        let mut ph_bytes = [0u8; core::mem::size_of::<ProgHdr>()];
        let n = exe
            .read_at(off, &mut ph_bytes)
            .map_err(|_| ExecError::ReadFailed)?;
        if n != ph_bytes.len() {
            return Err(ExecError::NotAnExecutable);
        }
        let ph = ProgHdr::read_from(&ph_bytes[..]).ok_or(ExecError::NotAnExecutable)?;
        if !ph.is_load() {
            continue;
        }
        if ph.memsz < ph.filesz || ph.vaddr % PGSIZE != 0 {
            return Err(ExecError::BadAddress);
        }
        let end = ph.vaddr.checked_add(ph.memsz).ok_or(ExecError::BadAddress)?;
        mem.alloc(end)?;
        mem.load_executable(ph.vaddr, exe, ph.off, ph.filesz)?;
    }
    Ok(())
}

/// Allocates the guard page and stack, then pushes `argv`'s strings and
/// pointer array. Returns the final stack pointer and `argc`.
fn push_stack(mem: &mut PageTable, argv: &[&[u8]]) -> Result<(usize, usize), ExecError> {
    let base = pgroundup(mem.size());
    let top = mem.alloc(base + 2 * PGSIZE)?;
    mem.clear(base); // guard page
    let stackbase = base + PGSIZE;

    let mut sp = top;
    let mut ustack = [0usize; MAXARG + 1];
    for (arg, slot) in izip!(argv, &mut ustack) {
        // Argument strings carry their own trailing NUL.
        sp -= arg.len();
        sp &= !0xf;
        if sp < stackbase {
            return Err(ExecError::BadAddress);
        }
        mem.copy_out_bytes(sp, arg)?;
        *slot = sp;
    }
    let argc = argv.len();
    ustack[argc] = 0;

    let argv_bytes = argc_pointer_bytes(&ustack[..argc + 1]);
    sp -= argv_bytes.len();
    sp &= !0xf;
    if sp < stackbase {
        return Err(ExecError::BadAddress);
    }
    mem.copy_out_bytes(sp, &argv_bytes)?;

    Ok((sp, argc))
}

/// Little-endian byte representation of an argv pointer array, to copy
/// into the new stack as a flat byte run.
fn argc_pointer_bytes(ptrs: &[usize]) -> arrayvec::ArrayVec<u8, { (MAXARG + 1) * 8 }> {
    let mut out = arrayvec::ArrayVec::new();
    for p in ptrs {
        out.try_extend_from_slice(&p.to_le_bytes()).expect("argv array too large");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeImage {
        bytes: Vec<u8>,
    }

    impl Executable for FakeImage {
        fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, ExecError> {
            if offset >= self.bytes.len() {
                return Ok(0);
            }
            let end = (offset + buf.len()).min(self.bytes.len());
            let n = end - offset;
            buf[..n].copy_from_slice(&self.bytes[offset..end]);
            Ok(n)
        }
    }

    fn build_minimal_elf(entry: usize, text: &[u8]) -> Vec<u8> {
        let mut elf = ElfHdr::default();
        elf.magic = crate::elf::ELF_MAGIC;
        elf.entry = entry;
        elf.phoff = core::mem::size_of::<ElfHdr>();
        elf.phnum = 1;

        let mut ph = ProgHdr::default();
        ph.typ = crate::elf::ELF_PROG_LOAD;
        ph.vaddr = 0;
        ph.off = elf.phoff + core::mem::size_of::<ProgHdr>();
        ph.filesz = text.len();
        ph.memsz = text.len();

        let mut bytes = zerocopy::AsBytes::as_bytes(&elf).to_vec();
        bytes.extend_from_slice(zerocopy::AsBytes::as_bytes(&ph));
        bytes.extend_from_slice(text);
        bytes
    }

    #[test]
    fn rejects_an_image_with_a_bad_magic_number() {
        let image = FakeImage {
            bytes: vec![0u8; core::mem::size_of::<ElfHdr>()],
        };
        let proc = proc_for_test();
        let sz_before = unsafe { proc.data_mut().sz };
        let had_pagetable_before = unsafe { proc.data_mut().pagetable.is_some() };

        let err = exec(proc, &image, &[]).unwrap_err();
        assert_eq!(err, ExecError::NotAnExecutable);

        // A failure this early (before any page table is even built) must
        // leave the process's existing image completely untouched.
        assert_eq!(unsafe { proc.data_mut().sz }, sz_before);
        assert_eq!(
            unsafe { proc.data_mut().pagetable.is_some() },
            had_pagetable_before
        );
    }

    #[test]
    fn rejects_more_arguments_than_maxarg() {
        let image = FakeImage {
            bytes: build_minimal_elf(0x1000, b"\0"),
        };
        let proc = proc_for_test();
        let many: Vec<&[u8]> = (0..MAXARG + 1).map(|_| b"x\0".as_slice()).collect();
        let err = exec(proc, &image, &many).unwrap_err();
        assert_eq!(err, ExecError::TooManyArgs);
    }

    #[test]
    fn loads_a_minimal_image_and_sets_up_the_trapframe() {
        let image = FakeImage {
            bytes: build_minimal_elf(0x1000, b"\0\0\0\0"),
        };
        let proc = proc_for_test();
        let argc = exec(proc, &image, &[b"prog\0", b"arg\0"]).expect("exec should succeed");
        assert_eq!(argc, 2);
        let tf = proc.trapframe();
        // SAFETY: single-threaded test, no aliasing.
        unsafe {
            assert_eq!((*tf).epc, 0x1000);
            assert!((*tf).sp > 0);
        }
    }

    fn proc_for_test() -> &'static Proc {
        crate::proc::test_support::fresh_proc_for_exec_test()
    }
}
