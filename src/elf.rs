//! On-disk ELF header layout consumed by `exec`. Bit-exact little-endian
//! structs via `zerocopy`, the same technique the log module uses for its
//! header block — no manual field-by-field parsing.

use bitflags::bitflags;
use zerocopy::{AsBytes, FromBytes};

/// `"\x7fELF"` read as a little-endian `u32`.
pub const ELF_MAGIC: u32 = 0x464c457f;

/// `Proghdr::typ` value for a loadable segment.
pub const ELF_PROG_LOAD: u32 = 1;

#[repr(C)]
#[derive(AsBytes, FromBytes, Clone, Copy, Default)]
pub struct ElfHdr {
    pub magic: u32,
    pub elf: [u8; 12],
    pub typ: u16,
    pub machine: u16,
    pub version: u32,
    pub entry: usize,
    pub phoff: usize,
    pub shoff: usize,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

impl ElfHdr {
    pub fn is_valid(&self) -> bool {
        self.magic == ELF_MAGIC
    }
}

bitflags! {
    #[repr(C)]
    pub struct ProgFlags: u32 {
        const EXEC = 1;
        const WRITE = 2;
        const READ = 4;
    }
}

#[repr(C)]
#[derive(AsBytes, FromBytes, Clone, Copy, Default)]
pub struct ProgHdr {
    pub typ: u32,
    pub flags: u32,
    pub off: usize,
    pub vaddr: usize,
    pub paddr: usize,
    pub filesz: usize,
    pub memsz: usize,
    pub align: usize,
}

impl ProgHdr {
    pub fn is_load(&self) -> bool {
        self.typ == ELF_PROG_LOAD
    }

    pub fn flags(&self) -> ProgFlags {
        ProgFlags::from_bits_truncate(self.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::size_of;

    #[test]
    fn header_is_valid_only_with_the_elf_magic() {
        let mut h = ElfHdr::default();
        assert!(!h.is_valid());
        h.magic = ELF_MAGIC;
        assert!(h.is_valid());
    }

    #[test]
    fn prog_hdr_flags_round_trip_through_bits() {
        let mut ph = ProgHdr::default();
        ph.flags = (ProgFlags::EXEC | ProgFlags::READ).bits();
        assert!(ph.flags().contains(ProgFlags::EXEC));
        assert!(ph.flags().contains(ProgFlags::READ));
        assert!(!ph.flags().contains(ProgFlags::WRITE));
    }

    #[test]
    fn header_reads_from_raw_bytes_via_zerocopy() {
        assert!(size_of::<ElfHdr>() > 0);
        let bytes = [0u8; size_of::<ElfHdr>()];
        let h = ElfHdr::read_from(&bytes[..]).unwrap();
        assert_eq!(h.magic, 0);
    }
}
