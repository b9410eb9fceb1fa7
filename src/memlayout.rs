//! Physical memory layout.
//!
//! qemu -machine virt is set up like this, based on qemu's hw/riscv/virt.c:
//!
//! ```text
//! 00001000 -- boot ROM, provided by qemu
//! 02000000 -- CLINT
//! 0C000000 -- PLIC
//! 10000000 -- uart0
//! 10001000 -- virtio disk
//! 80000000 -- boot ROM jumps here in machine mode; kernel loads here
//! unused RAM after 80000000
//! ```
//!
//! The kernel uses physical memory thus: entry point, then kernel text and
//! data, then `end` marks the start of the kernel page allocation area, and
//! `PHYSTOP` marks the end of RAM usable by the kernel.
#![allow(dead_code)]

/// qemu puts UART registers here in physical memory.
pub const UART0: usize = 0x1000_0000;

/// virtio mmio interface.
pub const VIRTIO0: usize = 0x1000_1000;

/// Physical RAM starts here; the kernel image is loaded at this address.
pub const KERNBASE: usize = 0x8000_0000;

/// RAM available to the kernel and user pages runs from `KERNBASE` to `PHYSTOP`.
pub const PHYSTOP: usize = KERNBASE + 128 * 1024 * 1024;
