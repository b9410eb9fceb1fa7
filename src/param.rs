//! Compile-time budget constants shared across the kernel.
#![allow(dead_code)]

/// Maximum number of processes.
pub const NPROC: usize = 64;

/// Maximum number of CPUs (harts).
pub const NCPU: usize = 8;

/// Open files per process.
pub const NOFILE: usize = 16;

/// Device number of the file system root disk.
pub const ROOTDEV: u32 = 1;

/// Max exec arguments.
pub const MAXARG: usize = 32;

/// Block size, in bytes.
pub const BSIZE: usize = 1024;

/// Max number of distinct blocks any single FS syscall may write.
pub const MAXOPBLOCKS: usize = 10;

/// Max data blocks in the on-disk log.
pub const LOGSIZE: usize = MAXOPBLOCKS * 3;

/// Size of the disk block cache, in buffers.
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// Maximum length of a process name (for debugging).
pub const MAXPROCNAME: usize = 16;

/// Bytes held by a pipe's ring buffer.
pub const PIPESIZE: usize = 512;

static_assertions::const_assert!(NBUF > 0);
static_assertions::const_assert!(LOGSIZE >= MAXOPBLOCKS);
