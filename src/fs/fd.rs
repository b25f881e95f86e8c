//! Descriptor tables.
//!
//! Two levels: a global open-file table (one slot per opened file, reference
//! counted) and a per-process table mapping small descriptors to global
//! slots. Slots 0, 1, 2 are stdin/stdout/stderr and are inherited across
//! spawn.

use super::dir::{DirEntry, Perm};

pub const MAX_OPEN_FILES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Append,
}

impl OpenMode {
    pub fn writes(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::Append)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// What a global open-file slot points at.
#[derive(Debug, Clone)]
pub enum EntryRef {
    /// Slot index in the root directory.
    Root(usize),
    /// Synthetic entry backing one of the standard descriptors.
    Std(DirEntry),
}

/// One slot of the global open-file table.
#[derive(Debug, Clone)]
pub struct OpenFile {
    pub entry: EntryRef,
    pub current_block: u16,
    pub offset: u32,
    pub mode: OpenMode,
    pub ref_count: u32,
}

/// One slot of a per-process descriptor table.
#[derive(Debug, Clone, Copy)]
pub struct ProcFd {
    pub global_fd: usize,
    pub mode: OpenMode,
    pub offset: u32,
}

pub type FdTable = [Option<ProcFd>; MAX_OPEN_FILES];

/// A fresh table holding only the standard descriptors.
pub fn std_fd_table() -> FdTable {
    let mut table: FdTable = [None; MAX_OPEN_FILES];
    table[0] = Some(ProcFd {
        global_fd: 0,
        mode: OpenMode::Read,
        offset: 0,
    });
    table[1] = Some(ProcFd {
        global_fd: 1,
        mode: OpenMode::Write,
        offset: 0,
    });
    table[2] = Some(ProcFd {
        global_fd: 2,
        mode: OpenMode::Write,
        offset: 0,
    });
    table
}

/// Synthetic directory entry for a standard descriptor.
pub fn std_entry(name: &str, perm: Perm) -> DirEntry {
    let mut entry = DirEntry::zeroed();
    entry.set_name(name);
    entry.perm = perm;
    entry.first_block = super::fat::FAT_LAST;
    entry
}
