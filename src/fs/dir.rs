//! Root directory entries.
//!
//! The root directory is a chain of blocks starting at FAT entry 1, holding
//! fixed 64-byte entries. The first byte of the name doubles as a marker:
//! 0 terminates the live portion of the directory, 1 marks a deleted entry,
//! 2 marks an entry that was unlinked while still open somewhere.

use bitflags::bitflags;

pub const MAX_FILENAME_LEN: usize = 32;
pub const DIR_ENTRY_SIZE: usize = 64;

// Name byte 0 markers
pub const DIR_ENTRY_END: u8 = 0;
pub const DIR_ENTRY_DELETED: u8 = 1;
pub const DIR_ENTRY_IN_USE: u8 = 2;

// File types
pub const FT_REGULAR: u8 = 1;
pub const FT_DIRECTORY: u8 = 2;

bitflags! {
    /// Permission bits of a directory entry (a value in 0..=7).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Perm: u8 {
        const EXEC = 1;
        const WRITE = 2;
        const READ = 4;
    }
}

/// One 64-byte directory entry.
///
/// On-disk layout: name (32, NUL-terminated), size (u32 LE), first_block
/// (u16 LE), type (u8), perm (u8), mtime (i64 LE seconds), 16 reserved bytes.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: [u8; MAX_FILENAME_LEN],
    pub size: u32,
    pub first_block: u16,
    pub file_type: u8,
    pub perm: Perm,
    pub mtime: i64,
}

impl DirEntry {
    pub fn zeroed() -> DirEntry {
        DirEntry {
            name: [0; MAX_FILENAME_LEN],
            size: 0,
            first_block: 0,
            file_type: 0,
            perm: Perm::empty(),
            mtime: 0,
        }
    }

    pub fn from_bytes(data: &[u8]) -> DirEntry {
        let mut name = [0u8; MAX_FILENAME_LEN];
        name.copy_from_slice(&data[0..MAX_FILENAME_LEN]);
        DirEntry {
            name,
            size: u32::from_le_bytes([data[32], data[33], data[34], data[35]]),
            first_block: u16::from_le_bytes([data[36], data[37]]),
            file_type: data[38],
            perm: Perm::from_bits_truncate(data[39]),
            mtime: i64::from_le_bytes([
                data[40], data[41], data[42], data[43], data[44], data[45], data[46], data[47],
            ]),
        }
    }

    pub fn to_bytes(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut buf = [0u8; DIR_ENTRY_SIZE];
        buf[0..MAX_FILENAME_LEN].copy_from_slice(&self.name);
        buf[32..36].copy_from_slice(&self.size.to_le_bytes());
        buf[36..38].copy_from_slice(&self.first_block.to_le_bytes());
        buf[38] = self.file_type;
        buf[39] = self.perm.bits();
        buf[40..48].copy_from_slice(&self.mtime.to_le_bytes());
        buf
    }

    pub fn marker(&self) -> u8 {
        self.name[0]
    }

    pub fn is_end(&self) -> bool {
        self.name[0] == DIR_ENTRY_END
    }

    /// A slot that a new entry may claim.
    pub fn is_free_slot(&self) -> bool {
        self.name[0] == DIR_ENTRY_END || self.name[0] == DIR_ENTRY_DELETED
    }

    /// Live entries start with a printable character.
    pub fn is_live(&self) -> bool {
        self.name[0] > DIR_ENTRY_IN_USE
    }

    pub fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(MAX_FILENAME_LEN);
        core::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    /// Store a NUL-terminated name, truncating to 31 bytes.
    pub fn set_name(&mut self, name: &str) {
        self.name = [0; MAX_FILENAME_LEN];
        let bytes = name.as_bytes();
        let len = bytes.len().min(MAX_FILENAME_LEN - 1);
        self.name[..len].copy_from_slice(&bytes[..len]);
    }

    pub fn matches(&self, name: &str) -> bool {
        self.name[0] > DIR_ENTRY_DELETED && self.name_str() == name
    }
}

/// In-memory copy of the root directory chain.
pub struct RootDir {
    entries: Vec<DirEntry>,
    blocks: usize,
    entries_per_block: usize,
}

impl RootDir {
    pub fn from_bytes(buf: &[u8], block_size: u32) -> RootDir {
        let entries_per_block = block_size as usize / DIR_ENTRY_SIZE;
        let blocks = buf.len() / block_size as usize;
        let entries = buf
            .chunks_exact(DIR_ENTRY_SIZE)
            .map(DirEntry::from_bytes)
            .collect();
        RootDir {
            entries,
            blocks,
            entries_per_block,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.entries.len() * DIR_ENTRY_SIZE);
        for entry in &self.entries {
            buf.extend_from_slice(&entry.to_bytes());
        }
        buf
    }

    pub fn blocks(&self) -> usize {
        self.blocks
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, idx: usize) -> &DirEntry {
        &self.entries[idx]
    }

    pub fn entry_mut(&mut self, idx: usize) -> &mut DirEntry {
        &mut self.entries[idx]
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.matches(name))
    }

    /// First slot a new entry may claim, scanning up to the end sentinel.
    pub fn free_slot(&self) -> Option<usize> {
        self.entries.iter().position(|e| e.is_free_slot())
    }

    /// Slots holding an entry (live or deferred-deleted).
    pub fn occupied(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.marker() > DIR_ENTRY_DELETED)
            .count()
    }

    /// The directory must always keep one end sentinel ahead of the live
    /// entries; grow one block early.
    pub fn needs_growth(&self) -> bool {
        self.occupied() + 1 >= self.entries.len()
    }

    /// Append one zeroed block worth of slots.
    pub fn grow(&mut self) {
        for _ in 0..self.entries_per_block {
            self.entries.push(DirEntry::zeroed());
        }
        self.blocks += 1;
    }

    /// Live entries up to the end sentinel, with their slot index.
    pub fn live_entries(&self) -> impl Iterator<Item = (usize, &DirEntry)> {
        self.entries
            .iter()
            .enumerate()
            .take_while(|(_, e)| !e.is_end())
            .filter(|(_, e)| e.is_live())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_roundtrip() {
        let mut entry = DirEntry::zeroed();
        entry.set_name("notes.txt");
        entry.size = 1234;
        entry.first_block = 7;
        entry.file_type = FT_REGULAR;
        entry.perm = Perm::READ | Perm::WRITE;
        entry.mtime = 1_700_000_000;

        let decoded = DirEntry::from_bytes(&entry.to_bytes());
        assert_eq!(decoded.name_str(), "notes.txt");
        assert_eq!(decoded.size, 1234);
        assert_eq!(decoded.first_block, 7);
        assert_eq!(decoded.file_type, FT_REGULAR);
        assert_eq!(decoded.perm, Perm::READ | Perm::WRITE);
        assert_eq!(decoded.mtime, 1_700_000_000);
    }

    #[test]
    fn name_truncated_to_31_bytes() {
        let mut entry = DirEntry::zeroed();
        entry.set_name(&"x".repeat(50));
        assert_eq!(entry.name_str().len(), MAX_FILENAME_LEN - 1);
        assert_eq!(entry.name[MAX_FILENAME_LEN - 1], 0);
    }

    #[test]
    fn find_skips_deleted_entries() {
        let block = vec![0u8; 256];
        let mut root = RootDir::from_bytes(&block, 256);
        root.entry_mut(0).set_name("a");
        root.entry_mut(1).set_name("b");
        assert_eq!(root.find("b"), Some(1));
        root.entry_mut(1).name[0] = DIR_ENTRY_DELETED;
        assert_eq!(root.find("b"), None);
        assert_eq!(root.free_slot(), Some(1));
    }

    #[test]
    fn growth_adds_one_block() {
        let block = vec![0u8; 256];
        let mut root = RootDir::from_bytes(&block, 256);
        assert_eq!(root.len(), 4);
        root.grow();
        assert_eq!(root.len(), 8);
        assert_eq!(root.blocks(), 2);
    }
}
