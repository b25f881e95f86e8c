//! Kernel-level file operations on a mounted volume.

use std::os::unix::fs::FileExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use super::dir::{
    DirEntry, Perm, DIR_ENTRY_DELETED, DIR_ENTRY_IN_USE, FT_REGULAR, MAX_FILENAME_LEN,
};
use super::fat::FAT_LAST;
use super::fd::{EntryRef, OpenFile, OpenMode, Whence, MAX_OPEN_FILES};
use super::FatFs;
use crate::errors::{Errno, Result};

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u32,
    pub first_block: u16,
    pub perm: Perm,
    pub mtime: i64,
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl FatFs {
    /// Open `name` with the given mode, returning a global descriptor.
    ///
    /// A file that is already open shares its slot (the refcount goes up);
    /// opening a missing file in WRITE mode creates it; WRITE truncates.
    pub fn open(&mut self, name: &str, mode: OpenMode) -> Result<usize> {
        if let Some(fd) = self.find_open_fd(name, mode)? {
            return Ok(fd);
        }
        let idx = self.find_or_create_entry(name, mode)?;
        self.allocate_fd(idx, mode)
    }

    fn find_open_fd(&mut self, name: &str, mode: OpenMode) -> Result<Option<usize>> {
        for fd in 0..MAX_OPEN_FILES {
            let idx = match &self.open_files[fd] {
                Some(OpenFile {
                    entry: EntryRef::Root(idx),
                    ..
                }) => *idx,
                _ => continue,
            };
            if self.root.entry(idx).name_str() != name {
                continue;
            }
            let perm = self.root.entry(idx).perm;
            if mode.writes() && !perm.contains(Perm::WRITE) {
                return Err(Errno::PermissionDenied);
            }
            if perm.is_empty() {
                return Err(Errno::PermissionDenied);
            }
            self.open_files[fd].as_mut().unwrap().ref_count += 1;
            return Ok(Some(fd));
        }
        Ok(None)
    }

    fn find_or_create_entry(&mut self, name: &str, mode: OpenMode) -> Result<usize> {
        if let Some(idx) = self.root.find(name) {
            return Ok(idx);
        }
        if mode != OpenMode::Write {
            return Err(Errno::FileNotFound);
        }
        if name.len() >= MAX_FILENAME_LEN {
            return Err(Errno::InvalidFilename);
        }
        if self.root.needs_growth() {
            self.grow_root()?;
        }
        let idx = self.root.free_slot().ok_or(Errno::DiskFull)?;
        let first = self.fat.find_free().ok_or(Errno::DiskFull)?;
        self.fat.set(first, FAT_LAST);

        let entry = self.root.entry_mut(idx);
        *entry = DirEntry::zeroed();
        entry.set_name(name);
        entry.first_block = first;
        entry.file_type = FT_REGULAR;
        entry.perm = Perm::READ | Perm::WRITE;
        entry.mtime = now();
        Ok(idx)
    }

    /// Chain one more block onto the root directory and widen the buffer.
    fn grow_root(&mut self) -> Result<()> {
        if self.root.blocks() >= super::MAX_ROOT_DIR_BLOCKS {
            return Err(Errno::DiskFull);
        }
        let new_block = self.fat.find_free().ok_or(Errno::DiskFull)?;
        let tail = self.fat.last_block(1);
        self.fat.set(tail, new_block);
        self.fat.set(new_block, FAT_LAST);
        self.root.grow();
        Ok(())
    }

    fn allocate_fd(&mut self, idx: usize, mode: OpenMode) -> Result<usize> {
        let fd = (0..MAX_OPEN_FILES)
            .find(|&i| self.open_files[i].is_none())
            .ok_or(Errno::TooManyOpenFiles)?;
        let (first_block, size) = {
            let entry = self.root.entry(idx);
            (entry.first_block, entry.size)
        };
        self.open_files[fd] = Some(OpenFile {
            entry: EntryRef::Root(idx),
            current_block: first_block,
            offset: if mode == OpenMode::Append { size } else { 0 },
            mode,
            ref_count: 1,
        });
        if mode == OpenMode::Write {
            // Truncate: release every block after the head.
            let rest = self.fat.get(first_block);
            self.fat.set(first_block, FAT_LAST);
            self.fat.free_chain(rest);
            self.root.entry_mut(idx).size = 0;
        }
        Ok(fd)
    }

    /// Read up to `buf.len()` bytes from the descriptor's current offset,
    /// following the FAT chain across block boundaries. Returns 0 at EOF.
    pub fn read(&mut self, fd: usize, buf: &mut [u8]) -> Result<usize> {
        let entry = self.slot_entry(fd)?;
        if !entry.perm.contains(Perm::READ) {
            return Err(Errno::PermissionDenied);
        }
        let (mut offset, mut current) = {
            let slot = self.slot(fd).unwrap();
            (slot.offset, slot.current_block)
        };
        if entry.size == 0 || current == FAT_LAST {
            return Ok(0);
        }

        let block_size = self.block_size;
        let mut total = 0;
        while total < buf.len() && current != FAT_LAST {
            let offset_in_block = offset % block_size;
            let block_left = (block_size - offset_in_block) as usize;
            let file_left = entry.size.saturating_sub(offset) as usize;
            let want = block_left.min(buf.len() - total).min(file_left);
            if want == 0 {
                break;
            }
            let pos = self.data_start
                + (current as u64 - 1) * block_size as u64
                + offset_in_block as u64;
            self.image.read_exact_at(&mut buf[total..total + want], pos)?;
            total += want;
            offset += want as u32;
            if offset % block_size == 0 {
                current = self.fat.get(current);
            }
        }

        let slot = self.slot_mut(fd).unwrap();
        slot.offset = offset;
        slot.current_block = current;
        Ok(total)
    }

    /// Write `buf` at the descriptor's offset, allocating blocks as the
    /// chain runs out. Global descriptors 1 and 2 delegate to the host.
    pub fn write(&mut self, fd: usize, buf: &[u8]) -> Result<usize> {
        let entry = self.slot_entry(fd)?;
        if !entry.perm.contains(Perm::WRITE) {
            return Err(Errno::PermissionDenied);
        }
        if fd == 1 || fd == 2 {
            use std::io::Write;
            let result = if fd == 1 {
                let mut out = std::io::stdout().lock();
                out.write_all(buf).and_then(|_| out.flush())
            } else {
                std::io::stderr().lock().write_all(buf)
            };
            return result.map(|_| buf.len()).map_err(|_| Errno::IoError);
        }
        let idx = match &self.slot(fd).unwrap().entry {
            EntryRef::Root(idx) => *idx,
            EntryRef::Std(_) => return Err(Errno::InvalidFd),
        };

        let block_size = self.block_size;
        let (mode, mut offset, mut current) = {
            let slot = self.slot(fd).unwrap();
            (slot.mode, slot.offset, slot.current_block)
        };
        if mode == OpenMode::Append {
            // Position at end-of-file, on the block holding the write head.
            let entry = self.root.entry(idx);
            offset = entry.size;
            current = if entry.first_block == FAT_LAST || (offset > 0 && offset % block_size == 0)
            {
                FAT_LAST
            } else {
                self.fat.last_block(entry.first_block)
            };
        }

        let mut written = 0;
        let mut failure = None;

        // The chain may be shorter than the offset demands (append at a
        // block boundary, or a seek to end-of-file): extend it first.
        if current == FAT_LAST {
            match self.extend_chain(idx) {
                Ok(block) => current = block,
                Err(e) => failure = Some(e),
            }
        }

        while failure.is_none() && written < buf.len() {
            let offset_in_block = offset % block_size;
            let space = (block_size - offset_in_block) as usize;
            let chunk = space.min(buf.len() - written);
            let pos = self.data_start
                + (current as u64 - 1) * block_size as u64
                + offset_in_block as u64;
            if let Err(e) = self.image.write_all_at(&buf[written..written + chunk], pos) {
                failure = Some(e.into());
                break;
            }
            written += chunk;
            offset += chunk as u32;
            // Size follows the write head.
            let entry = self.root.entry_mut(idx);
            entry.size = entry.size.max(offset);
            if offset % block_size == 0 {
                // Crossed a block boundary: follow the chain, extending it
                // only when more bytes are pending.
                let next = self.fat.get(current);
                if next != FAT_LAST {
                    current = next;
                } else if written < buf.len() {
                    match self.fat.find_free() {
                        Some(new) => {
                            self.fat.set(current, new);
                            self.fat.set(new, FAT_LAST);
                            current = new;
                        }
                        None => failure = Some(Errno::DiskFull),
                    }
                } else {
                    current = FAT_LAST;
                }
            }
        }

        let slot = self.slot_mut(fd).unwrap();
        slot.offset = offset;
        slot.current_block = current;
        self.root.entry_mut(idx).mtime = now();
        self.sync_root()?;
        self.fat.sync().map_err(|_| Errno::IoError)?;
        match failure {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// Allocate a block at the tail of the entry's chain (or as its head
    /// when the chain is empty) and return it.
    fn extend_chain(&mut self, idx: usize) -> Result<u16> {
        let new = self.fat.find_free().ok_or(Errno::DiskFull)?;
        self.fat.set(new, FAT_LAST);
        let first = self.root.entry(idx).first_block;
        if first == FAT_LAST {
            self.root.entry_mut(idx).first_block = new;
        } else {
            let tail = self.fat.last_block(first);
            self.fat.set(tail, new);
        }
        Ok(new)
    }

    /// Reposition a descriptor. Read-only descriptors are clamped to the
    /// file size; crossing a block boundary re-walks the chain.
    pub fn lseek(&mut self, fd: usize, offset: i64, whence: Whence) -> Result<u32> {
        let entry = self.slot_entry(fd)?;
        let (mode, old_offset, is_std) = {
            let slot = self.slot(fd).unwrap();
            (slot.mode, slot.offset, matches!(slot.entry, EntryRef::Std(_)))
        };
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => old_offset as i64,
            Whence::End => entry.size as i64,
        };
        let target = base + offset;
        if target < 0 || target > u32::MAX as i64 {
            return Err(Errno::InvalidArgument);
        }
        let mut new_offset = target as u32;

        if is_std {
            self.slot_mut(fd).unwrap().offset = new_offset;
            return Ok(new_offset);
        }
        if new_offset > entry.size && !mode.writes() {
            new_offset = entry.size;
        }
        let block_size = self.block_size;
        if new_offset / block_size != old_offset / block_size {
            let mut block = entry.first_block;
            let target_block = new_offset / block_size;
            let mut hops = 0;
            while hops < target_block && block != FAT_LAST {
                block = self.fat.get(block);
                hops += 1;
            }
            self.slot_mut(fd).unwrap().current_block = block;
        }
        self.slot_mut(fd).unwrap().offset = new_offset;
        Ok(new_offset)
    }

    /// Delete a file. Deletion of an open file is deferred: the entry is
    /// marked in-use-deleted and its chain survives until the final close.
    pub fn unlink(&mut self, name: &str) -> Result<()> {
        let idx = self.root.find(name).ok_or(Errno::FileNotFound)?;
        let open = self.open_files.iter().flatten().any(
            |slot| matches!(slot.entry, EntryRef::Root(i) if i == idx),
        );
        if open {
            self.root.entry_mut(idx).name[0] = DIR_ENTRY_IN_USE;
            self.sync_root()?;
            return Ok(());
        }
        self.erase_entry(idx)
    }

    fn erase_entry(&mut self, idx: usize) -> Result<()> {
        let first = self.root.entry(idx).first_block;
        self.fat.free_chain(first);
        let entry = self.root.entry_mut(idx);
        entry.name = [0; MAX_FILENAME_LEN];
        entry.name[0] = DIR_ENTRY_DELETED;
        self.sync_root()?;
        self.fat.sync().map_err(|_| Errno::IoError)?;
        Ok(())
    }

    /// Drop one reference; the last close clears the slot and finishes any
    /// deferred deletion.
    pub fn close(&mut self, fd: usize) -> Result<()> {
        let slot = self.slot_mut(fd).ok_or(Errno::InvalidFd)?;
        slot.ref_count -= 1;
        if slot.ref_count > 0 {
            return Ok(());
        }
        let entry = slot.entry.clone();
        self.open_files[fd] = None;
        if let EntryRef::Root(idx) = entry {
            if self.root.entry(idx).marker() == DIR_ENTRY_IN_USE {
                self.erase_entry(idx)?;
            }
        }
        Ok(())
    }

    pub fn retain(&mut self, fd: usize) {
        if let Some(slot) = self.slot_mut(fd) {
            slot.ref_count += 1;
        }
    }

    pub fn perm(&self, name: &str) -> Result<Perm> {
        let idx = self.root.find(name).ok_or(Errno::FileNotFound)?;
        Ok(self.root.entry(idx).perm)
    }

    /// Add a signed delta to the permission byte, rejecting results outside
    /// 0..=7.
    pub fn chmod(&mut self, name: &str, delta: i32) -> Result<()> {
        let idx = self.root.find(name).ok_or(Errno::FileNotFound)?;
        let new = self.root.entry(idx).perm.bits() as i32 + delta;
        if !(0..=7).contains(&new) {
            return Err(Errno::InvalidMode);
        }
        let entry = self.root.entry_mut(idx);
        entry.perm = Perm::from_bits_truncate(new as u8);
        entry.mtime = now();
        self.sync_root()
    }

    /// Rename `name` to `to`, overwriting a writable destination.
    pub fn rename(&mut self, name: &str, to: &str) -> Result<()> {
        let idx = self.root.find(name).ok_or(Errno::FileNotFound)?;
        if !self.root.entry(idx).perm.contains(Perm::READ) {
            return Err(Errno::PermissionDenied);
        }
        if let Some(dst) = self.root.find(to) {
            if !self.root.entry(dst).perm.contains(Perm::WRITE) {
                return Err(Errno::PermissionDenied);
            }
            self.unlink(to)?;
        }
        let entry = self.root.entry_mut(idx);
        entry.set_name(to);
        entry.mtime = now();
        self.sync_root()
    }

    /// Create `name` if missing, else refresh its mtime.
    pub fn touch(&mut self, name: &str) -> Result<()> {
        if let Some(idx) = self.root.find(name) {
            self.root.entry_mut(idx).mtime = now();
        } else {
            let fd = self.open(name, OpenMode::Write)?;
            self.close(fd)?;
        }
        self.sync_root()
    }

    pub fn file_size(&self, name: &str) -> Result<u32> {
        // Open descriptors see the freshest size.
        for slot in self.open_files.iter().flatten() {
            if let EntryRef::Root(idx) = slot.entry {
                if self.root.entry(idx).name_str() == name {
                    return Ok(self.root.entry(idx).size);
                }
            }
        }
        let idx = self.root.find(name).ok_or(Errno::FileNotFound)?;
        Ok(self.root.entry(idx).size)
    }

    /// Listing of one file, or of every live entry.
    pub fn list(&self, name: Option<&str>) -> Result<Vec<FileInfo>> {
        let info = |entry: &DirEntry| FileInfo {
            name: entry.name_str().to_string(),
            size: entry.size,
            first_block: entry.first_block,
            perm: entry.perm,
            mtime: entry.mtime,
        };
        match name {
            Some(name) => {
                let idx = self.root.find(name).ok_or(Errno::FileNotFound)?;
                Ok(vec![info(self.root.entry(idx))])
            }
            None => Ok(self.root.live_entries().map(|(_, e)| info(e)).collect()),
        }
    }

    pub fn copy_within(&mut self, src: &str, dst: &str) -> Result<()> {
        let src_fd = self.open(src, OpenMode::Read)?;
        let dst_fd = match self.open(dst, OpenMode::Write) {
            Ok(fd) => fd,
            Err(e) => {
                let _ = self.close(src_fd);
                return Err(e);
            }
        };
        let result = self.copy_loop(src_fd, dst_fd);
        let _ = self.close(src_fd);
        let _ = self.close(dst_fd);
        result
    }

    fn copy_loop(&mut self, src_fd: usize, dst_fd: usize) -> Result<()> {
        let mut buf = [0u8; 1024];
        loop {
            let n = self.read(src_fd, &mut buf)?;
            if n == 0 {
                return Ok(());
            }
            self.write(dst_fd, &buf[..n])?;
        }
    }

    pub fn copy_from_host(&mut self, host_src: &Path, dst: &str) -> Result<()> {
        let mut src = std::fs::File::open(host_src).map_err(|_| Errno::FileNotFound)?;
        let dst_fd = self.open(dst, OpenMode::Write)?;
        let result = (|| {
            use std::io::Read;
            let mut buf = [0u8; 1024];
            loop {
                let n = src.read(&mut buf).map_err(|_| Errno::IoError)?;
                if n == 0 {
                    return Ok(());
                }
                self.write(dst_fd, &buf[..n])?;
            }
        })();
        let _ = self.close(dst_fd);
        result
    }

    pub fn copy_to_host(&mut self, src: &str, host_dst: &Path) -> Result<()> {
        let mut dst = std::fs::File::create(host_dst).map_err(|_| Errno::IoError)?;
        let src_fd = self.open(src, OpenMode::Read)?;
        let result = (|| {
            use std::io::Write;
            let mut buf = [0u8; 1024];
            loop {
                let n = self.read(src_fd, &mut buf)?;
                if n == 0 {
                    return Ok(());
                }
                dst.write_all(&buf[..n]).map_err(|_| Errno::IoError)?;
            }
        })();
        let _ = self.close(src_fd);
        result
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fileinfo_carries_entry_fields() {
        let mut entry = DirEntry::zeroed();
        entry.set_name("f");
        entry.size = 9;
        entry.first_block = 3;
        entry.perm = Perm::READ;
        let info = FileInfo {
            name: entry.name_str().to_string(),
            size: entry.size,
            first_block: entry.first_block,
            perm: entry.perm,
            mtime: entry.mtime,
        };
        assert_eq!(info.name, "f");
        assert_eq!(info.size, 9);
        assert_eq!(info.first_block, 3);
    }
}
