//! The PennFAT filesystem.
//!
//! A single image file holds the FAT region (memory-mapped while mounted)
//! followed by fixed-size data blocks numbered from 1. Block 1 carries the
//! head of the root directory chain. At most one filesystem is mounted at a
//! time; `with` routes kernel-level file operations to it.

pub mod dir;
pub mod fat;
pub mod fd;
pub mod ops;

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;

use lazy_static::lazy_static;
use log::info;
use spin::Mutex;

use crate::errors::{Errno, Result};
use dir::{DirEntry, Perm, RootDir, DIR_ENTRY_SIZE};
use fat::{FatMapping, BLOCK_SIZES, FAT_LAST, FAT_MAX_BLOCKS};
use fd::{EntryRef, OpenFile, OpenMode, MAX_OPEN_FILES};

/// Upper bound on root directory growth, in blocks.
pub const MAX_ROOT_DIR_BLOCKS: usize = 64;

pub struct FatFs {
    image: File,
    fat: FatMapping,
    fat_blocks: u16,
    block_size: u32,
    data_start: u64,
    root: RootDir,
    open_files: [Option<OpenFile>; MAX_OPEN_FILES],
}

impl FatFs {
    /// Format a new image: FAT region, root directory block, zero padding up
    /// to the exact total size.
    pub fn mkfs(path: &Path, blocks_in_fat: u16, block_size_config: u8) -> Result<()> {
        if blocks_in_fat == 0 || blocks_in_fat > FAT_MAX_BLOCKS {
            return Err(Errno::InvalidFatConfig);
        }
        if block_size_config as usize >= BLOCK_SIZES.len() {
            return Err(Errno::InvalidFatConfig);
        }
        let block_size = BLOCK_SIZES[block_size_config as usize];
        let fat_entries = blocks_in_fat as u32 * block_size / 2;
        let data_blocks = fat_entries - 1;
        let mut total = (blocks_in_fat as u64 + data_blocks as u64) * block_size as u64;
        // The maximum configuration sheds one block to stay under 64 MiB.
        if blocks_in_fat == 32 && block_size_config == 4 {
            total -= 4096;
        }

        let mut image = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut fat_bytes = vec![0u8; (blocks_in_fat as u32 * block_size) as usize];
        let header = fat::encode_header(blocks_in_fat, block_size_config);
        fat_bytes[0..2].copy_from_slice(&header.to_le_bytes());
        fat_bytes[2..4].copy_from_slice(&FAT_LAST.to_le_bytes());
        image.write_all(&fat_bytes)?;

        // Root directory block: all zeroes, so its first entry is already the
        // end-of-directory sentinel.
        image.write_all(&vec![0u8; block_size as usize])?;
        image.set_len(total)?;
        image.sync_all()?;
        Ok(())
    }

    /// Open an image, map its FAT, and load the root directory chain.
    pub fn mount(path: &Path) -> Result<FatFs> {
        let image = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => Errno::FileNotFound,
                _ => Errno::IoError,
            })?;

        let mut header_bytes = [0u8; 2];
        image.read_exact_at(&mut header_bytes, 0)?;
        let (fat_blocks, block_size) = fat::decode_header(u16::from_le_bytes(header_bytes))?;
        let fat_size = fat_blocks as u32 * block_size;
        let fat = FatMapping::map(&image, fat_size as usize)?;
        let data_start = fat_size as u64;

        // Follow the chain from block 1 into an expandable buffer.
        let mut buf = Vec::new();
        let mut block = 1u16;
        let mut blocks_read = 0;
        while block != FAT_LAST && blocks_read < MAX_ROOT_DIR_BLOCKS {
            let mut chunk = vec![0u8; block_size as usize];
            image.read_exact_at(&mut chunk, data_start + (block as u64 - 1) * block_size as u64)?;
            buf.extend_from_slice(&chunk);
            block = fat.get(block);
            blocks_read += 1;
        }
        let root = RootDir::from_bytes(&buf, block_size);

        let mut open_files: [Option<OpenFile>; MAX_OPEN_FILES] = std::array::from_fn(|_| None);
        open_files[0] = Some(OpenFile {
            entry: EntryRef::Std(fd::std_entry("stdin", Perm::READ)),
            current_block: 0,
            offset: 0,
            mode: OpenMode::Read,
            ref_count: 1,
        });
        open_files[1] = Some(OpenFile {
            entry: EntryRef::Std(fd::std_entry("stdout", Perm::WRITE)),
            current_block: 0,
            offset: 0,
            mode: OpenMode::Write,
            ref_count: 1,
        });
        open_files[2] = Some(OpenFile {
            entry: EntryRef::Std(fd::std_entry("stderr", Perm::WRITE)),
            current_block: 0,
            offset: 0,
            mode: OpenMode::Write,
            ref_count: 1,
        });

        info!(
            "mounted {}: {} FAT blocks, {} byte blocks",
            path.display(),
            fat_blocks,
            block_size
        );
        Ok(FatFs {
            image,
            fat,
            fat_blocks,
            block_size,
            data_start,
            root,
            open_files,
        })
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn fat_blocks(&self) -> u16 {
        self.fat_blocks
    }

    /// Free data blocks left on the volume.
    pub fn free_blocks(&self) -> usize {
        self.fat.free_count()
    }

    pub fn slot(&self, fd: usize) -> Option<&OpenFile> {
        self.open_files.get(fd).and_then(|s| s.as_ref())
    }

    fn slot_mut(&mut self, fd: usize) -> Option<&mut OpenFile> {
        self.open_files.get_mut(fd).and_then(|s| s.as_mut())
    }

    /// Resolve the directory entry a slot refers to, by value.
    fn slot_entry(&self, fd: usize) -> Result<DirEntry> {
        match &self.slot(fd).ok_or(Errno::InvalidFd)?.entry {
            EntryRef::Root(idx) => Ok(self.root.entry(*idx).clone()),
            EntryRef::Std(entry) => Ok(entry.clone()),
        }
    }

    /// Anything beyond the standard descriptors still open?
    fn has_user_fds(&self) -> bool {
        self.open_files.iter().skip(3).any(|s| s.is_some())
    }

    /// Write the in-memory root directory back along its block chain.
    pub fn sync_root(&mut self) -> Result<()> {
        let bytes = self.root.to_bytes();
        let block_size = self.block_size as usize;
        let mut block = 1u16;
        let mut written = 0;
        while block != FAT_LAST && written < self.root.blocks() {
            let start = written * block_size;
            let pos = self.data_start + (block as u64 - 1) * self.block_size as u64;
            self.image.write_all_at(&bytes[start..start + block_size], pos)?;
            block = self.fat.get(block);
            written += 1;
        }
        self.image.sync_all()?;
        Ok(())
    }

    /// Flush the FAT mapping and the image.
    pub fn flush(&mut self) -> Result<()> {
        self.fat.sync()?;
        self.image.sync_all()?;
        Ok(())
    }

    /// Sync everything and release the mapping and the image.
    pub fn unmount(mut self) -> Result<()> {
        self.sync_root()?;
        self.flush()
        // FatMapping::drop munmaps, File::drop closes.
    }
}

// ── Global mount point ─────────────────────────────────────────────

lazy_static! {
    static ref FS: Mutex<Option<FatFs>> = Mutex::new(None);
}

pub fn is_mounted() -> bool {
    FS.lock().is_some()
}

/// Run a file operation against the mounted filesystem.
pub fn with<R>(f: impl FnOnce(&mut FatFs) -> Result<R>) -> Result<R> {
    let mut guard = FS.lock();
    match guard.as_mut() {
        Some(fs) => f(fs),
        None => Err(Errno::NotMounted),
    }
}

pub fn mkfs(path: &Path, blocks_in_fat: u16, block_size_config: u8) -> Result<()> {
    if is_mounted() {
        return Err(Errno::FileInUse);
    }
    FatFs::mkfs(path, blocks_in_fat, block_size_config)
}

pub fn mount(path: &Path) -> Result<()> {
    let mut guard = FS.lock();
    if guard.is_some() {
        return Err(Errno::FileInUse);
    }
    *guard = Some(FatFs::mount(path)?);
    Ok(())
}

/// Refuses while non-standard descriptors remain open.
pub fn unmount() -> Result<()> {
    let mut guard = FS.lock();
    match guard.as_ref() {
        None => Err(Errno::NotMounted),
        Some(fs) if fs.has_user_fds() => Err(Errno::FileInUse),
        Some(_) => guard.take().unwrap().unmount(),
    }
}

// ── Kernel-level wrappers used by the system-call layer ────────────

pub fn open(name: &str, mode: OpenMode) -> Result<usize> {
    with(|fs| fs.open(name, mode))
}

/// Read from a global descriptor. Descriptor 0 is backed by the host's
/// standard input and reads one line, stripping the newline; the line read
/// happens off the filesystem lock so other processes are not held up.
pub fn read(fd: usize, buf: &mut [u8]) -> Result<usize> {
    if fd == 0 {
        with(|fs| {
            let entry = fs.slot_entry(0)?;
            if !entry.perm.contains(Perm::READ) {
                return Err(Errno::PermissionDenied);
            }
            Ok(())
        })?;
        return read_stdin_line(buf);
    }
    with(|fs| fs.read(fd, buf))
}

fn read_stdin_line(buf: &mut [u8]) -> Result<usize> {
    let mut line = String::new();
    let stdin = io::stdin();
    match stdin.lock().read_line(&mut line) {
        Ok(0) => Ok(0),
        Ok(_) => {
            let stripped = line.trim_end_matches('\n');
            let n = stripped.len().min(buf.len());
            buf[..n].copy_from_slice(&stripped.as_bytes()[..n]);
            Ok(n)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
        Err(_) => Err(Errno::IoError),
    }
}

pub fn write(fd: usize, buf: &[u8]) -> Result<usize> {
    with(|fs| fs.write(fd, buf))
}

/// Position a descriptor at `offset` and read; one critical section so the
/// caller's per-process offset cannot be raced by another descriptor.
pub fn pread(fd: usize, offset: u32, buf: &mut [u8]) -> Result<usize> {
    with(|fs| {
        fs.lseek(fd, offset as i64, fd::Whence::Set)?;
        fs.read(fd, buf)
    })
}

pub fn pwrite(fd: usize, offset: u32, buf: &[u8]) -> Result<usize> {
    with(|fs| {
        fs.lseek(fd, offset as i64, fd::Whence::Set)?;
        fs.write(fd, buf)
    })
}

pub fn lseek(fd: usize, offset: i64, whence: fd::Whence) -> Result<u32> {
    with(|fs| fs.lseek(fd, offset, whence))
}

pub fn close(fd: usize) -> Result<()> {
    with(|fs| fs.close(fd))
}

/// Bump a global slot's reference count (descriptor inherited on spawn).
/// A no-op when nothing is mounted.
pub fn retain_fd(fd: usize) {
    let _ = with(|fs| {
        fs.retain(fd);
        Ok(())
    });
}

/// Drop one reference to a global slot, ignoring errors. Used when a PCB is
/// destroyed with descriptors still in its table.
pub fn release_fd(fd: usize) {
    let _ = with(|fs| fs.close(fd));
}

pub fn unlink(name: &str) -> Result<()> {
    with(|fs| fs.unlink(name))
}

pub fn perm(name: &str) -> Result<Perm> {
    with(|fs| fs.perm(name))
}

pub fn chmod(name: &str, delta: i32) -> Result<()> {
    with(|fs| fs.chmod(name, delta))
}

pub fn rename(name: &str, to: &str) -> Result<()> {
    with(|fs| fs.rename(name, to))
}

pub fn touch(name: &str) -> Result<()> {
    with(|fs| fs.touch(name))
}

pub fn file_size(name: &str) -> Result<u32> {
    with(|fs| fs.file_size(name))
}

pub fn list(name: Option<&str>) -> Result<Vec<ops::FileInfo>> {
    with(|fs| fs.list(name))
}

pub fn copy_within(src: &str, dst: &str) -> Result<()> {
    with(|fs| fs.copy_within(src, dst))
}

pub fn copy_from_host(host_src: &Path, dst: &str) -> Result<()> {
    with(|fs| fs.copy_from_host(host_src, dst))
}

pub fn copy_to_host(src: &str, host_dst: &Path) -> Result<()> {
    with(|fs| fs.copy_to_host(src, host_dst))
}

// Every supported block size holds a whole number of directory entries.
static_assertions::const_assert_eq!(BLOCK_SIZES[0] as usize % DIR_ENTRY_SIZE, 0);
