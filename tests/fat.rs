//! Filesystem tests against standalone mounted volumes. Each test formats
//! its own image under the host temp directory, so they can run in
//! parallel; only the last test exercises the global mount point.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use pennos::fs::dir::Perm;
use pennos::fs::fd::{OpenMode, Whence};
use pennos::fs::FatFs;
use pennos::Errno;

static COUNTER: AtomicU32 = AtomicU32::new(0);

fn temp_image(tag: &str) -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!(
        "pennfat-{}-{}-{}.img",
        tag,
        std::process::id(),
        n
    ))
}

fn fresh(tag: &str, blocks_in_fat: u16, config: u8) -> (PathBuf, FatFs) {
    let path = temp_image(tag);
    FatFs::mkfs(&path, blocks_in_fat, config).unwrap();
    let volume = FatFs::mount(&path).unwrap();
    (path, volume)
}

fn write_file(volume: &mut FatFs, name: &str, data: &[u8]) {
    let fd = volume.open(name, OpenMode::Write).unwrap();
    assert_eq!(volume.write(fd, data).unwrap(), data.len());
    volume.close(fd).unwrap();
}

fn read_file(volume: &mut FatFs, name: &str) -> Vec<u8> {
    let fd = volume.open(name, OpenMode::Read).unwrap();
    let mut data = Vec::new();
    let mut buf = [0u8; 512];
    loop {
        let n = volume.read(fd, &mut buf).unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    volume.close(fd).unwrap();
    data
}

#[test]
fn mkfs_writes_exact_image_size() {
    let path = temp_image("mkfs");
    FatFs::mkfs(&path, 1, 0).unwrap();
    // 128 FAT entries -> 127 data blocks, plus one FAT block, 256 bytes each.
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 128 * 256);

    FatFs::mkfs(&path, 2, 1).unwrap();
    // 512 entries -> 511 data blocks plus 2 FAT blocks of 512 bytes.
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 513 * 512);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn mkfs_rejects_bad_configs() {
    let path = temp_image("badcfg");
    assert_eq!(FatFs::mkfs(&path, 0, 0), Err(Errno::InvalidFatConfig));
    assert_eq!(FatFs::mkfs(&path, 33, 0), Err(Errno::InvalidFatConfig));
    assert_eq!(FatFs::mkfs(&path, 1, 5), Err(Errno::InvalidFatConfig));
}

#[test]
fn mount_reads_geometry_from_header() {
    let (path, volume) = fresh("geometry", 2, 1);
    assert_eq!(volume.block_size(), 512);
    assert_eq!(volume.fat_blocks(), 2);
    volume.unmount().unwrap();
    let _ = std::fs::remove_file(&path);
}

#[test]
fn touch_survives_remount() {
    let (path, mut volume) = fresh("touch", 1, 0);
    volume.touch("f").unwrap();
    volume.unmount().unwrap();

    let volume = FatFs::mount(&path).unwrap();
    let rows = volume.list(None).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "f");
    assert_eq!(rows[0].size, 0);
    volume.unmount().unwrap();
    let _ = std::fs::remove_file(&path);
}

#[test]
fn write_then_read_across_blocks() {
    let (path, mut volume) = fresh("rw", 1, 0);
    let data: Vec<u8> = (0..700u32).map(|i| (i % 251) as u8).collect();
    write_file(&mut volume, "blob", &data);
    assert_eq!(read_file(&mut volume, "blob"), data);
    assert_eq!(volume.file_size("blob").unwrap(), 700);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn append_positions_at_end_of_file() {
    let (path, mut volume) = fresh("append", 1, 0);
    write_file(&mut volume, "f", b"abc");
    let fd = volume.open("f", OpenMode::Append).unwrap();
    assert_eq!(volume.write(fd, b"defg").unwrap(), 4);
    volume.close(fd).unwrap();
    assert_eq!(read_file(&mut volume, "f"), b"abcdefg");

    // Appending when the last block is exactly full must chain a new one.
    let block = vec![7u8; 256];
    write_file(&mut volume, "full", &block);
    let fd = volume.open("full", OpenMode::Append).unwrap();
    assert_eq!(volume.write(fd, b"xy").unwrap(), 2);
    volume.close(fd).unwrap();
    let mut expect = block.clone();
    expect.extend_from_slice(b"xy");
    assert_eq!(read_file(&mut volume, "full"), expect);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn write_mode_truncates_and_frees_blocks() {
    let (path, mut volume) = fresh("trunc", 1, 0);
    let free_at_start = volume.free_blocks();
    write_file(&mut volume, "f", &[1u8; 600]);
    assert_eq!(volume.free_blocks(), free_at_start - 3);

    let fd = volume.open("f", OpenMode::Write).unwrap();
    // Truncation keeps the head block and releases the rest.
    assert_eq!(volume.file_size("f").unwrap(), 0);
    assert_eq!(volume.free_blocks(), free_at_start - 1);
    volume.close(fd).unwrap();
    let _ = std::fs::remove_file(&path);
}

#[test]
fn lseek_clamps_readers_and_walks_chains() {
    let (path, mut volume) = fresh("seek", 1, 0);
    let data: Vec<u8> = (0..600u32).map(|i| (i % 241) as u8).collect();
    write_file(&mut volume, "f", &data);

    let fd = volume.open("f", OpenMode::Read).unwrap();
    assert_eq!(volume.lseek(fd, 4096, Whence::Set).unwrap(), 600);
    assert_eq!(volume.lseek(fd, 300, Whence::Set).unwrap(), 300);
    let mut buf = [0u8; 10];
    assert_eq!(volume.read(fd, &mut buf).unwrap(), 10);
    assert_eq!(buf, data[300..310]);
    assert_eq!(volume.lseek(fd, -10, Whence::Cur).unwrap(), 300);
    assert_eq!(volume.lseek(fd, -1, Whence::End).unwrap(), 599);
    assert_eq!(volume.lseek(fd, -700, Whence::Cur), Err(Errno::InvalidArgument));
    volume.close(fd).unwrap();
    let _ = std::fs::remove_file(&path);
}

#[test]
fn unlink_of_open_file_is_deferred() {
    let (path, mut volume) = fresh("unlink", 1, 0);
    let data = vec![9u8; 300];
    write_file(&mut volume, "f", &data);
    let free_before = volume.free_blocks();

    let fd = volume.open("f", OpenMode::Read).unwrap();
    volume.unlink("f").unwrap();

    // The name is gone but the open descriptor still works.
    assert!(volume.list(None).unwrap().iter().all(|r| r.name != "f"));
    assert_eq!(volume.open("f", OpenMode::Read), Err(Errno::FileNotFound));
    assert_eq!(volume.free_blocks(), free_before);
    let mut buf = vec![0u8; 512];
    assert_eq!(volume.read(fd, &mut buf).unwrap(), 300);
    assert_eq!(&buf[..300], &data[..]);

    // The final close releases the chain and finishes the deletion.
    volume.close(fd).unwrap();
    assert_eq!(volume.free_blocks(), free_before + 2);
    assert_eq!(volume.open("f", OpenMode::Read), Err(Errno::FileNotFound));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn unlink_missing_file_fails() {
    let (path, mut volume) = fresh("unlink2", 1, 0);
    assert_eq!(volume.unlink("nope"), Err(Errno::FileNotFound));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn disk_fills_at_capacity_and_size_is_preserved() {
    let (path, mut volume) = fresh("full", 1, 0);
    // 127 data blocks, one of which carries the root directory.
    let capacity = volume.free_blocks() as u32 * volume.block_size();
    assert_eq!(capacity, 126 * 256);

    let fd = volume.open("big", OpenMode::Write).unwrap();
    let data = vec![0x5a; capacity as usize];
    assert_eq!(volume.write(fd, &data).unwrap(), capacity as usize);
    assert_eq!(volume.write(fd, b"x"), Err(Errno::DiskFull));
    assert_eq!(volume.file_size("big").unwrap(), capacity);
    volume.close(fd).unwrap();
    let _ = std::fs::remove_file(&path);
}

#[test]
fn chmod_applies_bounded_deltas() {
    let (path, mut volume) = fresh("chmod", 1, 0);
    volume.touch("f").unwrap();
    assert_eq!(volume.perm("f").unwrap(), Perm::READ | Perm::WRITE);

    volume.chmod("f", -4).unwrap();
    assert_eq!(volume.perm("f").unwrap(), Perm::WRITE);
    volume.chmod("f", 4).unwrap();
    assert_eq!(volume.perm("f").unwrap(), Perm::READ | Perm::WRITE);

    // Out-of-range results are rejected and leave the byte untouched.
    assert_eq!(volume.chmod("f", 4), Err(Errno::InvalidMode));
    assert_eq!(volume.chmod("f", -7), Err(Errno::InvalidMode));
    assert_eq!(volume.perm("f").unwrap(), Perm::READ | Perm::WRITE);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn read_requires_read_permission() {
    let (path, mut volume) = fresh("perm", 1, 0);
    write_file(&mut volume, "secret", b"data");
    volume.chmod("secret", -4).unwrap();

    let fd = volume.open("secret", OpenMode::Read).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(volume.read(fd, &mut buf), Err(Errno::PermissionDenied));

    // A second open of the already-open file checks the bits up front.
    assert_eq!(
        volume.open("secret", OpenMode::Write),
        Ok(fd)
    );
    volume.chmod("secret", -2).unwrap();
    assert_eq!(
        volume.open("secret", OpenMode::Append),
        Err(Errno::PermissionDenied)
    );
    volume.close(fd).unwrap();
    volume.close(fd).unwrap();
    let _ = std::fs::remove_file(&path);
}

#[test]
fn rename_respects_permissions_and_overwrites() {
    let (path, mut volume) = fresh("mv", 1, 0);
    write_file(&mut volume, "a", b"AAA");
    write_file(&mut volume, "b", b"BBB");

    volume.rename("a", "c").unwrap();
    assert!(volume.list(None).unwrap().iter().all(|r| r.name != "a"));
    assert_eq!(read_file(&mut volume, "c"), b"AAA");

    // Overwriting frees the destination's old chain.
    let free_before = volume.free_blocks();
    volume.rename("c", "b").unwrap();
    assert_eq!(read_file(&mut volume, "b"), b"AAA");
    assert_eq!(volume.free_blocks(), free_before + 1);

    write_file(&mut volume, "locked", b"x");
    volume.chmod("locked", -4).unwrap();
    assert_eq!(volume.rename("locked", "z"), Err(Errno::PermissionDenied));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn directory_grows_one_block_at_a_time() {
    let (path, mut volume) = fresh("growth", 1, 0);
    // 256-byte blocks hold four 64-byte entries; ten files force growth.
    let names: Vec<String> = (0..10).map(|i| format!("file{}", i)).collect();
    for name in &names {
        volume.touch(name).unwrap();
    }
    volume.unmount().unwrap();

    let volume = FatFs::mount(&path).unwrap();
    let rows = volume.list(None).unwrap();
    assert_eq!(rows.len(), names.len());
    for name in &names {
        assert!(rows.iter().any(|r| &r.name == name));
    }
    volume.unmount().unwrap();
    let _ = std::fs::remove_file(&path);
}

#[test]
fn remount_preserves_entry_fields() {
    let (path, mut volume) = fresh("remount", 1, 0);
    write_file(&mut volume, "keep.txt", &[3u8; 400]);
    volume.chmod("keep.txt", -2).unwrap();
    let before = volume.list(Some("keep.txt")).unwrap().remove(0);
    volume.unmount().unwrap();

    let volume = FatFs::mount(&path).unwrap();
    let after = volume.list(Some("keep.txt")).unwrap().remove(0);
    assert_eq!(before, after);
    volume.unmount().unwrap();
    let _ = std::fs::remove_file(&path);
}

#[test]
fn copies_inside_and_across_the_boundary() {
    let (path, mut volume) = fresh("cp", 2, 0);
    let data: Vec<u8> = (0..1000u32).map(|i| (i % 199) as u8).collect();
    write_file(&mut volume, "src", &data);

    volume.copy_within("src", "dst").unwrap();
    assert_eq!(read_file(&mut volume, "dst"), data);

    let host = temp_image("cp-host");
    volume.copy_to_host("src", &host).unwrap();
    assert_eq!(std::fs::read(&host).unwrap(), data);

    volume.copy_from_host(&host, "back").unwrap();
    assert_eq!(read_file(&mut volume, "back"), data);

    let _ = std::fs::remove_file(&host);
    let _ = std::fs::remove_file(&path);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn write_read_roundtrip(data in proptest::collection::vec(any::<u8>(), 1..4000)) {
            let (path, mut volume) = fresh("prop", 2, 0);
            write_file(&mut volume, "blob", &data);
            prop_assert_eq!(read_file(&mut volume, "blob"), data);
            let _ = std::fs::remove_file(&path);
        }
    }
}

#[test]
fn global_mount_point_lifecycle() {
    use pennos::fs;

    let path = temp_image("global");
    fs::mkfs(&path, 1, 0).unwrap();
    assert_eq!(fs::open("f", OpenMode::Write), Err(Errno::NotMounted));

    fs::mount(&path).unwrap();
    assert_eq!(fs::mount(&path), Err(Errno::FileInUse));

    let fd = fs::open("f", OpenMode::Write).unwrap();
    assert_eq!(fs::unmount(), Err(Errno::FileInUse));
    fs::close(fd).unwrap();
    fs::unmount().unwrap();
    assert_eq!(fs::unmount(), Err(Errno::NotMounted));
    let _ = std::fs::remove_file(&path);
}
