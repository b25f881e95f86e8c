//! The system-call surface.
//!
//! The only layer user commands may talk to. It translates per-process
//! descriptors to global open-file slots, validates arguments, passes
//! through the scheduling checkpoint on entry, and records the last error
//! in a per-thread errno readable with `errno`/`perror`.

use std::cell::Cell;

use crate::errors::{Errno, Result};
use crate::fs;
use crate::fs::dir::Perm;
use crate::fs::fd::{FdTable, OpenMode, ProcFd, Whence, MAX_OPEN_FILES};
use crate::kernel::pcb::{Pid, ProcStatus, Signal, WaitStatus};
use crate::kernel::{self, ProcessExit, KERNEL};

thread_local! {
    static ERRNO: Cell<Option<Errno>> = Cell::new(None);
}

/// Last error recorded for the calling process.
pub fn errno() -> Option<Errno> {
    ERRNO.with(|c| c.get())
}

/// Print `prefix: <errno message>` on standard error.
pub fn perror(prefix: &str) {
    let msg = match errno() {
        Some(e) => format!("{}: {}\n", prefix, e),
        None => format!("{}\n", prefix),
    };
    if s_write(2, msg.as_bytes()).is_err() {
        eprint!("{}", msg);
    }
}

fn record<T>(result: Result<T>) -> Result<T> {
    match result {
        Err(e) => {
            ERRNO.with(|c| c.set(Some(e)));
            Err(e)
        }
        ok => ok,
    }
}

/// POSIX portable filename: alphanumerics, `.`, `-`, `_`.
fn is_posix_filename(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_')
}

fn with_fd_table<R>(f: impl FnOnce(&mut FdTable) -> Result<R>) -> Result<R> {
    let pid = kernel::current_pid();
    let mut kernel = KERNEL.lock();
    match kernel.pcb_mut(pid) {
        Some(pcb) => f(&mut pcb.fd_table),
        None => Err(Errno::NoParent),
    }
}

fn fd_entry(fd: usize) -> Result<ProcFd> {
    with_fd_table(|table| table.get(fd).copied().flatten().ok_or(Errno::InvalidFd))
}

// ── File system calls ──────────────────────────────────────────────

/// Open `fname`, returning the first free per-process descriptor.
pub fn s_open(fname: &str, mode: OpenMode) -> Result<usize> {
    kernel::checkpoint();
    record(open_impl(fname, mode))
}

fn open_impl(fname: &str, mode: OpenMode) -> Result<usize> {
    if !is_posix_filename(fname) {
        return Err(Errno::InvalidFilename);
    }
    let global_fd = fs::open(fname, mode)?;
    let offset = if mode == OpenMode::Append {
        fs::file_size(fname).unwrap_or(0)
    } else {
        0
    };
    let allocated = with_fd_table(|table| {
        let fd = (0..MAX_OPEN_FILES)
            .find(|&i| table[i].is_none())
            .ok_or(Errno::TooManyOpenFiles)?;
        table[fd] = Some(ProcFd {
            global_fd,
            mode,
            offset,
        });
        Ok(fd)
    });
    if allocated.is_err() {
        let _ = fs::close(global_fd);
    }
    allocated
}

/// Read through a per-process descriptor, advancing its private offset.
pub fn s_read(fd: usize, buf: &mut [u8]) -> Result<usize> {
    kernel::checkpoint();
    record(read_impl(fd, buf))
}

fn read_impl(fd: usize, buf: &mut [u8]) -> Result<usize> {
    let entry = fd_entry(fd)?;
    let n = if entry.global_fd == 0 {
        fs::read(0, buf)?
    } else {
        fs::pread(entry.global_fd, entry.offset, buf)?
    };
    with_fd_table(|table| {
        if let Some(e) = table[fd].as_mut() {
            e.offset += n as u32;
        }
        Ok(())
    })?;
    Ok(n)
}

/// Write through a per-process descriptor, advancing its private offset.
pub fn s_write(fd: usize, buf: &[u8]) -> Result<usize> {
    kernel::checkpoint();
    record(write_impl(fd, buf))
}

fn write_impl(fd: usize, buf: &[u8]) -> Result<usize> {
    let entry = fd_entry(fd)?;
    if !entry.mode.writes() {
        return Err(Errno::InvalidMode);
    }
    let n = fs::pwrite(entry.global_fd, entry.offset, buf)?;
    with_fd_table(|table| {
        if let Some(e) = table[fd].as_mut() {
            e.offset += n as u32;
        }
        Ok(())
    })?;
    Ok(n)
}

/// Release a per-process descriptor and its global reference.
pub fn s_close(fd: usize) -> Result<()> {
    kernel::checkpoint();
    record(close_impl(fd))
}

fn close_impl(fd: usize) -> Result<()> {
    let entry = fd_entry(fd)?;
    with_fd_table(|table| {
        table[fd] = None;
        Ok(())
    })?;
    fs::close(entry.global_fd)
}

/// Reposition a descriptor; returns the new absolute offset.
pub fn s_lseek(fd: usize, offset: i64, whence: Whence) -> Result<u32> {
    kernel::checkpoint();
    record(lseek_impl(fd, offset, whence))
}

fn lseek_impl(fd: usize, offset: i64, whence: Whence) -> Result<u32> {
    let entry = fd_entry(fd)?;
    // The per-process offset is the authoritative position.
    let new_offset = fs::with(|f| {
        f.lseek(entry.global_fd, entry.offset as i64, Whence::Set)?;
        f.lseek(entry.global_fd, offset, whence)
    })?;
    with_fd_table(|table| {
        if let Some(e) = table[fd].as_mut() {
            e.offset = new_offset;
        }
        Ok(())
    })?;
    Ok(new_offset)
}

pub fn s_unlink(fname: &str) -> Result<()> {
    kernel::checkpoint();
    if !is_posix_filename(fname) {
        return record(Err(Errno::InvalidFilename));
    }
    record(fs::unlink(fname))
}

pub fn s_perm(fname: &str) -> Result<Perm> {
    kernel::checkpoint();
    if !is_posix_filename(fname) {
        return record(Err(Errno::InvalidFilename));
    }
    record(fs::perm(fname))
}

pub fn s_chmod(fname: &str, delta: i32) -> Result<()> {
    kernel::checkpoint();
    record(fs::chmod(fname, delta))
}

pub fn s_touch(fname: &str) -> Result<()> {
    kernel::checkpoint();
    if !is_posix_filename(fname) {
        return record(Err(Errno::InvalidFilename));
    }
    record(fs::touch(fname))
}

pub fn s_rm(fname: &str) -> Result<()> {
    s_unlink(fname)
}

pub fn s_mv(src: &str, dst: &str) -> Result<()> {
    kernel::checkpoint();
    if !is_posix_filename(src) || !is_posix_filename(dst) {
        return record(Err(Errno::InvalidFilename));
    }
    record(fs::rename(src, dst))
}

/// `cp src dst`, `cp -h host_src dst`, `cp src -h host_dst`.
pub fn s_cp(argv: &[String]) -> Result<()> {
    kernel::checkpoint();
    record(cp_impl(argv))
}

fn cp_impl(argv: &[String]) -> Result<()> {
    if argv.len() == 4 && argv[1] == "-h" {
        fs::copy_from_host(std::path::Path::new(&argv[2]), &argv[3])
    } else if argv.len() == 4 && argv[2] == "-h" {
        fs::copy_to_host(&argv[1], std::path::Path::new(&argv[3]))
    } else if argv.len() == 3 {
        fs::copy_within(&argv[1], &argv[2])
    } else {
        Err(Errno::InvalidMode)
    }
}

/// Render one listing row (or every live entry) through descriptor 1.
pub fn s_ls(fname: Option<&str>) -> Result<()> {
    kernel::checkpoint();
    let rows = record(fs::list(fname))?;
    let mut out = String::new();
    for row in rows {
        let r = if row.perm.contains(Perm::READ) { 'r' } else { '-' };
        let w = if row.perm.contains(Perm::WRITE) { 'w' } else { '-' };
        let x = if row.perm.contains(Perm::EXEC) { 'x' } else { '-' };
        out.push_str(&format!(
            "{:>6} {}{}{} {:>8} {} {}\n",
            row.first_block,
            r,
            w,
            x,
            row.size,
            format_mtime(row.mtime),
            row.name
        ));
    }
    s_write(1, out.as_bytes())?;
    Ok(())
}

/// Concatenate files (or standard input) to descriptor 1, or to a file
/// named by `-w` (truncate) / `-a` (append).
pub fn s_cat(argv: &[String]) -> Result<()> {
    kernel::checkpoint();
    record(cat_impl(argv))
}

fn cat_impl(argv: &[String]) -> Result<()> {
    let mut output: Option<&str> = None;
    let mut append = false;
    let mut inputs: Vec<&str> = Vec::new();
    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "-w" | ">" | "-a" | ">>" => {
                append = argv[i] == "-a" || argv[i] == ">>";
                output = Some(argv.get(i + 1).ok_or(Errno::InvalidMode)?.as_str());
                i += 1;
            }
            arg if arg.starts_with('-') => {}
            arg => inputs.push(arg),
        }
        i += 1;
    }
    if append {
        if let Some(out) = output {
            if inputs.contains(&out) {
                // Reading and appending to the same file never terminates.
                return Err(Errno::InvalidMode);
            }
        }
    }

    let out_fd = match output {
        Some(name) => Some(s_open(
            name,
            if append { OpenMode::Append } else { OpenMode::Write },
        )?),
        None => None,
    };
    let dest = out_fd.unwrap_or(1);

    let mut buf = [0u8; 1024];
    let mut status = Ok(());
    if inputs.is_empty() {
        // No input files: echo standard input until EOF.
        loop {
            let n = s_read(0, &mut buf)?;
            if n == 0 {
                break;
            }
            s_write(dest, &buf[..n])?;
        }
    } else {
        for input in inputs {
            let in_fd = match s_open(input, OpenMode::Read) {
                Ok(fd) => fd,
                Err(e) => {
                    status = Err(e);
                    continue;
                }
            };
            loop {
                let n = match s_read(in_fd, &mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        status = Err(e);
                        break;
                    }
                };
                if let Err(e) = s_write(dest, &buf[..n]) {
                    status = Err(e);
                    break;
                }
            }
            let _ = s_close(in_fd);
        }
    }
    if let Some(fd) = out_fd {
        let _ = s_close(fd);
    }
    status
}

/// Write the arguments separated by spaces, newline-terminated, to fd 1.
pub fn s_echo(args: &[String]) -> Result<()> {
    kernel::checkpoint();
    let mut line = args.join(" ");
    line.push('\n');
    s_write(1, line.as_bytes()).map(|_| ())
}

/// Copy a per-process descriptor onto another slot (redirection).
pub fn s_dup2(old_fd: usize, new_fd: usize) -> Result<usize> {
    kernel::checkpoint();
    record(dup2_impl(old_fd, new_fd))
}

fn dup2_impl(old_fd: usize, new_fd: usize) -> Result<usize> {
    if old_fd >= MAX_OPEN_FILES || new_fd >= MAX_OPEN_FILES {
        return Err(Errno::InvalidFd);
    }
    if old_fd == new_fd {
        return Ok(new_fd);
    }
    let entry = fd_entry(old_fd)?;
    let previous = with_fd_table(|table| {
        let previous = table[new_fd].take();
        table[new_fd] = Some(entry);
        Ok(previous)
    })?;
    fs::retain_fd(entry.global_fd);
    if let Some(p) = previous {
        let _ = fs::close(p.global_fd);
    }
    Ok(new_fd)
}

/// Point a standard slot (0, 1, or 2) back at its console descriptor.
pub fn s_reset_std(slot: usize) -> Result<()> {
    if slot > 2 {
        return record(Err(Errno::InvalidFd));
    }
    let mode = if slot == 0 {
        OpenMode::Read
    } else {
        OpenMode::Write
    };
    let previous = with_fd_table(|table| {
        let previous = table[slot].take();
        table[slot] = Some(ProcFd {
            global_fd: slot,
            mode,
            offset: 0,
        });
        Ok(previous)
    })?;
    fs::retain_fd(slot);
    if let Some(p) = previous {
        let _ = fs::close(p.global_fd);
    }
    Ok(())
}

// ── Process system calls ───────────────────────────────────────────

/// Spawn a child running `func(argv)`; see the kernel contract.
#[allow(clippy::too_many_arguments)]
pub fn s_spawn(
    func: kernel::ProcessFn,
    argv: Vec<String>,
    fd0: usize,
    fd1: usize,
    parent: Pid,
    priority: usize,
    initial_status: ProcStatus,
    is_init: bool,
    is_background: bool,
) -> Result<Pid> {
    kernel::checkpoint();
    record(kernel::spawn(
        func,
        argv,
        fd0,
        fd1,
        parent,
        priority,
        initial_status,
        is_init,
        is_background,
    ))
}

/// Wait on a child; `Ok(None)` only with `nohang` when nothing changed.
pub fn s_waitpid(pid: Pid, nohang: bool) -> Result<Option<(Pid, WaitStatus)>> {
    kernel::checkpoint();
    record(kernel::waitpid(pid, nohang, false, -1))
}

pub fn s_kill(pid: Pid, signal: Signal) -> Result<()> {
    kernel::checkpoint();
    record(kernel::kill(pid, signal))
}

/// Unconditionally exit the calling process.
pub fn s_exit() -> ! {
    std::panic::panic_any(ProcessExit)
}

pub fn s_nice(pid: Pid, priority: i32) -> Result<()> {
    kernel::checkpoint();
    if !(0..=2).contains(&priority) {
        return record(Err(Errno::InvalidPriority));
    }
    record(kernel::nice(pid, priority as usize))
}

pub fn s_sleep(ticks: u64) {
    kernel::checkpoint();
    kernel::sleep(ticks);
}

/// Format the process table through descriptor 1.
pub fn s_ps() -> Result<()> {
    kernel::checkpoint();
    let rows = KERNEL.lock().ps_snapshot();
    let mut out = String::from("PID   PPID  JOB   PRI  STAT  CMD\n");
    for row in rows {
        out.push_str(&format!(
            "{:<5} {:<5} {:<5} {:<4} {:<5} {}\n",
            row.pid,
            row.ppid,
            row.job_id,
            row.priority,
            row.status.letter(),
            row.cmd
        ));
    }
    s_write(1, out.as_bytes()).map(|_| ())
}

/// Format the job table through descriptor 1.
pub fn s_jobs() -> Result<()> {
    kernel::checkpoint();
    let rows = KERNEL.lock().jobs_snapshot();
    let mut out = String::new();
    for row in rows {
        let letter = match row.status {
            ProcStatus::Running => 'R',
            ProcStatus::Stopped => 'S',
            ProcStatus::Blocked => 'B',
            ProcStatus::Zombied => 'U',
        };
        out.push_str(&format!(
            "[{}]  {}  {} {}\n",
            row.job_id,
            row.pid,
            row.argv.join(" "),
            letter
        ));
    }
    s_write(1, out.as_bytes()).map(|_| ())
}

pub fn s_fg(job_id: i32) -> Result<Pid> {
    kernel::checkpoint();
    record(kernel::fg(job_id))
}

pub fn s_bg(job_id: i32) -> Result<Pid> {
    kernel::checkpoint();
    record(kernel::bg(job_id))
}

/// Non-blocking sweep of the shell's zombied children.
pub fn s_reap_zombies() {
    kernel::checkpoint();
    kernel::reap_zombies();
}

/// `1970-01-01 00:00`-style rendering of an mtime.
fn format_mtime(secs: i64) -> String {
    let days = secs.div_euclid(86_400);
    let seconds = secs.rem_euclid(86_400);
    let (hour, minute) = (seconds / 3600, (seconds % 3600) / 60);
    // Civil-date conversion over 400-year eras.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}",
        year, month, day, hour, minute
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_filenames() {
        assert!(is_posix_filename("notes.txt"));
        assert!(is_posix_filename("a-b_c.9"));
        assert!(!is_posix_filename(""));
        assert!(!is_posix_filename("a b"));
        assert!(!is_posix_filename("a/b"));
        assert!(!is_posix_filename("caf\u{e9}"));
    }

    #[test]
    fn mtime_rendering() {
        assert_eq!(format_mtime(0), "1970-01-01 00:00");
        assert_eq!(format_mtime(86_400), "1970-01-02 00:00");
        // 2004-02-29 is a leap day.
        assert_eq!(format_mtime(1_078_012_800), "2004-02-29 00:00");
    }
}
