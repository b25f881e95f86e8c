//! Kernel event log.
//!
//! Every scheduling decision and process life-cycle change is appended to a
//! log file as `[tick]\tEVENT\tpid\tpriority\tcmd`. The tick counter is
//! bumped once per scheduler quantum.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use lazy_static::lazy_static;
use spin::Mutex;

use crate::kernel::pcb::Pid;

lazy_static! {
    static ref LOG_FILE: Mutex<Option<File>> = Mutex::new(None);
}

static CLOCK_TICKS: AtomicU64 = AtomicU64::new(0);

/// Open (truncating) the log file. Resets the tick counter.
pub fn init(path: &Path) -> std::io::Result<()> {
    let file = File::create(path)?;
    *LOG_FILE.lock() = Some(file);
    CLOCK_TICKS.store(0, Ordering::SeqCst);
    Ok(())
}

/// Append one event line. A no-op before `init`.
pub fn event(operation: &str, pid: Pid, priority: usize, cmd: &str) {
    let mut guard = LOG_FILE.lock();
    if let Some(file) = guard.as_mut() {
        let _ = writeln!(
            file,
            "[{}]\t{}\t{}\t{}\t{}",
            CLOCK_TICKS.load(Ordering::SeqCst),
            operation,
            pid,
            priority,
            cmd
        );
    }
}

/// Advance the clock; called once per scheduler tick.
pub fn tick() {
    CLOCK_TICKS.fetch_add(1, Ordering::SeqCst);
}

/// Current tick count as seen by the log.
pub fn ticks() -> u64 {
    CLOCK_TICKS.load(Ordering::SeqCst)
}

pub fn close() {
    *LOG_FILE.lock() = None;
}
