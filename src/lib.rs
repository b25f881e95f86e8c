//! PennOS: a user-space operating system simulation.
//!
//! One host process is multiplexed into many cooperative processes, each on
//! its own host thread gated by the scheduler, with a FAT-style filesystem
//! backed by a single disk image. `boot` wires the pieces together: mount,
//! event log, scheduler thread, kernel (init, pid 1), then the shell
//! (pid 2), whose termination is a clean shutdown.

pub mod errors;
pub mod events;
pub mod fs;
pub mod kernel;
pub mod logger;
pub mod scheduler;
pub mod shell;
pub mod syscalls;

pub use errors::{Errno, Result};

use std::panic;
use std::path::PathBuf;
use std::sync::Once;
use std::time::Duration;

use kernel::pcb::ProcStatus;
use kernel::ProcessExit;

pub struct BootConfig {
    pub image: PathBuf,
    pub logfile: PathBuf,
    pub quantum: Duration,
}

/// Suppress the default panic report for the `s_exit` unwind marker.
fn install_exit_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().is::<ProcessExit>() {
                return;
            }
            default(info);
        }));
    });
}

/// Bring the system up, run `shell_body` as pid 2, and tear everything
/// down once it returns. The shell body is the only foreground driver; a
/// panic inside it is re-raised after teardown.
pub fn boot<F>(config: &BootConfig, shell_body: F) -> Result<()>
where
    F: FnOnce(&[String]) + Send + 'static,
{
    install_exit_hook();
    fs::mount(&config.image)?;
    events::init(&config.logfile).map_err(|_| Errno::IoError)?;
    // The timer starts before the kernel tables are populated; until init
    // exists the ticks simply find nothing runnable.
    let sched = scheduler::start(config.quantum);
    kernel::init_kernel();

    let shell_pid = kernel::spawn(
        Box::new(shell_body),
        vec!["shell".to_string()],
        0,
        1,
        kernel::INIT_PID,
        0,
        ProcStatus::Blocked,
        true,
        false,
    )?;
    debug_assert_eq!(shell_pid, kernel::SHELL_PID);

    let shell_result = kernel::take_join_handle(shell_pid)
        .map(|handle| handle.join())
        .unwrap_or(Ok(()));

    sched.shutdown();
    events::close();
    let unmounted = fs::unmount();
    if let Err(payload) = shell_result {
        panic::resume_unwind(payload);
    }
    unmounted
}
