use crate::syscalls::{perror, s_ps};

/// ps: list every process: pid, ppid, job, priority, status, command.
pub fn run(_argv: &[String]) {
    if s_ps().is_err() {
        perror("ps");
    }
}
