//! Stress commands: hang, nohang, recur.

use crate::kernel::pcb::{Pid, ProcStatus};
use crate::syscalls::{perror, s_sleep, s_spawn, s_waitpid, s_write};

fn report(line: String) {
    let _ = s_write(2, line.as_bytes());
}

/// Spawn ten one-tick nappers named child_0 through child_9 and reap them
/// all, blocking or polling with a non-blocking wait.
fn spawn_nappers(nohang: bool) {
    let mut first: Pid = 0;
    for i in 0..10 {
        let name = format!("child_{}", i);
        match s_spawn(
            Box::new(|_| s_sleep(1)),
            vec![name.clone()],
            0,
            1,
            -1,
            1,
            ProcStatus::Blocked,
            false,
            false,
        ) {
            Ok(pid) => {
                if i == 0 {
                    first = pid;
                }
                report(format!("{} was spawned\n", name));
            }
            Err(_) => perror("spawn"),
        }
    }
    loop {
        match s_waitpid(-1, nohang) {
            // Nothing waitable yet: poll again later.
            Ok(None) => s_sleep(9),
            Ok(Some((pid, _))) => report(format!("child_{} was reaped\n", pid - first)),
            // No more waitable children.
            Err(_) => break,
        }
    }
}

/// hang: spawn 10 nappers and block-wait on them.
pub fn hang(_argv: &[String]) {
    spawn_nappers(false);
}

/// nohang: spawn 10 nappers and reap them with non-blocking waits.
pub fn nohang(_argv: &[String]) {
    spawn_nappers(true);
}

fn run_generation(generation: u32) {
    if generation >= 26 {
        return;
    }
    let name = format!("Gen_{}", (b'A' + generation as u8) as char);
    let next = generation + 1;
    match s_spawn(
        Box::new(move |_| run_generation(next)),
        vec![name.clone()],
        0,
        1,
        -1,
        1,
        ProcStatus::Blocked,
        false,
        false,
    ) {
        Ok(pid) => {
            report(format!("{} was spawned\n", name));
            s_sleep(1);
            if let Ok(Some((reaped, _))) = s_waitpid(pid, false) {
                if reaped == pid {
                    report(format!("{} was reaped\n", name));
                }
            }
        }
        Err(_) => perror("recur"),
    }
}

/// recur: spawn Gen_A through Gen_Z recursively, each generation
/// block-waited by its parent.
pub fn recur(_argv: &[String]) {
    run_generation(0);
}
