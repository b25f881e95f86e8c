//! The shell driver (pid 2).
//!
//! Deliberately minimal: no line editing, history, or escape handling.
//! It reads a line through descriptor 0, tokenises it, rewrites its own
//! standard slots for `<` / `>` / `>>` redirection, and either runs a
//! built-in inline or spawns the command as a new process, waiting unless
//! the line ended in `&`.

pub mod commands;

use std::sync::atomic::{AtomicBool, Ordering};

use crate::kernel::pcb::{Pid, ProcStatus};
use crate::kernel::{ProcessFn, PROMPT};
use crate::syscalls::{
    perror, s_bg, s_close, s_dup2, s_fg, s_jobs, s_nice, s_open, s_read, s_reap_zombies,
    s_reset_std, s_sleep, s_spawn, s_waitpid, s_write,
};
use crate::fs::fd::OpenMode;

/// Whether host stdin is in non-blocking mode (`--aio`).
pub static AIO_ENABLED: AtomicBool = AtomicBool::new(false);

struct ParsedLine {
    argv: Vec<String>,
    background: bool,
    stdin_file: Option<String>,
    stdout_file: Option<(String, bool)>,
}

/// Process body of the shell.
pub fn penn_shell(_argv: &[String]) {
    loop {
        s_reap_zombies();
        let _ = s_write(1, PROMPT.as_bytes());
        let mut buf = [0u8; 4096];
        let n = loop {
            match s_read(0, &mut buf) {
                Ok(0) if AIO_ENABLED.load(Ordering::Relaxed) => {
                    s_sleep(1);
                    continue;
                }
                Ok(n) => break n,
                Err(_) => {
                    perror("shell: read");
                    return;
                }
            }
        };
        if n == 0 {
            // EOF on stdin is a logout.
            break;
        }
        let line = String::from_utf8_lossy(&buf[..n]).to_string();
        if !execute(line.trim()) {
            break;
        }
    }
}

fn parse(line: &str) -> ParsedLine {
    let mut tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
    let mut background = false;
    if tokens.last().map(String::as_str) == Some("&") {
        tokens.pop();
        background = true;
    }
    let mut argv = Vec::new();
    let mut stdin_file = None;
    let mut stdout_file = None;
    let mut i = 0;
    while i < tokens.len() {
        match tokens[i].as_str() {
            "<" if i + 1 < tokens.len() => {
                stdin_file = Some(tokens[i + 1].clone());
                i += 1;
            }
            ">" | ">>" if i + 1 < tokens.len() => {
                stdout_file = Some((tokens[i + 1].clone(), tokens[i] == ">>"));
                i += 1;
            }
            _ => argv.push(tokens[i].clone()),
        }
        i += 1;
    }
    ParsedLine {
        argv,
        background,
        stdin_file,
        stdout_file,
    }
}

/// Run one command line. Returns false on logout.
fn execute(line: &str) -> bool {
    let parsed = parse(line);
    if parsed.argv.is_empty() {
        return true;
    }
    let cmd = parsed.argv[0].clone();
    match cmd.as_str() {
        "logout" => return false,
        "jobs" => {
            let _ = s_jobs();
        }
        "fg" => {
            let job_id = parsed.argv.get(1).and_then(|a| a.parse().ok()).unwrap_or(-1);
            match s_fg(job_id) {
                Ok(pid) => {
                    let _ = s_waitpid(pid, false);
                }
                Err(_) => perror("fg"),
            }
        }
        "bg" => {
            let job_id = parsed.argv.get(1).and_then(|a| a.parse().ok()).unwrap_or(-1);
            if s_bg(job_id).is_err() {
                perror("bg");
            }
        }
        "nice" => {
            // nice PRIORITY CMD [ARGS...]
            let priority = parsed.argv.get(1).and_then(|a| a.parse::<usize>().ok());
            match priority {
                Some(priority) if priority <= 2 && parsed.argv.len() > 2 => {
                    let rest = ParsedLine {
                        argv: parsed.argv[2..].to_vec(),
                        ..parsed
                    };
                    spawn_command(rest, priority);
                }
                _ => {
                    let _ = s_write(1, b"Usage: nice priority command [args...]\n");
                }
            }
        }
        "nice_pid" => {
            // nice_pid PRIORITY PID
            let priority = parsed.argv.get(1).and_then(|a| a.parse::<i32>().ok());
            let pid = parsed.argv.get(2).and_then(|a| a.parse::<Pid>().ok());
            match (priority, pid) {
                (Some(priority), Some(pid)) => {
                    if s_nice(pid, priority).is_err() {
                        perror("nice_pid");
                    }
                }
                _ => {
                    let _ = s_write(1, b"Usage: nice_pid priority pid\n");
                }
            }
        }
        "man" => {
            let mut listing = String::from("Available commands:\n");
            for name in commands::names() {
                listing.push_str("  ");
                listing.push_str(name);
                listing.push('\n');
            }
            listing.push_str("  nice\n  nice_pid\n  jobs\n  fg\n  bg\n  man\n  logout\n");
            let _ = s_write(1, listing.as_bytes());
        }
        _ => spawn_command(parsed, 1),
    }
    true
}

/// Spawn a registered command, honoring redirection and `&`.
fn spawn_command(parsed: ParsedLine, priority: usize) {
    let Some(func) = commands::lookup(&parsed.argv[0]) else {
        let msg = format!("{}: command not found\n", parsed.argv[0]);
        let _ = s_write(1, msg.as_bytes());
        return;
    };

    // Rewrite our own standard slots before spawning; the child inherits
    // them by value and we restore ours afterwards.
    let mut redirected_in = false;
    let mut redirected_out = false;
    if let Some((file, append)) = &parsed.stdout_file {
        let mode = if *append {
            OpenMode::Append
        } else {
            OpenMode::Write
        };
        match s_open(file, mode) {
            Ok(fd) => {
                let _ = s_dup2(fd, 1);
                let _ = s_close(fd);
                redirected_out = true;
            }
            Err(_) => {
                perror("shell: open");
                return;
            }
        }
    }
    if let Some(file) = &parsed.stdin_file {
        match s_open(file, OpenMode::Read) {
            Ok(fd) => {
                let _ = s_dup2(fd, 0);
                let _ = s_close(fd);
                redirected_in = true;
            }
            Err(_) => {
                perror("shell: open");
                if redirected_out {
                    let _ = s_reset_std(1);
                }
                return;
            }
        }
    }

    let body: ProcessFn = Box::new(move |argv| func(argv));
    match s_spawn(
        body,
        parsed.argv.clone(),
        0,
        1,
        -1,
        priority,
        ProcStatus::Blocked,
        false,
        parsed.background,
    ) {
        Ok(pid) => {
            if !parsed.background {
                let _ = s_waitpid(pid, false);
            }
        }
        Err(_) => perror("s_spawn"),
    }

    if redirected_out {
        let _ = s_reset_std(1);
    }
    if redirected_in {
        let _ = s_reset_std(0);
    }
}
