use crate::kernel::pcb::{Pid, Signal};
use crate::syscalls::{perror, s_kill, s_write};

/// kill [-term|-stop|-cont] pid [pid...]: signal processes (term default).
pub fn run(argv: &[String]) {
    let mut signal = Signal::Term;
    let mut pids: Vec<Pid> = Vec::new();
    for arg in &argv[1..] {
        if let Some(name) = arg.strip_prefix('-') {
            match Signal::from_name(name) {
                Some(parsed) => signal = parsed,
                None => {
                    let _ = s_write(1, b"kill: valid signals are -term, -stop, -cont\n");
                    return;
                }
            }
        } else {
            match arg.parse::<Pid>() {
                Ok(pid) => pids.push(pid),
                Err(_) => {
                    let msg = format!("kill: invalid pid: {}\n", arg);
                    let _ = s_write(1, msg.as_bytes());
                    return;
                }
            }
        }
    }
    if pids.is_empty() {
        let _ = s_write(1, b"Usage: kill [-term|-stop|-cont] pid [pid...]\n");
        return;
    }
    for pid in pids {
        if s_kill(pid, signal).is_err() {
            perror("kill");
        }
    }
}
