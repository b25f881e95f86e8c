use crate::syscalls::{s_sleep, s_write};

/// sleep n: block for n seconds (10 ticks per second).
pub fn run(argv: &[String]) {
    let seconds = argv.get(1).and_then(|a| a.parse::<u64>().ok());
    match seconds {
        Some(seconds) => s_sleep(seconds * 10),
        None => {
            let _ = s_write(1, b"Usage: sleep seconds\n");
        }
    }
}
