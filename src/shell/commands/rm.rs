use crate::syscalls::{perror, s_rm, s_write};

/// rm f1 [f2...]: remove files, each as its own transaction.
pub fn run(argv: &[String]) {
    if argv.len() < 2 {
        let _ = s_write(1, b"Usage: rm file [file...]\n");
        return;
    }
    for name in &argv[1..] {
        if s_rm(name).is_err() {
            perror("rm");
        }
    }
}
