use crate::syscalls::{perror, s_ls};

/// ls [file]: list one file, or every live directory entry.
pub fn run(argv: &[String]) {
    if s_ls(argv.get(1).map(String::as_str)).is_err() {
        perror("ls");
    }
}
