use crate::syscalls::{perror, s_mv, s_write};

/// mv src dst: rename a file, overwriting a writable destination.
pub fn run(argv: &[String]) {
    if argv.len() != 3 {
        let _ = s_write(1, b"Usage: mv source dest\n");
        return;
    }
    if s_mv(&argv[1], &argv[2]).is_err() {
        perror("mv");
    }
}
