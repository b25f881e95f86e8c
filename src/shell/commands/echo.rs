use crate::syscalls::{perror, s_echo};

/// echo [args...]: print the arguments to stdout.
pub fn run(argv: &[String]) {
    if s_echo(&argv[1..]).is_err() {
        perror("echo");
    }
}
