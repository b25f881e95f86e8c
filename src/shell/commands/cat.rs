use crate::syscalls::{perror, s_cat};

/// cat [files...] [-w|-a out]: concatenate files or stdin.
pub fn run(argv: &[String]) {
    if s_cat(argv).is_err() {
        perror("cat");
    }
}
