use crate::kernel::checkpoint;
use crate::kernel::pcb::ProcStatus;
use crate::syscalls::s_spawn;

/// orphanify: spawn a spinning child and exit immediately, orphaning it.
pub fn run(_argv: &[String]) {
    let _ = s_spawn(
        Box::new(|_| loop {
            checkpoint();
        }),
        vec!["orphan_child".to_string()],
        0,
        1,
        -1,
        1,
        ProcStatus::Blocked,
        false,
        false,
    );
}
