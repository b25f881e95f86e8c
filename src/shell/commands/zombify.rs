use crate::kernel::checkpoint;
use crate::kernel::pcb::ProcStatus;
use crate::syscalls::s_spawn;

/// zombify: spawn a child that exits at once, then never reap it.
pub fn run(_argv: &[String]) {
    let _ = s_spawn(
        Box::new(|_| {}),
        vec!["zombie_child".to_string()],
        0,
        1,
        -1,
        1,
        ProcStatus::Blocked,
        false,
        false,
    );
    loop {
        checkpoint();
    }
}
