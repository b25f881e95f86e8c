//! Process control blocks.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::fs::fd::FdTable;

use super::gate::Gate;

/// Process identifier. 1 is init, 2 is the shell; -1 is the "any child"
/// wildcard accepted by `waitpid`.
pub type Pid = i32;

/// Process life-cycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcStatus {
    Running,
    Stopped,
    Blocked,
    Zombied,
}

impl ProcStatus {
    pub fn letter(self) -> char {
        match self {
            ProcStatus::Running => 'R',
            ProcStatus::Stopped => 'S',
            ProcStatus::Blocked => 'B',
            ProcStatus::Zombied => 'Z',
        }
    }
}

/// The kernel signal set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Stop,
    Cont,
    Term,
    Exit,
    Quit,
}

impl Signal {
    /// Parse the `-xxx` names accepted by the kill command.
    pub fn from_name(name: &str) -> Option<Signal> {
        match name {
            "stop" => Some(Signal::Stop),
            "cont" => Some(Signal::Cont),
            "term" => Some(Signal::Term),
            _ => None,
        }
    }
}

const STATUS_STOPPED: i32 = 1;
const STATUS_SIGNALED: i32 = 3;
const STATUS_EXITED: i32 = 4;

/// Status word delivered by `waitpid`, probed with `wif_*` predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitStatus(i32);

impl WaitStatus {
    pub fn exited() -> WaitStatus {
        WaitStatus(STATUS_EXITED)
    }

    pub fn stopped() -> WaitStatus {
        WaitStatus(STATUS_STOPPED)
    }

    pub fn signaled() -> WaitStatus {
        WaitStatus(STATUS_SIGNALED)
    }

    pub fn wif_exited(self) -> bool {
        self.0 == STATUS_EXITED
    }

    pub fn wif_stopped(self) -> bool {
        self.0 == STATUS_STOPPED
    }

    pub fn wif_signaled(self) -> bool {
        self.0 == STATUS_SIGNALED
    }
}

/// One process: identity, topology, scheduling state, and its host thread.
///
/// Parent/child and waiter links are pid values resolved through the kernel's
/// flat PCB list; the PCB owns no references to other PCBs.
pub struct Pcb {
    pub pid: Pid,
    pub ppid: Pid,
    /// Non-zero only for direct children of the shell.
    pub job_id: i32,
    pub priority: usize,
    pub status: ProcStatus,
    pub cmd: String,
    pub argv: Vec<String>,
    pub children: Vec<Pid>,
    /// Pid of the parent currently blocked on this child, or 0.
    pub waited_by: Pid,
    pub wake_tick: u64,
    pub remaining_sleep_ticks: u64,
    pub is_background: bool,
    pub fd_table: FdTable,
    pub gate: Arc<Gate>,
    pub join: Option<JoinHandle<()>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_status_predicates_are_disjoint() {
        assert!(WaitStatus::exited().wif_exited());
        assert!(!WaitStatus::exited().wif_stopped());
        assert!(WaitStatus::stopped().wif_stopped());
        assert!(!WaitStatus::stopped().wif_signaled());
        assert!(WaitStatus::signaled().wif_signaled());
    }

    #[test]
    fn signal_names() {
        assert_eq!(Signal::from_name("term"), Some(Signal::Term));
        assert_eq!(Signal::from_name("stop"), Some(Signal::Stop));
        assert_eq!(Signal::from_name("cont"), Some(Signal::Cont));
        assert_eq!(Signal::from_name("hup"), None);
    }
}
