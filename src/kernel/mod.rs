//! The kernel: PCB registry, process control, signals, and job control.
//!
//! All kernel tables live in one `Kernel` record behind a global lock. The
//! scheduler thread is the only preemption source; process threads mutate
//! the tables from inside system calls and park on their gates at
//! suspension points, so every critical section here is short and no lock
//! is ever held across a park.

pub mod gate;
pub mod pcb;

use std::cell::Cell;
use std::collections::VecDeque;
use std::io::Write;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use lazy_static::lazy_static;
use log::info;
use spin::Mutex;

use crate::errors::{Errno, Result};
use crate::events;
use crate::fs;

use gate::Gate;
use pcb::{Pcb, Pid, ProcStatus, Signal, WaitStatus};

pub const INIT_PID: Pid = 1;
pub const SHELL_PID: Pid = 2;
pub const PROMPT: &str = "penn-os> ";

/// The body of a spawned process.
pub type ProcessFn = Box<dyn FnOnce(&[String]) + Send + 'static>;

/// Panic payload unwound through the thread wrapper by `s_exit`.
pub struct ProcessExit;

thread_local! {
    static CURRENT: Cell<Pid> = Cell::new(0);
}

/// Pid of the process owning the calling thread (0 for host threads).
pub fn current_pid() -> Pid {
    CURRENT.with(|c| c.get())
}

/// One row of a `ps` listing.
#[derive(Debug, Clone)]
pub struct ProcSnapshot {
    pub pid: Pid,
    pub ppid: Pid,
    pub job_id: i32,
    pub priority: usize,
    pub status: ProcStatus,
    pub cmd: String,
}

/// One row of a `jobs` listing.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub job_id: i32,
    pub pid: Pid,
    pub argv: Vec<String>,
    pub status: ProcStatus,
}

pub struct Kernel {
    pub pcbs: Vec<Pcb>,
    pub queues: [VecDeque<Pid>; 3],
    pub sleeping: Vec<Pid>,
    pub job_list: Vec<Pid>,
    pub background_jobs: Vec<Pid>,
    pub stopped_jobs: Vec<Pid>,
    pub job_counter: i32,
    pub next_pid: Pid,
    pub current_tick: u64,
    pub running_pid: Pid,
    pub schedule_index: usize,
}

lazy_static! {
    pub static ref KERNEL: Mutex<Kernel> = Mutex::new(Kernel::new());
}

impl Kernel {
    fn new() -> Kernel {
        Kernel {
            pcbs: Vec::new(),
            queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            sleeping: Vec::new(),
            job_list: Vec::new(),
            background_jobs: Vec::new(),
            stopped_jobs: Vec::new(),
            // Ids 1 and 2 are notionally init and the shell.
            job_counter: 2,
            next_pid: 1,
            current_tick: 0,
            running_pid: 0,
            schedule_index: 0,
        }
    }

    pub fn pcb(&self, pid: Pid) -> Option<&Pcb> {
        self.pcbs.iter().find(|p| p.pid == pid)
    }

    pub fn pcb_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        self.pcbs.iter_mut().find(|p| p.pid == pid)
    }

    fn alloc_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    /// Admit to the tail of the priority queue. A pid is never queued twice.
    pub fn enqueue(&mut self, pid: Pid) {
        let priority = match self.pcb(pid) {
            Some(p) => p.priority,
            None => return,
        };
        if !self.queues[priority].contains(&pid) {
            self.queues[priority].push_back(pid);
        }
    }

    pub fn dequeue(&mut self, priority: usize) -> Option<Pid> {
        self.queues[priority].pop_front()
    }

    /// Remove a specific pid from a queue; true when it was present.
    pub fn remove_from_queue(&mut self, pid: Pid, priority: usize) -> bool {
        let queue = &mut self.queues[priority];
        let before = queue.len();
        queue.retain(|&p| p != pid);
        queue.len() != before
    }

    pub fn all_queues_empty(&self) -> bool {
        self.queues.iter().all(|q| q.is_empty())
    }

    fn remove_sleeping(&mut self, pid: Pid) {
        self.sleeping.retain(|&p| p != pid);
    }

    /// Build a PCB under the caller's identity and register it everywhere
    /// it belongs. The host thread is attached by `spawn`.
    fn proc_create(
        &mut self,
        parent_pid: Pid,
        argv: Vec<String>,
        priority: usize,
        status: ProcStatus,
        is_background: bool,
        gate: Arc<Gate>,
    ) -> Pid {
        let pid = self.alloc_pid();
        let (parent_job, parent_is_shell, fd_table) = {
            let parent = self.pcb(parent_pid).expect("proc_create: parent vanished");
            (parent.job_id, parent.pid == SHELL_PID, parent.fd_table)
        };
        let job_id = if parent_is_shell {
            self.job_counter += 1;
            self.job_counter
        } else {
            parent_job
        };
        let cmd = argv.first().cloned().unwrap_or_default();
        // The child's table shares the parent's global slots.
        for entry in fd_table.iter().flatten() {
            fs::retain_fd(entry.global_fd);
        }
        events::event("CREATE", pid, priority, &cmd);
        let pcb = Pcb {
            pid,
            ppid: parent_pid,
            job_id,
            priority,
            status,
            cmd,
            argv,
            children: Vec::new(),
            waited_by: 0,
            wake_tick: 0,
            remaining_sleep_ticks: 0,
            is_background,
            fd_table,
            gate,
            join: None,
        };
        if parent_is_shell {
            self.job_list.push(pid);
        }
        self.pcbs.push(pcb);
        pid
    }

    /// Hand a dying process's children to init and wake the reaper.
    fn reparent_children(&mut self, dying: Pid) {
        let children = match self.pcb(dying) {
            Some(p) => p.children.clone(),
            None => return,
        };
        for child in children {
            let (priority, cmd) = match self.pcb_mut(child) {
                Some(c) => {
                    c.ppid = INIT_PID;
                    c.waited_by = INIT_PID;
                    (c.priority, c.cmd.clone())
                }
                None => continue,
            };
            events::event("ORPHAN", child, priority, &cmd);
            if let Some(init) = self.pcb_mut(INIT_PID) {
                init.children.push(child);
            }
            self.enqueue(INIT_PID);
        }
        if let Some(p) = self.pcb_mut(dying) {
            p.children.clear();
        }
    }

    /// Destroy a reaped PCB: drop it from every table and give back its
    /// descriptor references.
    fn cleanup(&mut self, pid: Pid) {
        self.job_list.retain(|&p| p != pid);
        self.background_jobs.retain(|&p| p != pid);
        self.stopped_jobs.retain(|&p| p != pid);
        self.remove_sleeping(pid);
        if let Some(p) = self.pcb(pid) {
            for entry in p.fd_table.iter().flatten() {
                fs::release_fd(entry.global_fd);
            }
        }
        self.pcbs.retain(|p| p.pid != pid);
    }

    pub fn ps_snapshot(&self) -> Vec<ProcSnapshot> {
        self.pcbs
            .iter()
            .map(|p| ProcSnapshot {
                pid: p.pid,
                ppid: p.ppid,
                job_id: p.job_id,
                priority: p.priority,
                status: p.status,
                cmd: p.cmd.clone(),
            })
            .collect()
    }

    pub fn jobs_snapshot(&self) -> Vec<JobSnapshot> {
        self.job_list
            .iter()
            .filter_map(|&pid| self.pcb(pid))
            .filter(|p| p.status != ProcStatus::Zombied)
            .map(|p| JobSnapshot {
                job_id: p.job_id,
                pid: p.pid,
                argv: p.argv.clone(),
                status: p.status,
            })
            .collect()
    }
}

/// Reset every kernel table and start the init process (pid 1), whose
/// thread runs the zombie reaper loop.
pub fn init_kernel() {
    let gate = Arc::new(Gate::new());
    {
        let mut kernel = KERNEL.lock();
        *kernel = Kernel::new();
        let pcb = Pcb {
            pid: INIT_PID,
            ppid: 0,
            job_id: 0,
            priority: 0,
            status: ProcStatus::Blocked,
            cmd: "init".to_string(),
            argv: vec!["init".to_string()],
            children: Vec::new(),
            waited_by: 0,
            wake_tick: 0,
            remaining_sleep_ticks: 0,
            is_background: false,
            fd_table: fs::fd::std_fd_table(),
            gate: gate.clone(),
            join: None,
        };
        for entry in pcb.fd_table.iter().flatten() {
            fs::retain_fd(entry.global_fd);
        }
        kernel.next_pid = 2;
        kernel.pcbs.push(pcb);
        kernel.enqueue(INIT_PID);
    }
    let handle = thread::Builder::new()
        .name("init".to_string())
        .spawn(move || {
            CURRENT.with(|c| c.set(INIT_PID));
            gate.wait();
            reap_zombies_init();
        })
        .expect("init_kernel: failed to start init thread");
    if let Some(init) = KERNEL.lock().pcb_mut(INIT_PID) {
        init.join = Some(handle);
    }
    info!("kernel initialized, init is pid {}", INIT_PID);
}

/// Cooperative scheduling point: parks when this process's quantum has been
/// revoked, returns immediately otherwise.
pub fn checkpoint() {
    let pid = current_pid();
    if pid == 0 {
        return;
    }
    let gate = {
        let kernel = KERNEL.lock();
        match kernel.pcb(pid) {
            Some(p) => p.gate.clone(),
            None => return,
        }
    };
    gate.wait();
}

/// Create a child process running `func(argv)` on its own host thread.
///
/// The child inherits a by-value copy of the parent's descriptor table with
/// `fd0`/`fd1` installed as its slots 0 and 1. `parent` names the parent
/// explicitly in init mode (bootstrap); otherwise the caller is the parent.
#[allow(clippy::too_many_arguments)]
pub fn spawn(
    func: ProcessFn,
    argv: Vec<String>,
    fd0: usize,
    fd1: usize,
    parent: Pid,
    priority: usize,
    initial_status: ProcStatus,
    is_init: bool,
    is_background: bool,
) -> Result<Pid> {
    if priority > 2 {
        return Err(Errno::InvalidPriority);
    }
    let parent_pid = if is_init { parent } else { current_pid() };
    let gate = Arc::new(Gate::new());

    let (child, job_id) = {
        let mut kernel = KERNEL.lock();
        if kernel.pcb(parent_pid).is_none() {
            return Err(Errno::NoParent);
        }
        let child = kernel.proc_create(
            parent_pid,
            argv.clone(),
            priority,
            initial_status,
            is_background,
            gate.clone(),
        );
        redirect_std_slots(&mut kernel, parent_pid, child, fd0, fd1);
        if let Some(parent_pcb) = kernel.pcb_mut(parent_pid) {
            parent_pcb.children.push(child);
        }
        kernel.enqueue(child);
        if is_background {
            kernel.background_jobs.push(child);
        }
        let job_id = kernel.pcb(child).map(|p| p.job_id).unwrap_or(0);
        (child, job_id)
    };

    if is_background {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "[{}] {}", job_id, child);
        let _ = out.flush();
    }

    let thread_gate = gate.clone();
    let handle = thread::Builder::new()
        .name(format!("pennos-{}", child))
        .spawn(move || process_main(child, thread_gate, func, argv))
        .expect("spawn: failed to start process thread");
    if let Some(pcb) = KERNEL.lock().pcb_mut(child) {
        pcb.join = Some(handle);
    }
    Ok(child)
}

/// Install the parent's `fd0`/`fd1` as the child's standard slots.
fn redirect_std_slots(kernel: &mut Kernel, parent: Pid, child: Pid, fd0: usize, fd1: usize) {
    for (slot, fd) in [(0usize, fd0), (1usize, fd1)] {
        if slot == fd {
            continue;
        }
        let inherited = kernel
            .pcb(parent)
            .and_then(|p| p.fd_table.get(fd).copied().flatten());
        let Some(entry) = inherited else { continue };
        if let Some(child_pcb) = kernel.pcb_mut(child) {
            if let Some(old) = child_pcb.fd_table[slot].take() {
                fs::release_fd(old.global_fd);
            }
            child_pcb.fd_table[slot] = Some(entry);
            fs::retain_fd(entry.global_fd);
        }
    }
}

/// Thread wrapper: wait for the first dispatch, run the process body, then
/// take the kernel exit path. An `s_exit` unwind stops at this frame.
fn process_main(pid: Pid, gate: Arc<Gate>, func: ProcessFn, argv: Vec<String>) {
    CURRENT.with(|c| c.set(pid));
    gate.wait();
    let result = catch_unwind(AssertUnwindSafe(|| func(&argv)));
    exit_current();
    if let Err(payload) = result {
        if !payload.is::<ProcessExit>() {
            resume_unwind(payload);
        }
    }
}

/// Transition the calling process to ZOMBIED and wake a blocked waiter.
/// The PCB persists until the parent reaps it.
pub fn exit_current() {
    let pid = current_pid();
    if pid == 0 {
        return;
    }
    let mut kernel = KERNEL.lock();
    let Some(pcb) = kernel.pcb_mut(pid) else { return };
    if pcb.status == ProcStatus::Zombied {
        // Already zombified by a TERM/QUIT delivered mid-run.
        return;
    }
    pcb.status = ProcStatus::Zombied;
    let (priority, cmd, waited_by) = (pcb.priority, pcb.cmd.clone(), pcb.waited_by);
    events::event("ZOMBIE", pid, priority, &cmd);
    kernel.remove_from_queue(pid, priority);
    kernel.remove_sleeping(pid);
    if waited_by != 0 {
        let blocked = kernel
            .pcb(waited_by)
            .map(|p| p.status == ProcStatus::Blocked)
            .unwrap_or(false);
        if blocked {
            kernel.enqueue(waited_by);
        }
    }
}

/// Wait for a child to change state.
///
/// `pid` of -1 matches any child. With `nohang`, `Ok(None)` means no child
/// has changed state. A reaped zombie is detached, its own children are
/// reparented to init, and its PCB is destroyed.
pub fn waitpid(
    pid: Pid,
    nohang: bool,
    is_init: bool,
    explicit_ppid: Pid,
) -> Result<Option<(Pid, WaitStatus)>> {
    let parent_pid = if explicit_ppid > 0 {
        explicit_ppid
    } else {
        current_pid()
    };
    loop {
        let gate = {
            let mut kernel = KERNEL.lock();
            if kernel.pcb(parent_pid).is_none() {
                return Err(Errno::NoParent);
            }
            let children = kernel.pcb(parent_pid).unwrap().children.clone();
            if children.is_empty() {
                return Err(Errno::NoChildren);
            }
            for child in &children {
                let Some(c) = kernel.pcb(*child) else { continue };
                if pid != -1 && c.pid != pid {
                    continue;
                }
                match c.status {
                    ProcStatus::Zombied => {
                        let (cpid, cpriority, ccmd) = (c.pid, c.priority, c.cmd.clone());
                        kernel.reparent_children(cpid);
                        let event = if is_init { "WAITED (init)" } else { "WAITED" };
                        events::event(event, cpid, cpriority, &ccmd);
                        if let Some(parent) = kernel.pcb_mut(parent_pid) {
                            parent.children.retain(|&p| p != cpid);
                        }
                        kernel.cleanup(cpid);
                        return Ok(Some((cpid, WaitStatus::exited())));
                    }
                    ProcStatus::Stopped => {
                        events::event("STOPPED", c.pid, c.priority, &c.cmd);
                        return Ok(Some((c.pid, WaitStatus::stopped())));
                    }
                    _ => {}
                }
            }
            if nohang {
                return Ok(None);
            }
            // Block until one of the children changes state. The gate must
            // close while the lock is held or a racing dispatch is lost.
            for child in &children {
                if let Some(c) = kernel.pcb_mut(*child) {
                    c.waited_by = parent_pid;
                }
            }
            let parent = kernel.pcb_mut(parent_pid).unwrap();
            parent.status = ProcStatus::Blocked;
            let gate = parent.gate.clone();
            gate.close();
            gate
        };
        gate.wait();
    }
}

/// Deliver a signal.
pub fn kill(pid: Pid, signal: Signal) -> Result<()> {
    let mut park_self = None;
    {
        let mut kernel = KERNEL.lock();
        let Some(target) = kernel.pcb(pid) else {
            return Err(Errno::NoSuchProcess);
        };
        let (priority, cmd, ppid) = (target.priority, target.cmd.clone(), target.ppid);
        events::event("SIGNALED", pid, priority, &cmd);
        match signal {
            Signal::Exit => return Err(Errno::InvalidSignal),
            Signal::Stop => {
                kernel.pcb_mut(pid).unwrap().status = ProcStatus::Stopped;
                events::event("STOPPED", pid, priority, &cmd);
                kernel.remove_from_queue(pid, priority);
                if kernel.sleeping.contains(&pid) {
                    // Pause the sleep timer; CONT resumes the remainder.
                    let tick = kernel.current_tick;
                    let target = kernel.pcb_mut(pid).unwrap();
                    target.remaining_sleep_ticks = target.wake_tick.saturating_sub(tick);
                    kernel.remove_sleeping(pid);
                }
                if !kernel.stopped_jobs.contains(&pid) {
                    kernel.stopped_jobs.push(pid);
                }
            }
            Signal::Cont => {
                let remaining = kernel.pcb(pid).unwrap().remaining_sleep_ticks;
                if remaining > 0 {
                    let tick = kernel.current_tick;
                    let target = kernel.pcb_mut(pid).unwrap();
                    target.status = ProcStatus::Blocked;
                    target.wake_tick = tick + remaining;
                    target.remaining_sleep_ticks = 0;
                    if !kernel.sleeping.contains(&pid) {
                        kernel.sleeping.push(pid);
                    }
                    kernel.remove_from_queue(pid, priority);
                } else {
                    kernel.pcb_mut(pid).unwrap().status = ProcStatus::Running;
                    kernel.enqueue(pid);
                }
                events::event("CONTINUED", pid, priority, &cmd);
            }
            Signal::Term | Signal::Quit => {
                let target = kernel.pcb_mut(pid).unwrap();
                target.status = ProcStatus::Zombied;
                let waited_by = target.waited_by;
                let event = if signal == Signal::Quit {
                    "QUIT (core dumped)"
                } else {
                    "ZOMBIE"
                };
                events::event(event, pid, priority, &cmd);
                kernel.remove_from_queue(pid, priority);
                kernel.remove_sleeping(pid);
                if waited_by != 0 {
                    if let Some(waiter) = kernel.pcb_mut(waited_by) {
                        waiter.status = ProcStatus::Running;
                    }
                    kernel.enqueue(waited_by);
                }
                if pid == current_pid() {
                    let gate = kernel.pcb(pid).unwrap().gate.clone();
                    gate.close();
                    park_self = Some(gate);
                }
            }
        }
        // A blocked parent is re-admitted after any delivered signal.
        let parent_blocked = kernel
            .pcb(ppid)
            .map(|p| p.status == ProcStatus::Blocked)
            .unwrap_or(false);
        if parent_blocked {
            kernel.remove_sleeping(ppid);
            kernel.pcb_mut(ppid).unwrap().status = ProcStatus::Running;
            kernel.enqueue(ppid);
        }
    }
    if let Some(gate) = park_self {
        // Self-termination: this thread never runs again.
        gate.wait();
    }
    Ok(())
}

/// Move a process to a new priority level.
pub fn nice(pid: Pid, priority: usize) -> Result<()> {
    if priority > 2 {
        return Err(Errno::InvalidPriority);
    }
    let mut kernel = KERNEL.lock();
    let Some(target) = kernel.pcb(pid) else {
        return Err(Errno::NoSuchProcess);
    };
    let old = target.priority;
    let was_queued = kernel.remove_from_queue(pid, old);
    kernel.pcb_mut(pid).unwrap().priority = priority;
    if was_queued {
        kernel.enqueue(pid);
    }
    Ok(())
}

/// Block the caller for `ticks` scheduler quanta. 0 is a no-op.
pub fn sleep(ticks: u64) {
    if ticks == 0 {
        return;
    }
    let pid = current_pid();
    if pid == 0 {
        return;
    }
    let gate = {
        let mut kernel = KERNEL.lock();
        let tick = kernel.current_tick;
        let Some(target) = kernel.pcb(pid) else { return };
        let priority = target.priority;
        kernel.remove_from_queue(pid, priority);
        let target = kernel.pcb_mut(pid).unwrap();
        target.status = ProcStatus::Blocked;
        target.wake_tick = tick + ticks;
        target.remaining_sleep_ticks = ticks;
        let gate = target.gate.clone();
        gate.close();
        if !kernel.sleeping.contains(&pid) {
            kernel.sleeping.push(pid);
        }
        gate
    };
    gate.wait();
}

/// Shell-side sweep: reap every zombied child of the shell, non-blocking.
pub fn reap_zombies() {
    let zombies: Vec<Pid> = {
        let kernel = KERNEL.lock();
        match kernel.pcb(SHELL_PID) {
            Some(shell) => shell
                .children
                .iter()
                .copied()
                .filter(|&c| {
                    kernel
                        .pcb(c)
                        .map(|p| p.status == ProcStatus::Zombied)
                        .unwrap_or(false)
                })
                .collect(),
            None => return,
        }
    };
    for pid in zombies {
        let _ = waitpid(pid, true, false, -1);
    }
}

/// Init's process body: drain reapable children, then drop off the run
/// queue and park until a zombie is reparented over.
fn reap_zombies_init() {
    loop {
        if let Some(init) = KERNEL.lock().pcb_mut(INIT_PID) {
            init.status = ProcStatus::Blocked;
        }
        match waitpid(-1, true, true, INIT_PID) {
            Ok(Some(_)) => continue,
            _ => {
                let gate = {
                    let mut kernel = KERNEL.lock();
                    let priority = kernel.pcb(INIT_PID).map(|p| p.priority).unwrap_or(0);
                    kernel.remove_from_queue(INIT_PID, priority);
                    let gate = kernel.pcb(INIT_PID).unwrap().gate.clone();
                    gate.close();
                    gate
                };
                gate.wait();
            }
        }
    }
}

/// Pick the job for `fg`, detach it from the job lists, and continue it.
/// Returns the pid for the caller to wait on.
pub fn fg(job_id: i32) -> Result<Pid> {
    let target = {
        let mut kernel = KERNEL.lock();
        let target = if job_id != -1 {
            kernel
                .pcbs
                .iter()
                .find(|p| {
                    p.job_id == job_id
                        && matches!(p.status, ProcStatus::Running | ProcStatus::Stopped)
                })
                .map(|p| p.pid)
        } else {
            kernel
                .stopped_jobs
                .last()
                .copied()
                .or_else(|| kernel.background_jobs.last().copied())
        };
        let Some(target) = target else {
            return Err(Errno::NoSuchProcess);
        };
        kernel.stopped_jobs.retain(|&p| p != target);
        kernel.background_jobs.retain(|&p| p != target);
        target
    };
    kill(target, Signal::Cont)?;
    Ok(target)
}

/// Resume a stopped job in the background.
pub fn bg(job_id: i32) -> Result<Pid> {
    let target = {
        let mut kernel = KERNEL.lock();
        let target = if job_id != -1 {
            kernel
                .pcbs
                .iter()
                .find(|p| {
                    p.job_id == job_id
                        && matches!(p.status, ProcStatus::Running | ProcStatus::Stopped)
                })
                .map(|p| p.pid)
        } else {
            kernel.stopped_jobs.last().copied()
        };
        let Some(target) = target else {
            return Err(Errno::NoSuchProcess);
        };
        kernel.stopped_jobs.retain(|&p| p != target);
        if !kernel.background_jobs.contains(&target) {
            kernel.background_jobs.push(target);
        }
        target
    };
    kill(target, Signal::Cont)?;
    Ok(target)
}

/// Detach the host thread handle for a process (used to join the shell).
pub fn take_join_handle(pid: Pid) -> Option<JoinHandle<()>> {
    KERNEL.lock().pcb_mut(pid).and_then(|p| p.join.take())
}
