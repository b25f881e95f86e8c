//! The preemptive priority scheduler.
//!
//! A dedicated scheduler thread ticks at a fixed quantum. Each tick wakes
//! due sleepers, revokes the running process's permit, requeues it if still
//! runnable, and dispatches the next process according to a fixed 19-slot
//! weighted round-robin pattern over the three priority levels. Running the
//! tick on a normal thread (rather than in signal context) keeps queue
//! mutation and logging out of signal-safety territory and serialises the
//! background-job notices with ordinary process output.

use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use log::info;
use static_assertions::const_assert_eq;

use crate::events;
use crate::kernel::gate::Gate;
use crate::kernel::pcb::{Pid, ProcStatus};
use crate::kernel::{KERNEL, PROMPT};

/// Dispatch pattern encoding the 9:6:4 ratio across priorities 0, 1, 2.
pub const SCHEDULE_PATTERN: [usize; 19] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, // priority 0 (9x)
    1, 1, 1, 1, 1, 1, // priority 1 (6x)
    2, 2, 2, 2, // priority 2 (4x)
];

const fn occurrences(level: usize) -> usize {
    let mut i = 0;
    let mut count = 0;
    while i < SCHEDULE_PATTERN.len() {
        if SCHEDULE_PATTERN[i] == level {
            count += 1;
        }
        i += 1;
    }
    count
}

const_assert_eq!(occurrences(0), 9);
const_assert_eq!(occurrences(1), 6);
const_assert_eq!(occurrences(2), 4);

pub const DEFAULT_QUANTUM: Duration = Duration::from_millis(100);

pub struct SchedulerHandle {
    shutdown: Sender<()>,
    thread: thread::JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the timer loop and join the scheduler thread.
    pub fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.thread.join();
    }
}

/// Start the timer-driven scheduler.
pub fn start(quantum: Duration) -> SchedulerHandle {
    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    let ticker = tick(quantum);
    let thread = thread::Builder::new()
        .name("scheduler".to_string())
        .spawn(move || loop {
            select! {
                recv(ticker) -> _ => tick_once(),
                recv(shutdown_rx) -> _ => break,
            }
        })
        .expect("scheduler: failed to start timer thread");
    info!("scheduler started with a {} ms quantum", quantum.as_millis());
    SchedulerHandle {
        shutdown: shutdown_tx,
        thread,
    }
}

/// One scheduler quantum: advance the clock, wake sleepers, rotate the
/// running process, dispatch the next one. With every queue empty this
/// leaves no process dispatched (idle) until the next quantum.
pub fn tick_once() {
    let mut suspend: Option<Arc<Gate>> = None;
    let mut resume: Option<Arc<Gate>> = None;
    let mut notices: Vec<String> = Vec::new();
    {
        let mut kernel = KERNEL.lock();
        kernel.current_tick += 1;
        events::tick();

        // Wake every sleeper whose tick has arrived.
        let now = kernel.current_tick;
        let due: Vec<Pid> = kernel
            .sleeping
            .iter()
            .copied()
            .filter(|&pid| {
                kernel
                    .pcb(pid)
                    .map(|p| p.status == ProcStatus::Blocked && p.wake_tick <= now)
                    .unwrap_or(false)
            })
            .collect();
        for pid in due {
            let in_background = kernel.background_jobs.contains(&pid);
            {
                let pcb = kernel.pcb(pid).unwrap();
                if pcb.is_background || in_background {
                    notices.push(format!(
                        "[{}] + Done {}\n{}",
                        pcb.job_id,
                        pcb.argv.join(" "),
                        PROMPT
                    ));
                }
            }
            let pcb = kernel.pcb_mut(pid).unwrap();
            pcb.status = ProcStatus::Running;
            pcb.remaining_sleep_ticks = 0;
            kernel.sleeping.retain(|&p| p != pid);
            kernel.enqueue(pid);
        }

        // End the outgoing quantum; a still-runnable process goes to the
        // tail of its queue.
        if kernel.running_pid != 0 {
            if let Some(pcb) = kernel.pcb(kernel.running_pid) {
                suspend = Some(pcb.gate.clone());
                if pcb.status == ProcStatus::Running {
                    let pid = pcb.pid;
                    kernel.enqueue(pid);
                }
            }
        }

        // Select the next process, trying at most one full pattern cycle.
        let mut next: Option<Pid> = None;
        for _ in 0..SCHEDULE_PATTERN.len() {
            let priority = SCHEDULE_PATTERN[kernel.schedule_index];
            kernel.schedule_index = (kernel.schedule_index + 1) % SCHEDULE_PATTERN.len();
            if let Some(pid) = kernel.dequeue(priority) {
                if kernel.pcb(pid).is_some() {
                    next = Some(pid);
                    break;
                }
            }
        }
        match next {
            Some(pid) => {
                let pcb = kernel.pcb_mut(pid).unwrap();
                pcb.status = ProcStatus::Running;
                let (priority, cmd, gate) = (pcb.priority, pcb.cmd.clone(), pcb.gate.clone());
                kernel.running_pid = pid;
                events::event("SCHEDULE", pid, priority, &cmd);
                resume = Some(gate);
            }
            None => kernel.running_pid = 0,
        }
    }

    // Gate and console traffic stay off the kernel lock.
    if let Some(gate) = suspend {
        gate.close();
    }
    if !notices.is_empty() {
        let mut out = std::io::stdout().lock();
        for notice in notices {
            let _ = out.write_all(notice.as_bytes());
        }
        let _ = out.flush();
    }
    if let Some(gate) = resume {
        gate.open();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_is_one_full_cycle() {
        assert_eq!(SCHEDULE_PATTERN.len(), 19);
        assert!(SCHEDULE_PATTERN.windows(2).all(|w| w[0] <= w[1]));
    }
}
