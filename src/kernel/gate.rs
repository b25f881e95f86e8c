//! Per-process suspension gate.
//!
//! Each process thread owns one gate: a permit plus a condvar. The scheduler
//! opens exactly one gate per dispatch; a thread whose gate is closed parks
//! at its next checkpoint. This is the whole of the "schedulable task"
//! capability: create, suspend, continue, suspend-self.

use std::sync::{Condvar, Mutex};

pub struct Gate {
    permitted: Mutex<bool>,
    resumed: Condvar,
}

impl Gate {
    /// A new gate starts closed; the first dispatch opens it.
    pub fn new() -> Gate {
        Gate {
            permitted: Mutex::new(false),
            resumed: Condvar::new(),
        }
    }

    /// Allow the owning thread to run (scheduler dispatch).
    pub fn open(&self) {
        let mut permitted = self.permitted.lock().unwrap();
        *permitted = true;
        self.resumed.notify_one();
    }

    /// Revoke the permit; the owner parks at its next checkpoint.
    pub fn close(&self) {
        *self.permitted.lock().unwrap() = false;
    }

    /// Park until the permit is granted. Returns immediately when open.
    ///
    /// A thread giving up the CPU must have closed its gate inside the same
    /// kernel critical section that recorded why it is blocked; closing it
    /// here instead would race a dispatch and lose the wake-up.
    pub fn wait(&self) {
        let mut permitted = self.permitted.lock().unwrap();
        while !*permitted {
            permitted = self.resumed.wait(permitted).unwrap();
        }
    }
}

impl Default for Gate {
    fn default() -> Gate {
        Gate::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn wait_returns_once_open() {
        let gate = Arc::new(Gate::new());
        let worker = {
            let gate = gate.clone();
            std::thread::spawn(move || {
                gate.wait();
                42
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        gate.open();
        assert_eq!(worker.join().unwrap(), 42);
    }

    #[test]
    fn open_before_wait_is_not_lost() {
        let gate = Gate::new();
        gate.open();
        // Must not block.
        gate.wait();
    }

    #[test]
    fn close_then_open_parks_and_releases() {
        let gate = Arc::new(Gate::new());
        gate.open();
        gate.close();
        let worker = {
            let gate = gate.clone();
            std::thread::spawn(move || {
                gate.wait();
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        gate.open();
        worker.join().unwrap();
    }

    #[test]
    fn open_after_close_is_not_lost() {
        // close -> open -> wait must not park: the permit is state, not an
        // edge-triggered notification.
        let gate = Gate::new();
        gate.close();
        gate.open();
        gate.wait();
    }
}
