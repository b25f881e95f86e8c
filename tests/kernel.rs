//! Whole-system scenarios: each test formats an image, boots the kernel
//! with a fast clock, runs its scenario as the shell process (pid 2), and
//! inspects kernel state and the event log. Boots share global kernel
//! state, so they are serialised.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pennos::fs::fd::OpenMode;
use pennos::fs::FatFs;
use pennos::kernel::pcb::{Pid, ProcStatus, Signal};
use pennos::kernel::{checkpoint, KERNEL};
use pennos::syscalls::{
    s_close, s_dup2, s_kill, s_nice, s_open, s_read, s_reap_zombies, s_reset_std, s_sleep,
    s_spawn, s_waitpid, s_write,
};
use pennos::{BootConfig, Errno};

static BOOT_LOCK: Mutex<()> = Mutex::new(());
static COUNTER: AtomicU32 = AtomicU32::new(0);

const TEST_QUANTUM: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
struct Event {
    tick: u64,
    event: String,
    pid: Pid,
}

fn parse_log(path: &Path) -> Vec<Event> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let tick = parts
                .next()?
                .trim_start_matches('[')
                .trim_end_matches(']')
                .parse()
                .ok()?;
            let event = parts.next()?.to_string();
            let pid = parts.next()?.parse().ok()?;
            Some(Event { tick, event, pid })
        })
        .collect()
}

fn temp_path(tag: &str, ext: &str) -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!(
        "pennos-{}-{}-{}.{}",
        tag,
        std::process::id(),
        n,
        ext
    ))
}

/// Boot, run `body` as the shell, tear down, and return the event log.
fn run_os<F>(tag: &str, body: F) -> Vec<Event>
where
    F: FnOnce() + Send + 'static,
{
    let guard = match BOOT_LOCK.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let image = temp_path(tag, "img");
    let logfile = temp_path(tag, "log");
    FatFs::mkfs(&image, 1, 0).unwrap();
    let config = BootConfig {
        image: image.clone(),
        logfile: logfile.clone(),
        quantum: TEST_QUANTUM,
    };
    pennos::boot(&config, move |_argv| body()).unwrap();
    drop(guard);
    let events = parse_log(&logfile);
    let _ = std::fs::remove_file(&image);
    let _ = std::fs::remove_file(&logfile);
    events
}

fn spawn_proc<F>(name: &str, priority: usize, body: F) -> Pid
where
    F: FnOnce() + Send + 'static,
{
    s_spawn(
        Box::new(move |_argv| body()),
        vec![name.to_string()],
        0,
        1,
        -1,
        priority,
        ProcStatus::Blocked,
        false,
        false,
    )
    .unwrap()
}

#[test]
fn sleeping_child_wakes_and_is_reaped() {
    let events = run_os("sleep", || {
        let pid = spawn_proc("sleeper", 1, || s_sleep(5));
        let (reaped, status) = s_waitpid(pid, false).unwrap().unwrap();
        assert_eq!(reaped, pid);
        assert!(status.wif_exited());
    });
    let create = events
        .iter()
        .find(|e| e.event == "CREATE" && e.pid == 3)
        .expect("no CREATE for the sleeper");
    let zombie = events
        .iter()
        .find(|e| e.event == "ZOMBIE" && e.pid == 3)
        .expect("no ZOMBIE for the sleeper");
    assert!(zombie.tick >= create.tick + 5);
    assert!(events.iter().any(|e| e.event == "WAITED" && e.pid == 3));
}

#[test]
fn orphans_are_reparented_and_reaped_by_init() {
    let events = run_os("orphan", || {
        let a = spawn_proc("parent_a", 1, || {
            let _ = s_spawn(
                Box::new(|_| s_sleep(500)),
                vec!["child_b".to_string()],
                0,
                1,
                -1,
                1,
                ProcStatus::Blocked,
                false,
                false,
            );
            s_sleep(500);
        });
        s_sleep(4);
        let b = {
            let kernel = KERNEL.lock();
            kernel
                .ps_snapshot()
                .iter()
                .find(|p| p.cmd == "child_b")
                .map(|p| p.pid)
                .expect("child_b was not spawned")
        };

        s_kill(a, Signal::Term).unwrap();
        let (reaped, _) = s_waitpid(a, false).unwrap().unwrap();
        assert_eq!(reaped, a);
        {
            let kernel = KERNEL.lock();
            let snapshot = kernel.ps_snapshot();
            let row = snapshot.iter().find(|p| p.pid == b).unwrap();
            assert_eq!(row.ppid, 1);
        }

        s_kill(b, Signal::Term).unwrap();
        s_sleep(5);
        {
            let kernel = KERNEL.lock();
            assert!(kernel.ps_snapshot().iter().all(|p| p.pid != b));
        }
    });
    assert!(events.iter().any(|e| e.event == "ZOMBIE" && e.pid == 3));
    let orphaned: Vec<_> = events
        .iter()
        .filter(|e| e.event == "ORPHAN" && e.pid == 4)
        .collect();
    assert_eq!(orphaned.len(), 1);
    let init_reaps: Vec<_> = events
        .iter()
        .filter(|e| e.event == "WAITED (init)" && e.pid == 4)
        .collect();
    assert_eq!(init_reaps.len(), 1);
}

#[test]
fn background_job_disappears_after_done() {
    run_os("bg", || {
        let pid = s_spawn(
            Box::new(|_| s_sleep(3)),
            vec!["sleep".to_string(), "1".to_string()],
            0,
            1,
            -1,
            1,
            ProcStatus::Blocked,
            false,
            true,
        )
        .unwrap();
        {
            let kernel = KERNEL.lock();
            let jobs = kernel.jobs_snapshot();
            assert_eq!(jobs.len(), 1);
            assert_eq!(jobs[0].pid, pid);
            assert!(jobs[0].job_id >= 3);
            assert!(kernel.background_jobs.contains(&pid));
        }
        s_sleep(10);
        s_reap_zombies();
        {
            let kernel = KERNEL.lock();
            assert!(kernel.jobs_snapshot().is_empty());
            assert!(!kernel.background_jobs.contains(&pid));
        }
    });
}

#[test]
fn weighted_round_robin_dispatches_9_6_4() {
    let events = run_os("fair", || {
        let stop = Arc::new(AtomicBool::new(false));
        let spawn_busy = |name: &str, priority: usize| {
            let stop = stop.clone();
            s_spawn(
                Box::new(move |_| {
                    while !stop.load(Ordering::Relaxed) {
                        checkpoint();
                    }
                }),
                vec![name.to_string()],
                0,
                1,
                -1,
                priority,
                ProcStatus::Blocked,
                false,
                false,
            )
            .unwrap()
        };
        let p0 = spawn_busy("busy0", 0);
        let p1 = spawn_busy("busy1", 1);
        let p2 = spawn_busy("busy2", 2);
        s_sleep(30);
        stop.store(true, Ordering::Relaxed);
        for pid in [p0, p1, p2] {
            let _ = s_waitpid(pid, false).unwrap();
        }
    });

    // Busy processes got pids 3, 4, 5 at priorities 0, 1, 2. Inside any
    // window of 19 consecutive dispatches where only they are runnable the
    // ratio is exactly 9:6:4.
    let schedules: Vec<&Event> = events.iter().filter(|e| e.event == "SCHEDULE").collect();
    let busy = [3, 4, 5];
    let mut window: Option<&[&Event]> = None;
    let mut run_start = 0;
    for i in 0..=schedules.len() {
        let inside = i < schedules.len() && busy.contains(&schedules[i].pid);
        if !inside {
            if i - run_start >= 19 {
                window = Some(&schedules[run_start..run_start + 19]);
                break;
            }
            run_start = i + 1;
        }
    }
    let window = window.expect("no 19-quantum window with all three busy processes");
    let count = |pid: Pid| window.iter().filter(|e| e.pid == pid).count();
    assert_eq!(count(3), 9);
    assert_eq!(count(4), 6);
    assert_eq!(count(5), 4);
}

#[test]
fn stop_preserves_remaining_sleep_for_cont() {
    run_os("stopcont", || {
        let pid = spawn_proc("napper", 1, || s_sleep(20));
        s_sleep(3);
        s_kill(pid, Signal::Stop).unwrap();
        {
            let kernel = KERNEL.lock();
            let pcb = kernel.pcb(pid).unwrap();
            assert_eq!(pcb.status, ProcStatus::Stopped);
            assert!(pcb.remaining_sleep_ticks > 0 && pcb.remaining_sleep_ticks <= 20);
            assert!(kernel.stopped_jobs.contains(&pid));
            assert!(!kernel.sleeping.contains(&pid));
        }
        s_sleep(10);
        s_kill(pid, Signal::Cont).unwrap();
        {
            let kernel = KERNEL.lock();
            let pcb = kernel.pcb(pid).unwrap();
            assert_eq!(pcb.status, ProcStatus::Blocked);
            assert!(kernel.sleeping.contains(&pid));
        }
        let (_, status) = s_waitpid(pid, false).unwrap().unwrap();
        assert!(status.wif_exited());
    });
}

#[test]
fn waitpid_reports_missing_children() {
    run_os("waiterr", || {
        assert_eq!(s_waitpid(-1, false).unwrap_err(), Errno::NoChildren);
        let pid = spawn_proc("quick", 1, || s_sleep(8));
        assert_eq!(s_waitpid(-1, true).unwrap(), None);
        let (reaped, status) = s_waitpid(-1, false).unwrap().unwrap();
        assert_eq!(reaped, pid);
        assert!(status.wif_exited());
        assert_eq!(s_waitpid(-1, false).unwrap_err(), Errno::NoChildren);
        assert_eq!(s_kill(9999, Signal::Term).unwrap_err(), Errno::NoSuchProcess);
        assert_eq!(s_kill(2, Signal::Exit).unwrap_err(), Errno::InvalidSignal);
    });
}

#[test]
fn nice_moves_processes_between_priorities() {
    run_os("nice", || {
        let pid = spawn_proc("napper", 1, || s_sleep(15));
        assert_eq!(s_nice(pid, 5).unwrap_err(), Errno::InvalidPriority);
        s_nice(pid, 2).unwrap();
        {
            let kernel = KERNEL.lock();
            assert_eq!(kernel.pcb(pid).unwrap().priority, 2);
        }
        assert_eq!(s_nice(9876, 1).unwrap_err(), Errno::NoSuchProcess);
        let _ = s_waitpid(pid, false).unwrap();
    });
}

#[test]
fn spawned_children_inherit_redirected_descriptors() {
    run_os("redirect", || {
        let fd = s_open("out.txt", OpenMode::Write).unwrap();
        s_dup2(fd, 1).unwrap();
        s_close(fd).unwrap();
        let pid = spawn_proc("writer", 1, || {
            let _ = s_write(1, b"hello from child");
        });
        let _ = s_waitpid(pid, false).unwrap();
        s_reset_std(1).unwrap();

        let fd = s_open("out.txt", OpenMode::Read).unwrap();
        let mut buf = [0u8; 64];
        let n = s_read(fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello from child");

        // Every transient reference is gone: one user slot remains open.
        let open_user_slots = pennos::fs::with(|volume| {
            Ok((3..32).filter(|&i| volume.slot(i).is_some()).count())
        })
        .unwrap();
        assert_eq!(open_user_slots, 1);
        s_close(fd).unwrap();
    });
}

#[test]
fn fg_and_bg_manage_stopped_jobs() {
    run_os("jobctl", || {
        let pid = s_spawn(
            Box::new(|_| s_sleep(60)),
            vec!["napper".to_string()],
            0,
            1,
            -1,
            1,
            ProcStatus::Blocked,
            false,
            true,
        )
        .unwrap();
        s_sleep(3);
        s_kill(pid, Signal::Stop).unwrap();
        {
            let kernel = KERNEL.lock();
            assert_eq!(kernel.pcb(pid).unwrap().status, ProcStatus::Stopped);
            assert!(kernel.stopped_jobs.contains(&pid));
        }

        let resumed = pennos::syscalls::s_bg(-1).unwrap();
        assert_eq!(resumed, pid);
        {
            let kernel = KERNEL.lock();
            assert!(kernel.background_jobs.contains(&pid));
            assert!(!kernel.stopped_jobs.contains(&pid));
            assert!(kernel.sleeping.contains(&pid));
        }

        let foreground = pennos::syscalls::s_fg(-1).unwrap();
        assert_eq!(foreground, pid);
        let (_, status) = s_waitpid(pid, false).unwrap().unwrap();
        assert!(status.wif_exited());
    });
}

#[test]
fn pids_and_job_ids_are_monotonic() {
    run_os("pids", || {
        let a = spawn_proc("one", 1, || {});
        let b = spawn_proc("two", 1, || {});
        assert_eq!((a, b), (3, 4));
        let _ = s_waitpid(a, false).unwrap();
        let _ = s_waitpid(b, false).unwrap();
        // Reaping frees the PCBs, never the pids.
        let c = spawn_proc("three", 1, || {});
        assert_eq!(c, 5);
        {
            let kernel = KERNEL.lock();
            assert_eq!(kernel.pcb(c).unwrap().job_id, 5);
        }
        let _ = s_waitpid(c, false).unwrap();
    });
}

#[test]
fn unreaped_children_stay_zombied() {
    run_os("zombie", || {
        let pid = spawn_proc("walker", 1, || {});
        s_sleep(3);
        {
            let kernel = KERNEL.lock();
            assert_eq!(kernel.pcb(pid).unwrap().status, ProcStatus::Zombied);
        }
        let (_, status) = s_waitpid(pid, false).unwrap().unwrap();
        assert!(status.wif_exited());
        {
            let kernel = KERNEL.lock();
            assert!(kernel.pcb(pid).is_none());
        }
    });
}

#[test]
fn nested_generations_spawn_and_reap() {
    // A recur-style chain: every generation spawns the next and block-waits
    // on it, so the reaps unwind from the innermost child outward.
    fn generation(depth: u32) {
        if depth == 0 {
            return;
        }
        let pid = s_spawn(
            Box::new(move |_| generation(depth - 1)),
            vec![format!("gen{}", depth)],
            0,
            1,
            -1,
            1,
            ProcStatus::Blocked,
            false,
            false,
        )
        .unwrap();
        s_sleep(1);
        let (reaped, status) = s_waitpid(pid, false).unwrap().unwrap();
        assert_eq!(reaped, pid);
        assert!(status.wif_exited());
    }
    run_os("recur", || {
        generation(5);
        let kernel = KERNEL.lock();
        // Every generation was reaped by its own parent.
        assert!(kernel.ps_snapshot().iter().all(|p| !p.cmd.starts_with("gen")));
    });
}

#[test]
fn quit_logs_a_core_dump() {
    let events = run_os("quit", || {
        let pid = spawn_proc("napper", 1, || s_sleep(50));
        s_sleep(2);
        s_kill(pid, Signal::Quit).unwrap();
        let (_, status) = s_waitpid(pid, false).unwrap().unwrap();
        assert!(status.wif_exited());
    });
    assert!(events
        .iter()
        .any(|e| e.event == "QUIT (core dumped)" && e.pid == 3));
}
