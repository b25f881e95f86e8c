use std::path::PathBuf;
use std::process;
use std::sync::atomic::Ordering;

use pennos::shell::{penn_shell, AIO_ENABLED};
use pennos::{scheduler, BootConfig};

fn main() {
    pennos::logger::init();

    let mut image: Option<PathBuf> = None;
    let mut logfile: Option<PathBuf> = None;
    let mut aio = false;
    for arg in std::env::args().skip(1) {
        if arg == "--aio" {
            aio = true;
        } else if image.is_none() {
            image = Some(PathBuf::from(arg));
        } else if logfile.is_none() {
            logfile = Some(PathBuf::from(arg));
        } else {
            eprintln!("Usage: pennos image [logfile] [--aio]");
            process::exit(2);
        }
    }
    let Some(image) = image else {
        eprintln!("Usage: pennos image [logfile] [--aio]");
        process::exit(2);
    };

    if aio {
        // Put host stdin into non-blocking mode; the shell polls it.
        unsafe {
            let flags = libc::fcntl(libc::STDIN_FILENO, libc::F_GETFL, 0);
            libc::fcntl(libc::STDIN_FILENO, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
        AIO_ENABLED.store(true, Ordering::Relaxed);
    }

    let config = BootConfig {
        image,
        logfile: logfile.unwrap_or_else(|| PathBuf::from("log")),
        quantum: scheduler::DEFAULT_QUANTUM,
    };
    if let Err(e) = pennos::boot(&config, penn_shell) {
        eprintln!("pennos: {}", e);
        process::exit(1);
    }
    process::exit(0);
}
