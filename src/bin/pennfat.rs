//! Standalone PennFAT maintenance shell: create, mount, and edit a disk
//! image without booting the OS.

use std::io::{self, BufRead, Write};
use std::path::Path;

use pennos::fs;
use pennos::fs::dir::Perm;
use pennos::fs::fd::OpenMode;

fn main() {
    pennos::logger::init();
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("pennfat> ");
        let _ = io::stdout().flush();
        let line = match lines.next() {
            Some(Ok(line)) => line,
            _ => break,
        };
        let args: Vec<&str> = line.split_whitespace().collect();
        if args.is_empty() {
            continue;
        }
        match args[0] {
            "mkfs" if args.len() == 4 => {
                let blocks = args[2].parse().unwrap_or(0);
                let config = args[3].parse().unwrap_or(u8::MAX);
                report(fs::mkfs(Path::new(args[1]), blocks, config));
            }
            "mkfs" => usage("mkfs fs_name blocks_in_fat block_size_config"),
            "mount" if args.len() == 2 => report(fs::mount(Path::new(args[1]))),
            "mount" => usage("mount fs_name"),
            "unmount" => report(fs::unmount()),
            "touch" if args.len() >= 2 => {
                for name in &args[1..] {
                    report(fs::touch(name));
                }
            }
            "touch" => usage("touch filename [filename...]"),
            "mv" if args.len() == 3 => report(fs::rename(args[1], args[2])),
            "mv" => usage("mv source dest"),
            "rm" if args.len() >= 2 => {
                for name in &args[1..] {
                    report(fs::unlink(name));
                }
            }
            "rm" => usage("rm filename [filename...]"),
            "chmod" if args.len() == 3 => match args[2].parse::<i32>() {
                Ok(delta) => report(fs::chmod(args[1], delta)),
                Err(_) => usage("chmod filename perm_delta"),
            },
            "chmod" => usage("chmod filename perm_delta"),
            "ls" => {
                let name = args.get(1).copied();
                match fs::list(name) {
                    Ok(rows) => {
                        for row in rows {
                            let r = if row.perm.contains(Perm::READ) { 'r' } else { '-' };
                            let w = if row.perm.contains(Perm::WRITE) { 'w' } else { '-' };
                            let x = if row.perm.contains(Perm::EXEC) { 'x' } else { '-' };
                            println!("{:>6} {}{}{} {:>8} {}", row.first_block, r, w, x, row.size, row.name);
                        }
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
            "cp" if args.len() == 4 && args[1] == "-h" => {
                report(fs::copy_from_host(Path::new(args[2]), args[3]));
            }
            "cp" if args.len() == 4 && args[2] == "-h" => {
                report(fs::copy_to_host(args[1], Path::new(args[3])));
            }
            "cp" if args.len() == 3 => report(fs::copy_within(args[1], args[2])),
            "cp" => usage("cp [-h] source [-h] dest"),
            "cat" if args.len() >= 2 => {
                for name in &args[1..] {
                    cat_file(name);
                }
            }
            "cat" => usage("cat filename [filename...]"),
            _ => println!("Unknown command."),
        }
    }
    if fs::is_mounted() {
        let _ = fs::unmount();
    }
}

fn cat_file(name: &str) {
    let result = fs::with(|volume| {
        let fd = volume.open(name, OpenMode::Read)?;
        let mut buf = [0u8; 1024];
        loop {
            let n = volume.read(fd, &mut buf)?;
            if n == 0 {
                break;
            }
            io::stdout().write_all(&buf[..n]).ok();
        }
        volume.close(fd)
    });
    if let Err(e) = result {
        println!("Error: {}", e);
    }
}

fn report(result: pennos::Result<()>) {
    if let Err(e) = result {
        println!("Error: {}", e);
    }
}

fn usage(msg: &str) {
    println!("Usage: {}", msg);
}
