//! Simple detach-from-tty daemonisation, grounded in
//! `util.c`'s `become_daemon()`.
//!
//! Deliberately not a parent/monitor/daemon three-process dance: dmon is
//! itself already a restart-supervising process, so a separate monitor
//! process watching for abnormal termination would just supervise the
//! supervisor. This does the single-fork detach the original performs.

use crate::sys;
use std::io::Result;
use std::path::Path;

/// Opens `/dev/null` onto stdin/stdout/stderr, forks, exits the parent with
/// status 0, and calls `setsid` in the child. Returns only in the child.
pub fn daemonize() -> Result<()> {
    let devnull = sys::open_rdwr(Path::new("/dev/null"))?;
    sys::fd_cloexec(devnull)?;
    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        unsafe {
            sys::dup2(devnull, fd)?;
        }
    }

    match unsafe { sys::fork() }? {
        Some(_pid) => std::process::exit(0),
        None => {
            sys::setsid()?;
            Ok(())
        }
    }
}

/// Writes the supervisor's pid as a decimal number followed by a newline,
/// truncating any existing file.
pub fn write_pidfile(path: &Path, pid: i32) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;
    let mut f = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    writeln!(f, "{pid}")?;
    Ok(())
}
