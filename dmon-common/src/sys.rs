//! Thin, `unsafe`-contained wrappers around the POSIX calls the supervisor needs.
//!
//! Small functions that turn a `-1`-on-error C calling convention into `io::Result`,
//! with nothing alloc-heavy or runtime-dependent inside. Everything here is
//! safe to call from the child side of a `fork()`, before `execvp`.

use libc::{c_int, pid_t};
use std::ffi::CString;
use std::io::{Error, ErrorKind, Result};
use std::os::unix::io::{OwnedFd, RawFd};
use std::process::ExitStatus;
use std::os::unix::process::ExitStatusExt;

pub unsafe fn fork() -> Result<Option<pid_t>> {
    match libc::fork() {
        -1 => Err(Error::last_os_error()),
        0 => Ok(None),
        pid => Ok(Some(pid)),
    }
}

pub fn pipe() -> Result<(OwnedFd, OwnedFd)> {
    use std::os::unix::io::FromRawFd;
    let mut fds: [RawFd; 2] = [0; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(Error::last_os_error());
    }
    Ok((unsafe { OwnedFd::from_raw_fd(fds[0]) }, unsafe {
        OwnedFd::from_raw_fd(fds[1])
    }))
}

pub fn fd_cloexec(fd: RawFd) -> Result<()> {
    if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

/// # Safety
/// Must only be called after `fork()` returns in the child, before `execvp`.
pub unsafe fn dup2(from: RawFd, to: RawFd) -> Result<()> {
    if libc::dup2(from, to) < 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

pub fn waitpid(pid: pid_t, flags: c_int) -> Result<(pid_t, ExitStatus)> {
    loop {
        let mut status: c_int = 0;
        let ret = unsafe { libc::waitpid(pid, &mut status, flags) };
        if ret >= 0 {
            return Ok((ret, ExitStatus::from_raw(status)));
        }
        let err = Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

pub fn kill(pid: pid_t, signum: c_int) -> Result<()> {
    if unsafe { libc::kill(pid, signum) } < 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

/// # Safety
/// Execs the calling process image; never returns on success. Must only be
/// called from the single-threaded child side of a `fork()`.
pub unsafe fn execvp(argv: &[CString]) -> Error {
    let mut ptrs: Vec<*const libc::c_char> = argv.iter().map(|a| a.as_ptr()).collect();
    ptrs.push(std::ptr::null());
    libc::execvp(ptrs[0], ptrs.as_ptr());
    Error::last_os_error()
}

pub fn setsid() -> Result<pid_t> {
    match unsafe { libc::setsid() } {
        -1 => Err(Error::last_os_error()),
        sid => Ok(sid),
    }
}

/// # Safety
/// Must only be called from the single-threaded child side of a `fork()`.
pub unsafe fn setgid(gid: libc::gid_t) -> Result<()> {
    if libc::setgid(gid) < 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

/// # Safety
/// Must only be called from the single-threaded child side of a `fork()`.
pub unsafe fn setgroups(gids: &[libc::gid_t]) -> Result<()> {
    if libc::setgroups(gids.len() as libc::size_t, gids.as_ptr()) < 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

/// # Safety
/// Must only be called from the single-threaded child side of a `fork()`.
pub unsafe fn setuid(uid: libc::uid_t) -> Result<()> {
    if libc::setuid(uid) < 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

pub fn chdir(path: &std::path::Path) -> Result<()> {
    let c = CString::new(path.as_os_str().to_string_lossy().into_owned())?;
    if unsafe { libc::chdir(c.as_ptr()) } < 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

pub fn alarm(seconds: u32) -> u32 {
    unsafe { libc::alarm(seconds) }
}

/// Blocks until a signal is delivered (and handled), per `pause(2)`.
pub fn pause() {
    unsafe {
        libc::pause();
    }
}

/// `nanosleep` without a restart-on-`EINTR` loop: any signal ends it early.
/// Returns `true` if the full duration elapsed, `false` if interrupted.
pub fn interruptible_sleep(seconds: u64) -> bool {
    if seconds == 0 {
        return true;
    }
    let req = libc::timespec {
        tv_sec: seconds as libc::time_t,
        tv_nsec: 0,
    };
    let ret = unsafe { libc::nanosleep(&req, std::ptr::null_mut()) };
    ret == 0
}

/// Sleep that restarts across `EINTR`, used for the anti-DoS fork delay.
pub fn safe_sleep(seconds: u64) {
    if seconds == 0 {
        return;
    }
    let mut ts = libc::timespec {
        tv_sec: seconds as libc::time_t,
        tv_nsec: 0,
    };
    loop {
        let ret = unsafe { libc::nanosleep(&ts, &mut ts) };
        if ret == 0 {
            return;
        }
        if Error::last_os_error().kind() != ErrorKind::Interrupted {
            return;
        }
    }
}

pub fn getrlimit(resource: c_int) -> Result<libc::rlimit> {
    let mut rl: libc::rlimit = unsafe { std::mem::zeroed() };
    if unsafe { libc::getrlimit(resource, &mut rl) } < 0 {
        return Err(Error::last_os_error());
    }
    Ok(rl)
}

pub fn setrlimit(resource: c_int, rl: &libc::rlimit) -> Result<()> {
    if unsafe { libc::setrlimit(resource, rl) } < 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

/// Applies `value` to `resource`'s soft limit, clamping to the hard limit and
/// treating a negative `value` as "use the hard maximum".
pub fn apply_rlimit(resource: c_int, value: i64) -> Result<()> {
    let mut rl = getrlimit(resource)?;
    rl.rlim_cur = if value < 0 {
        rl.rlim_max
    } else {
        (value as u64).min(rl.rlim_max)
    };
    setrlimit(resource, &rl)
}

pub fn open_append(path: &std::path::Path) -> Result<RawFd> {
    let c = CString::new(path.as_os_str().to_string_lossy().into_owned())?;
    let fd = unsafe { libc::open(c.as_ptr(), libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND, 0o666) };
    if fd < 0 {
        return Err(Error::last_os_error());
    }
    Ok(fd)
}

/// Reads the 1-minute load average via `getloadavg(3)`.
pub fn load_average() -> Result<f64> {
    let mut avg: [libc::c_double; 1] = [0.0];
    if unsafe { libc::getloadavg(avg.as_mut_ptr(), 1) } != 1 {
        return Err(Error::new(ErrorKind::Other, "getloadavg failed"));
    }
    Ok(avg[0])
}

pub fn open_rdwr(path: &std::path::Path) -> Result<RawFd> {
    let c = CString::new(path.as_os_str().to_string_lossy().into_owned())?;
    let fd = unsafe { libc::open(c.as_ptr(), libc::O_RDWR) };
    if fd < 0 {
        return Err(Error::last_os_error());
    }
    Ok(fd)
}
