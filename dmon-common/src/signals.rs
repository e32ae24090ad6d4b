//! Raw `sigaction`-based signal installation.
//!
//! Kept separate from `signal-hook` because the supervisor's handler needs the full signal mask and
//! `SA_NOCLDSTOP` at once, and needs to write into task-specific flags rather
//! than a single shared atomic bool. `signal-hook`'s high-level API is a
//! great fit for the simpler siblings (`dlog`, `dslog`, `drlog`) that only
//! need "a bool went true"; it is not a fit for dmon's per-task queuing.

use libc::c_int;
use std::io::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// The name table used for logging and for `--limit help`-style listings,
/// mirroring `forward_signals[]` in `dmon.c`/`task.c` (including the names
/// for `TERM`/`INT`/`KILL` even though those are never forwarded — `TERM`
/// and `INT` always trigger graceful shutdown instead, and `KILL` can never
/// be caught).
pub const FORWARD_SIGNALS: &[(&str, c_int)] = &[
    ("CONT", libc::SIGCONT),
    ("ALRM", libc::SIGALRM),
    ("QUIT", libc::SIGQUIT),
    ("USR1", libc::SIGUSR1),
    ("USR2", libc::SIGUSR2),
    ("HUP", libc::SIGHUP),
    ("STOP", libc::SIGSTOP),
    ("TERM", libc::SIGTERM),
    ("INT", libc::SIGINT),
    ("KILL", libc::SIGKILL),
];

/// The signals the supervisor actually installs a handler for
/// §4.3). `STOP`/`KILL` are named in [`FORWARD_SIGNALS`] for the name table
/// but are never installed: they cannot be caught by `sigaction(2)`, and the
/// original's own installation loop stops short of them too.
pub const INSTALLED_SIGNALS: &[c_int] = &[
    libc::SIGCONT,
    libc::SIGALRM,
    libc::SIGQUIT,
    libc::SIGUSR1,
    libc::SIGUSR2,
    libc::SIGHUP,
    libc::SIGCHLD,
    libc::SIGTERM,
    libc::SIGINT,
];

pub fn signal_name(signum: c_int) -> &'static str {
    FORWARD_SIGNALS
        .iter()
        .find(|(_, code)| *code == signum)
        .map(|(name, _)| *name)
        .unwrap_or("(unknown)")
}

/// Installs `handler` for every signal in `signals`, with `SA_NOCLDSTOP` and
/// a full signal mask (so the handler itself cannot be re-entered by another
/// signal mid-flight), matching `setup_signals()` in the original `dmon.c`.
///
/// # Safety
/// `handler` must be async-signal-safe: no allocation, no I/O beyond calls
/// documented safe in signal(7) (e.g. `kill`, `alarm`).
pub unsafe fn install_handler(signals: &[c_int], handler: extern "C" fn(c_int)) -> Result<()> {
    let mut sa: libc::sigaction = std::mem::zeroed();
    sa.sa_sigaction = handler as usize;
    sa.sa_flags = libc::SA_NOCLDSTOP;
    libc::sigfillset(&mut sa.sa_mask);
    for &sig in signals {
        if libc::sigaction(sig, &sa, std::ptr::null_mut()) < 0 {
            return Err(Error::last_os_error());
        }
    }
    Ok(())
}

/// A simpler handler installer for the sibling tools: empty mask, no
/// `SA_NOCLDSTOP`, matching `dlog.c`'s `safe_sigaction` usage.
///
/// # Safety
/// Same obligations as [`install_handler`].
pub unsafe fn install_simple_handler(signals: &[c_int], handler: extern "C" fn(c_int)) -> Result<()> {
    let mut sa: libc::sigaction = std::mem::zeroed();
    sa.sa_sigaction = handler as usize;
    sa.sa_flags = 0;
    libc::sigemptyset(&mut sa.sa_mask);
    for &sig in signals {
        if libc::sigaction(sig, &sa, std::ptr::null_mut()) < 0 {
            return Err(Error::last_os_error());
        }
    }
    Ok(())
}

/// A single atomic boolean flag, safe to flip from a signal handler.
pub struct AtomicFlag(AtomicBool);

impl AtomicFlag {
    pub const fn new(initial: bool) -> AtomicFlag {
        AtomicFlag(AtomicBool::new(initial))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::SeqCst);
    }

    /// Atomically reads the current value and resets it to `false`.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

impl Default for AtomicFlag {
    fn default() -> Self {
        AtomicFlag::new(false)
    }
}
