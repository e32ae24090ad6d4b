//! The two-task state machine (pid, queued action, pending signal).
//!
//! A [`TaskSlot`] is the part of a task's state that the async-signal-safe
//! handler must be able to touch: the live pid, the queued action, and the
//! pending signal. It is nothing but atomics. [`Task`] is the rest: argv,
//! redirection fds, identity, and the anti-DoS fork-interval bookkeeping,
//! all of which only the main thread ever touches.

use crate::sys;
use std::ffi::CString;
use std::io::{Error, ErrorKind, Result};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Instant;

pub const NO_PID: i32 = -1;
pub const NO_SIGNAL: i32 = -1;

/// `DMON_GID_COUNT` in the original C (`util.h`). A design choice, not a
/// portability constant — preserved as-is rather than switched
/// to an unbounded `Vec`.
pub const MAX_SUPPLEMENTARY_GIDS: usize = 76;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Action {
    None = 0,
    Start = 1,
    Stop = 2,
    Signal = 3,
}

impl Action {
    fn from_code(code: i32) -> Action {
        match code {
            1 => Action::Start,
            2 => Action::Stop,
            3 => Action::Signal,
            _ => Action::None,
        }
    }
}

/// The uid/gid/supplementary-gids identity a task's child execs as.
#[derive(Clone, Debug, Default)]
pub struct Identity {
    pub uid: Option<libc::uid_t>,
    pub gid: Option<libc::gid_t>,
    pub gids: Vec<libc::gid_t>,
}

impl Identity {
    pub fn push_gid(&mut self, gid: libc::gid_t) -> bool {
        if self.gids.len() >= MAX_SUPPLEMENTARY_GIDS {
            return false;
        }
        self.gids.push(gid);
        true
    }
}

/// The atomics a signal handler is allowed to mutate for one task.
pub struct TaskSlot {
    pid: AtomicI32,
    action: AtomicI32,
    signal: AtomicI32,
}

impl TaskSlot {
    pub const fn new() -> TaskSlot {
        TaskSlot {
            pid: AtomicI32::new(NO_PID),
            action: AtomicI32::new(Action::Start as i32),
            signal: AtomicI32::new(NO_SIGNAL),
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid.load(Ordering::SeqCst)
    }

    pub fn set_pid(&self, pid: i32) {
        self.pid.store(pid, Ordering::SeqCst);
    }

    /// Async-signal-safe: only called from the main thread or a handler.
    pub fn queue_action(&self, action: Action) {
        self.action.store(action as i32, Ordering::SeqCst);
    }

    pub fn peek_action(&self) -> Action {
        Action::from_code(self.action.load(Ordering::SeqCst))
    }

    pub fn take_action(&self) -> Action {
        Action::from_code(self.action.swap(Action::None as i32, Ordering::SeqCst))
    }

    pub fn queue_signal(&self, signum: i32) {
        self.signal.store(signum, Ordering::SeqCst);
    }

    pub fn peek_signal(&self) -> i32 {
        self.signal.load(Ordering::SeqCst)
    }

    pub fn take_signal(&self) -> i32 {
        self.signal.swap(NO_SIGNAL, Ordering::SeqCst)
    }
}

impl Default for TaskSlot {
    fn default() -> Self {
        TaskSlot::new()
    }
}

/// Everything about a supervised child that only the main thread touches.
pub struct Task<'a> {
    pub slot: &'a TaskSlot,
    pub argv: Vec<CString>,
    pub write_fd: Option<RawFd>,
    pub read_fd: Option<RawFd>,
    pub redirect_stderr_to_stdout: bool,
    pub identity: Identity,
    started: Option<Instant>,
}

impl<'a> Task<'a> {
    pub fn new(slot: &'a TaskSlot, argv: Vec<CString>) -> Task<'a> {
        Task {
            slot,
            argv,
            write_fd: None,
            read_fd: None,
            redirect_stderr_to_stdout: false,
            identity: Identity::default(),
            started: None,
        }
    }

    pub fn pid(&self) -> i32 {
        self.slot.pid()
    }

    /// Forks and execs `argv[0]`. In the parent, records the new pid and
    /// clears the queued `Start` action. In the child, never returns: it
    /// execs or `_exit(111)`s.
    ///
    /// Implements the anti-DoS delay: when the previous start
    /// was less than a second ago, the child sleeps one second before exec.
    pub fn start(&mut self) -> Result<()> {
        let now = Instant::now();
        let sleep_secs = match self.started {
            Some(prev) if now.duration_since(prev).as_secs_f64() > 1.0 => 0,
            Some(_) => 1,
            None => 0,
        };
        self.started = Some(now);

        match unsafe { sys::fork() }? {
            Some(pid) => {
                self.slot.set_pid(pid);
                self.slot.take_action();
                Ok(())
            }
            None => {
                self.run_child(sleep_secs);
                unreachable!("run_child never returns");
            }
        }
    }

    /// Post-fork, pre-exec child body. Allocation-free except for the argv
    /// pointer vector `execvp` needs, matching execvp's ordering:
    /// sleep, dup2 write_fd, dup2 read_fd, dup2 stderr-onto-stdout, setgid,
    /// setgroups, setuid, execvp.
    fn run_child(&self, sleep_secs: u64) -> ! {
        sys::safe_sleep(sleep_secs);

        let fail = |_: Error| -> ! { std::process::exit(111) };

        if let Some(wfd) = self.write_fd {
            if let Err(e) = unsafe { sys::dup2(wfd, libc::STDOUT_FILENO) } {
                fail(e);
            }
        }
        if let Some(rfd) = self.read_fd {
            if let Err(e) = unsafe { sys::dup2(rfd, libc::STDIN_FILENO) } {
                fail(e);
            }
        }
        if self.redirect_stderr_to_stdout {
            if let Err(e) = unsafe { sys::dup2(libc::STDOUT_FILENO, libc::STDERR_FILENO) } {
                fail(e);
            }
        }

        if let Some(gid) = self.identity.gid {
            if let Err(e) = unsafe { sys::setgid(gid) } {
                fail(e);
            }
        }
        if !self.identity.gids.is_empty() {
            if let Err(e) = unsafe { sys::setgroups(&self.identity.gids) } {
                fail(e);
            }
        }
        if let Some(uid) = self.identity.uid {
            if let Err(e) = unsafe { sys::setuid(uid) } {
                fail(e);
            }
        }

        unsafe {
            sys::execvp(&self.argv);
        }
        std::process::exit(111)
    }

    /// Delivers `pending_signal` to `pid`, if any; clears it on success.
    /// A failed `kill` on a known pid is fatal.
    pub fn dispatch_signal(&self) -> Result<()> {
        let signum = self.slot.peek_signal();
        if signum == NO_SIGNAL {
            return Ok(());
        }
        let pid = self.slot.pid();
        sys::kill(pid, signum)?;
        self.slot.take_signal();
        Ok(())
    }

    /// Drains any already-queued signal, then queues and dispatches `sig`.
    pub fn send_signal(&self, sig: i32) -> Result<()> {
        self.dispatch_signal()?;
        self.slot.queue_signal(sig);
        self.dispatch_signal()
    }

    /// Realises the queued action, returning what was dispatched so callers
    /// can emit the matching status-sink line.
    pub fn dispatch_action(&mut self) -> Result<Action> {
        let action = self.slot.take_action();
        match action {
            Action::None => {}
            Action::Start => self.start()?,
            Action::Stop => {
                if self.slot.pid() != NO_PID {
                    self.send_signal(libc::SIGTERM)?;
                    self.send_signal(libc::SIGCONT)?;
                }
            }
            Action::Signal => self.dispatch_signal()?,
        }
        Ok(action)
    }

    /// Drains any queued action, then queues and dispatches `action`.
    pub fn send_action(&mut self, action: Action) -> Result<()> {
        self.dispatch_action()?;
        self.slot.queue_action(action);
        self.dispatch_action()?;
        Ok(())
    }
}

pub fn is_interrupted(e: &Error) -> bool {
    e.kind() == ErrorKind::Interrupted
}
