//! The `dmon` supervisor: forks and babysits a command process and an
//! optional log process, applying respawn, timeout, load-based pause/resume
//! and signal-forwarding policies.
//!
//! Grounded in `dmon.c`'s `dmon_main`, `reap_and_check`, and `handle_signal`,
//! reworked into owned Rust values plus the [`handler`] module's statics for
//! the pieces the signal handler must reach.

mod cli;
mod handler;

use anyhow::{Context, Result};
use dmon_common::identity::parse_identity;
use dmon_common::status::{Role, StatusSink};
use dmon_common::sys;
use dmon_common::task::{self, Action, Task};
use std::ffi::CString;
use std::os::unix::io::{AsRawFd, OwnedFd};
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

fn to_cstrings(argv: &[String]) -> Result<Vec<CString>> {
    argv.iter()
        .map(|s| CString::new(s.as_str()).context("argument contains a NUL byte"))
        .collect()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run() {
        eprintln!("dmon: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let cfg = cli::compose_and_parse(argv)?;

    if let Some(work_dir) = &cfg.work_dir {
        sys::chdir(work_dir).with_context(|| format!("cannot use '{}' as work directory", work_dir.display()))?;
    }

    for (var, value) in &cfg.environ {
        match value {
            Some(v) => std::env::set_var(var, v),
            None => std::env::remove_var(var),
        }
    }

    for (resource, value) in &cfg.limits {
        dmon_common::rlimit::apply(*resource, *value)
            .with_context(|| format!("getrlimit/setrlimit for '{}' failed", dmon_common::rlimit::limit_name(*resource)))?;
    }

    let log_enabled = cfg.log_argv.is_some();

    let mut status = match &cfg.write_info {
        Some(path) => Some(StatusSink::open(path).with_context(|| format!("cannot open '{}' for writing", path.display()))?),
        None => None,
    };

    let (pipe_read, pipe_write): (Option<OwnedFd>, Option<OwnedFd>) = if log_enabled {
        let (r, w) = sys::pipe().context("cannot create pipe")?;
        sys::fd_cloexec(r.as_raw_fd())?;
        sys::fd_cloexec(w.as_raw_fd())?;
        debug!(read = r.as_raw_fd(), write = w.as_raw_fd(), "log pipe created");
        (Some(r), Some(w))
    } else {
        (None, None)
    };

    let cmd_argv = to_cstrings(&cfg.cmd_argv)?;
    let mut cmd_task = Task::new(&handler::CMD_SLOT, cmd_argv);
    cmd_task.redirect_stderr_to_stdout = cfg.stderr_redir;
    cmd_task.write_fd = pipe_write.as_ref().map(|fd| fd.as_raw_fd());
    if let Some(spec) = &cfg.cmd_user {
        cmd_task.identity = parse_identity(spec).context("invalid --cmd-user")?;
    }

    let mut log_task = if let Some(log_argv) = &cfg.log_argv {
        let argv = to_cstrings(log_argv)?;
        let mut t = Task::new(&handler::LOG_SLOT, argv);
        t.read_fd = pipe_read.as_ref().map(|fd| fd.as_raw_fd());
        if let Some(spec) = &cfg.log_user {
            t.identity = parse_identity(spec).context("invalid --log-user")?;
        }
        Some(t)
    } else {
        None
    };

    if cfg.cmd_argv.is_empty() {
        anyhow::bail!("no command to run given");
    }

    if !cfg.no_daemon {
        dmon_common::daemonize::daemonize().context("cannot daemonize")?;
    }

    if let Some(pid_file) = &cfg.pid_file {
        if let Err(e) = dmon_common::daemonize::write_pidfile(pid_file, std::process::id() as i32) {
            warn!(error = %e, "failed to write pid file");
        }
    }

    unsafe {
        dmon_common::signals::install_handler(dmon_common::signals::INSTALLED_SIGNALS, handler::handle_signal)
            .context("cannot install signal handlers")?;
    }

    handler::CMD_SIGNALS.store(cfg.cmd_sigs, Ordering::SeqCst);
    handler::LOG_SIGNALS.store(cfg.log_sigs, Ordering::SeqCst);
    handler::LOG_ENABLED.store(log_enabled, Ordering::SeqCst);
    handler::CMD_TIMEOUT.store(cfg.timeout, Ordering::SeqCst);
    sys::alarm(cfg.timeout as u32);

    let load_enabled = cfg.load_high > 0.0;
    let mut num_respawns = cfg.max_respawns;
    let mut paused = false;
    let mut retcode: i32 = 0;

    while handler::RUNNING.load(Ordering::SeqCst) {
        if handler::take_timeout_fired() {
            if let Some(s) = status.as_mut() {
                s.cmd_timeout(cmd_task.pid());
            }
        }

        if handler::CHECK_CHILD.swap(false, Ordering::SeqCst) {
            retcode = reap_and_check(
                &mut cmd_task,
                log_task.as_mut(),
                log_enabled,
                cfg.once,
                &mut num_respawns,
                status.as_mut(),
            );
            debug!(retcode, "reaped");

            if cfg.interval > 0 && !cfg.once && retcode == 0 && num_respawns != Some(0) {
                let ts = libc::timespec { tv_sec: cfg.interval as libc::time_t, tv_nsec: 0 };
                let mut remaining = ts;
                loop {
                    let ret = unsafe { libc::nanosleep(&remaining, &mut remaining) };
                    if ret == 0 || !handler::RUNNING.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }

            if !handler::RUNNING.load(Ordering::SeqCst) {
                cmd_task.slot.queue_action(Action::None);
                break;
            }
        }

        dispatch_with_status(&mut cmd_task, Role::Cmd, status.as_mut())?;
        if let Some(log_task) = log_task.as_mut() {
            dispatch_with_status(log_task, Role::Log, status.as_mut())?;
        }

        if load_enabled {
            sys::interruptible_sleep(1);
            match sys::load_average() {
                Ok(load_cur) => {
                    if paused {
                        if load_cur <= cfg.load_low {
                            cmd_task.send_signal(libc::SIGCONT)?;
                            if let Some(s) = status.as_mut() {
                                s.cmd_resume(cmd_task.pid());
                            }
                            paused = false;
                        }
                    } else if load_cur > cfg.load_high {
                        cmd_task.send_signal(libc::SIGSTOP)?;
                        if let Some(s) = status.as_mut() {
                            s.cmd_pause(cmd_task.pid());
                        }
                        paused = true;
                    }
                }
                Err(e) => warn!(error = %e, "getloadavg() failed"),
            }
        } else {
            sys::pause();
        }
    }

    debug!("exiting gracefully");

    if cmd_task.pid() != task::NO_PID {
        if let Some(s) = status.as_mut() {
            s.stop(Role::Cmd, cmd_task.pid());
        }
        cmd_task.send_action(Action::Stop)?;
    }
    if let Some(log_task) = log_task.as_mut() {
        if log_task.pid() != task::NO_PID {
            if let Some(s) = status.as_mut() {
                s.stop(Role::Log, log_task.pid());
            }
            log_task.send_action(Action::Stop)?;
        }
    }

    drop(status);

    if retcode >= 0 {
        use std::os::unix::process::ExitStatusExt;
        let exit_status = std::process::ExitStatus::from_raw(retcode);
        if let Some(code) = exit_status.code() {
            std::process::exit(code);
        }
    }
    std::process::exit(1)
}

/// Mirrors the `reap_and_check`/`task_action_dispatch_and_write_status`
/// pair in `dmon.c`: peeks the queued action to know which status lines to
/// emit, dispatches it, then (for a Start) appends the new pid line.
fn dispatch_with_status(task: &mut Task<'_>, role: Role, mut status: Option<&mut StatusSink>) -> Result<()> {
    let action = task.slot.peek_action();
    let pid_before = task.pid();
    let signal_before = task.slot.peek_signal();
    match action {
        Action::None => {}
        Action::Start => {
            if let Some(s) = status.as_deref_mut() {
                s.start(role);
            }
        }
        Action::Stop => {
            if let Some(s) = status.as_deref_mut() {
                s.stop(role, pid_before);
            }
        }
        Action::Signal => {
            if let Some(s) = status.as_deref_mut() {
                s.signal(role, pid_before, signal_before);
            }
        }
    }
    let dispatched = task.dispatch_action()?;
    if dispatched == Action::Start {
        if let Some(s) = status.as_deref_mut() {
            s.pid(task.pid());
        }
    }
    Ok(())
}

/// Mirrors `reap_and_check` in `dmon.c`: a single non-blocking `waitpid`,
/// with the respawn/graceful-exit decision for the command task and a
/// plain respawn for the log task. Returns the raw wait status for `cmd`,
/// or -1 when the reap produced no status meaningful to the caller.
fn reap_and_check(
    cmd: &mut Task<'_>,
    log: Option<&mut Task<'_>>,
    log_enabled: bool,
    once: bool,
    num_respawns: &mut Option<i64>,
    mut status: Option<&mut StatusSink>,
) -> i32 {
    let (pid, wait_status) = match sys::waitpid(-1, libc::WNOHANG) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "waitpid failed");
            return -1;
        }
    };

    let raw = raw_status(&wait_status);

    if pid == cmd.pid() {
        if let Some(s) = status.as_deref_mut() {
            s.exit(Role::Cmd, pid, raw);
        }
        cmd.slot.set_pid(task::NO_PID);

        if once && wait_status.success() {
            handler::RUNNING.store(false, Ordering::SeqCst);
        } else if *num_respawns == Some(0) {
            handler::RUNNING.store(false, Ordering::SeqCst);
        } else {
            if let Some(n) = num_respawns {
                if *n > 0 {
                    *n -= 1;
                }
            }
            cmd.slot.queue_action(Action::Start);
        }
        raw
    } else if let Some(log) = log.filter(|_| log_enabled) {
        if pid == log.pid() {
            if let Some(s) = status.as_deref_mut() {
                s.exit(Role::Log, pid, raw);
            }
            log.slot.set_pid(task::NO_PID);
            log.slot.queue_action(Action::Start);
            -1
        } else {
            -1
        }
    } else {
        -1
    }
}

fn raw_status(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.into_raw()
}
