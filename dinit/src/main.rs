//! `dinit`: execs a single given command and reaps zombies with an ordinary
//! `wait` loop until that command exits, grounded in `dinit.c`'s near-no-op
//! `dinit_main` — this is deliberately not `dinit-service.c`'s much larger
//! multi-unit service supervisor; dependency resolution between multiple
//! supervised units is out of scope here.
//!
//! Useful as PID 1 in a container: `wait(2)` there also reaps re-parented
//! orphans, which this loop discards without any special subreaping logic,
//! matching the "ordinary wait, no subreaping" scope.

use anyhow::{bail, Context, Result};
use dmon_common::sys;
use dmon_common::task::is_interrupted;
use std::ffi::CString;
use std::os::unix::process::ExitStatusExt;
use std::sync::atomic::{AtomicI32, Ordering};

const NO_PID: i32 = -1;
static CHILD_PID: AtomicI32 = AtomicI32::new(NO_PID);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    if let Err(e) = run() {
        eprintln!("dinit: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    if argv.is_empty() {
        bail!("no command specified");
    }
    let cargv: Vec<CString> = argv
        .iter()
        .map(|s| CString::new(s.as_str()).context("argument contains a NUL byte"))
        .collect::<Result<_>>()?;

    unsafe {
        dmon_common::signals::install_simple_handler(&[libc::SIGTERM, libc::SIGINT], forward_signal)
            .context("cannot install signal handlers")?;
    }

    match unsafe { sys::fork() }? {
        Some(pid) => CHILD_PID.store(pid, Ordering::SeqCst),
        None => {
            unsafe {
                sys::execvp(&cargv);
            }
            std::process::exit(127);
        }
    }

    loop {
        match sys::waitpid(-1, 0) {
            Ok((pid, status)) if pid == CHILD_PID.load(Ordering::SeqCst) => {
                if let Some(code) = status.code() {
                    std::process::exit(code);
                }
                if let Some(signum) = status.signal() {
                    std::process::exit(128 + signum);
                }
                std::process::exit(1);
            }
            Ok(_) => continue, // a re-parented orphan; nothing further to do with it
            Err(e) if is_interrupted(&e) => continue,
            Err(e) => return Err(e).context("waitpid failed"),
        }
    }
}

/// Forwards `signum` to the supervised child, if one is running yet.
extern "C" fn forward_signal(signum: libc::c_int) {
    let pid = CHILD_PID.load(Ordering::SeqCst);
    if pid != NO_PID {
        unsafe {
            libc::kill(pid, signum);
        }
    }
}
