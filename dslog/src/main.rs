//! `dslog`: forwards lines read from a file descriptor to syslog under a
//! configurable facility and priority, grounded in `dslog.c`.
//!
//! No syslog crate fits this use case cleanly, so this binds
//! `openlog`/`syslog`/`closelog` directly via `libc`, already a dependency
//! for raw POSIX calls elsewhere in this workspace.

use anyhow::{Context, Result};
use clap::Parser;
use dmon_common::config::tokenize_options;
use std::ffi::CString;
use std::io::{BufRead, BufReader};
use std::os::unix::io::FromRawFd;

#[derive(Parser, Debug)]
#[clap(about = "Forward lines from a file descriptor to syslog")]
struct Args {
    /// Syslog facility: one of auth, cron, daemon, ftp, kern, local0-7,
    /// lpr, mail, news, user, uucp (and a few historical synonyms).
    #[clap(short, long, default_value = "daemon")]
    facility: String,

    /// Syslog priority: one of emerg, alert, crit, err, warn, notice,
    /// info, debug (and a few historical synonyms).
    #[clap(short, long, default_value = "info")]
    priority: String,

    /// File descriptor to read input from.
    #[clap(short, long = "input-fd", default_value = "0")]
    input_fd: i32,

    /// Also copy lines to the console (LOG_CONS).
    #[clap(short, long)]
    console: bool,

    /// Drop blank lines instead of logging them.
    #[clap(short = 'e', long = "skip-empty")]
    skip_empty: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    if let Err(e) = run() {
        eprintln!("dslog: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut argv: Vec<String> = std::env::args().collect();
    if let Ok(opts) = std::env::var("DSLOG_OPTIONS") {
        let extra = tokenize_options(&opts).context("parsing DSLOG_OPTIONS")?;
        argv.splice(1..1, extra);
    }
    let args = Args::parse_from(argv);

    let facility = facility_code(&args.facility)
        .with_context(|| format!("unknown facility '{}'", args.facility))?;
    let priority = priority_code(&args.priority)
        .with_context(|| format!("unknown priority '{}'", args.priority))?;

    // stdout is not used for anything from here on; closed to mirror the
    // original, which frees the fd rather than leaving it dangling once
    // daemonized under `dmon`.
    drop(std::io::stdout());

    let ident = CString::new(std::env::args().next().unwrap_or_default()).unwrap_or_default();
    let mut flags = libc::LOG_PID;
    if args.console {
        flags |= libc::LOG_CONS;
    }
    unsafe {
        libc::openlog(ident.as_ptr(), flags, facility);
    }

    let input = unsafe { std::fs::File::from_raw_fd(args.input_fd) };
    let mut reader = BufReader::new(input);
    let mut line = String::new();
    let fmt = CString::new("%s").unwrap();

    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).context("error reading input")?;
        if bytes == 0 {
            break;
        }
        let text = line.trim_end_matches('\n');
        if args.skip_empty && text.is_empty() {
            continue;
        }
        if let Ok(ctext) = CString::new(text) {
            unsafe {
                libc::syslog(priority, fmt.as_ptr(), ctext.as_ptr());
            }
        }
    }

    unsafe {
        libc::closelog();
    }
    Ok(())
}

/// Mirrors `name_to_facility` in `dslog.c`, including its historical
/// synonyms (`kernel` for `kern`, `print`/`printer` for `lpr`).
fn facility_code(name: &str) -> Option<libc::c_int> {
    Some(match name {
        "auth" => libc::LOG_AUTH,
        "cron" => libc::LOG_CRON,
        "daemon" => libc::LOG_DAEMON,
        "ftp" => libc::LOG_FTP,
        "kern" | "kernel" => libc::LOG_KERN,
        "local0" => libc::LOG_LOCAL0,
        "local1" => libc::LOG_LOCAL1,
        "local2" => libc::LOG_LOCAL2,
        "local3" => libc::LOG_LOCAL3,
        "local4" => libc::LOG_LOCAL4,
        "local5" => libc::LOG_LOCAL5,
        "local6" => libc::LOG_LOCAL6,
        "local7" => libc::LOG_LOCAL7,
        "lpr" | "print" | "printer" => libc::LOG_LPR,
        "mail" => libc::LOG_MAIL,
        "news" => libc::LOG_NEWS,
        "user" => libc::LOG_USER,
        "uucp" => libc::LOG_UUCP,
        _ => return None,
    })
}

/// Mirrors `name_to_priority` in `dslog.c`.
fn priority_code(name: &str) -> Option<libc::c_int> {
    Some(match name {
        "emerg" | "panic" => libc::LOG_EMERG,
        "alert" => libc::LOG_ALERT,
        "crit" => libc::LOG_CRIT,
        "err" | "error" => libc::LOG_ERR,
        "warn" | "warning" => libc::LOG_WARNING,
        "notice" => libc::LOG_NOTICE,
        "info" => libc::LOG_INFO,
        "debug" => libc::LOG_DEBUG,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_canonical_facility_names() {
        assert_eq!(facility_code("daemon"), Some(libc::LOG_DAEMON));
        assert_eq!(facility_code("local7"), Some(libc::LOG_LOCAL7));
    }

    #[test]
    fn recognizes_facility_synonyms() {
        assert_eq!(facility_code("kernel"), facility_code("kern"));
        assert_eq!(facility_code("printer"), facility_code("lpr"));
        assert_eq!(facility_code("print"), facility_code("lpr"));
    }

    #[test]
    fn recognizes_priority_synonyms() {
        assert_eq!(priority_code("warning"), priority_code("warn"));
        assert_eq!(priority_code("error"), priority_code("err"));
        assert_eq!(priority_code("panic"), priority_code("emerg"));
    }

    #[test]
    fn rejects_unknown_names() {
        assert_eq!(facility_code("bogus"), None);
        assert_eq!(priority_code("bogus"), None);
    }
}
