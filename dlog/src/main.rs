//! `dlog`: tags each input line with an optional timestamp and/or prefix and
//! appends it to a file or stdout, grounded in `dlog.c`.
//!
//! Signal handling uses `signal-hook`'s flag registration rather than the
//! original's do-everything-in-the-handler approach: `HUP` sets a reopen
//! flag, `INT`/`TERM` set a shutdown flag, both checked once per line. This
//! trades the original's immediate in-handler fsync/close/exit for a
//! bounded-by-one-line delay, acceptable for a log tagger that is not on
//! the supervisor's critical path.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use dmon_common::config::tokenize_options;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::io::FromRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

#[derive(Parser, Debug)]
#[clap(about = "Tag and append lines from a file descriptor to a log")]
struct Args {
    /// Insert this prefix string between the timestamp (if any) and the text.
    #[clap(short, long)]
    prefix: Option<String>,

    /// File descriptor to read input from.
    #[clap(short, long = "input-fd", default_value = "0")]
    input_fd: i32,

    /// Buffered operation: do not flush after each line.
    #[clap(short, long)]
    buffered: bool,

    /// Prepend a `YYYY-MM-DD/HH:MM:SS` timestamp to each line.
    #[clap(short, long)]
    timestamp: bool,

    /// Drop blank lines instead of logging them.
    #[clap(long = "skip-empty")]
    skip_empty: bool,

    /// Log file path; omit to write to stdout.
    logfile: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    if let Err(e) = run() {
        eprintln!("dlog: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut argv: Vec<String> = std::env::args().collect();
    if let Ok(opts) = std::env::var("DLOG_OPTIONS") {
        let extra = tokenize_options(&opts).context("parsing DLOG_OPTIONS")?;
        argv.splice(1..1, extra);
    }
    let args = Args::parse_from(argv);

    let reopen = Arc::new(AtomicBool::new(false));
    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGHUP, Arc::clone(&reopen))?;
    signal_hook::flag::register(SIGINT, Arc::clone(&shutdown))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&shutdown))?;

    let input = unsafe { std::fs::File::from_raw_fd(args.input_fd) };
    let mut reader = BufReader::new(input);

    let mut sink: LogSink = if let Some(path) = &args.logfile {
        LogSink::File(open_append(path)?)
    } else {
        LogSink::Stdout(std::io::stdout())
    };

    let mut line = String::new();
    loop {
        if shutdown.swap(false, Ordering::SeqCst) {
            break;
        }
        if reopen.swap(false, Ordering::SeqCst) {
            if let (LogSink::File(_), Some(path)) = (&sink, &args.logfile) {
                sink = LogSink::File(open_append(path)?);
            }
        }

        line.clear();
        let bytes = reader.read_line(&mut line).context("error reading input")?;
        if bytes == 0 {
            break;
        }
        let text = line.trim_end_matches('\n');
        if args.skip_empty && text.is_empty() {
            continue;
        }

        let mut out = String::new();
        if args.timestamp {
            out.push_str(&format_timestamp());
            out.push(' ');
        }
        if let Some(prefix) = &args.prefix {
            out.push_str(prefix);
            out.push(' ');
        }
        out.push_str(text);
        out.push('\n');

        if let Err(e) = sink.write_all(out.as_bytes()) {
            warn!(error = %e, "writing to log failed");
            continue;
        }
        if !args.buffered {
            if let Err(e) = sink.flush() {
                warn!(error = %e, "flushing log failed");
            }
        }
    }

    Ok(())
}

enum LogSink {
    Stdout(std::io::Stdout),
    File(std::fs::File),
}

impl LogSink {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            LogSink::Stdout(s) => s.write_all(buf),
            LogSink::File(f) => f.write_all(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            LogSink::Stdout(s) => s.flush(),
            LogSink::File(f) => f.sync_all(),
        }
    }
}

fn open_append(path: &PathBuf) -> Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open '{}'", path.display()))
}

/// `%Y-%m-%d/%H:%M:%S` in UTC, matching `TSTAMP_FMT` in `dlog.c`.
fn format_timestamp() -> String {
    Utc::now().format("%Y-%m-%d/%H:%M:%S").to_string()
}
