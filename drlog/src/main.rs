//! `drlog`: appends lines to `DIR/current`, rotating it out to a timestamped
//! file once it grows past a size or age limit, and pruning old rotated
//! files down to a retention count, grounded in `drlog.c`.
//!
//! `HUP` forces the current file closed so the next write reopens it (for
//! use alongside an external rotator); `INT`/`TERM` flush and exit. As in
//! `dlog`, this uses `signal-hook`'s flag registration rather than doing the
//! original's fsync/close/exit work inside the handler itself.

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use clap::Parser;
use dmon_common::config::tokenize_options;
use dmon_common::period::{parse_byte_size, parse_period_seconds};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::io::FromRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

const LOGFILE_PREFIX: &str = "log-";
const LOGFILE_CURRENT: &str = "current";
const LOGDIR_TSTAMP: &str = ".timestamp";
const LOGFILE_DEFMAX: u32 = 10;
const LOGFILE_DEFSIZE: u64 = 150 * 1024;
const LOGFILE_DEFTIME: u64 = 60 * 60 * 24 * 5;

#[derive(Parser, Debug)]
#[clap(about = "Append and rotate lines into a log directory")]
struct Args {
    /// Maximum number of rotated log files to keep.
    #[clap(short = 'm', long = "max-files", default_value_t = LOGFILE_DEFMAX)]
    max_files: u32,

    /// Maximum time to use a log file before rotating (suffixes: mhdw).
    #[clap(short = 'T', long = "max-time", default_value = "432000")]
    max_time: String,

    /// Maximum size of each log file before rotating (suffixes: kmg).
    #[clap(short = 's', long = "max-size", default_value = "153600")]
    max_size: String,

    /// File descriptor to read input from.
    #[clap(short, long = "input-fd", default_value = "0")]
    input_fd: i32,

    /// Buffered operation: do not fsync after each line.
    #[clap(short, long)]
    buffered: bool,

    /// Prepend a `YYYY-MM-DD/HH:MM:SS` timestamp to each line.
    #[clap(short, long)]
    timestamp: bool,

    /// Drop blank lines instead of logging them.
    #[clap(short = 'e', long = "skip-empty")]
    skip_empty: bool,

    /// Directory to write rotated logs into.
    logdir: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    if let Err(e) = run() {
        eprintln!("drlog: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut argv: Vec<String> = std::env::args().collect();
    if let Ok(opts) = std::env::var("DRLOG_OPTIONS") {
        let extra = tokenize_options(&opts).context("parsing DRLOG_OPTIONS")?;
        argv.splice(1..1, extra);
    }
    let args = Args::parse_from(argv);
    let max_time = parse_period_seconds(&args.max_time).context("invalid --max-time")?;
    let max_size = parse_byte_size(&args.max_size).context("invalid --max-size")?;

    let reopen = Arc::new(AtomicBool::new(false));
    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGHUP, Arc::clone(&reopen))?;
    signal_hook::flag::register(SIGINT, Arc::clone(&shutdown))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&shutdown))?;

    let mut log = RotatingLog::new(args.logdir.clone(), args.max_files, max_time, max_size);

    let input = unsafe { std::fs::File::from_raw_fd(args.input_fd) };
    let mut reader = BufReader::new(input);
    let mut line = String::new();
    let mut exit_code = 0;

    loop {
        if shutdown.swap(false, Ordering::SeqCst) {
            break;
        }
        if reopen.swap(false, Ordering::SeqCst) {
            log.close();
        }

        line.clear();
        let bytes = match reader.read_line(&mut line) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "unable to read from input");
                exit_code = 1;
                break;
            }
        };
        if bytes == 0 {
            break;
        }
        let text = line.trim_end_matches('\n');
        if args.skip_empty && text.is_empty() {
            continue;
        }
        log.write_line(text, args.timestamp, args.buffered)?;
    }

    log.close();
    std::process::exit(exit_code);
}

struct RotatingLog {
    directory: PathBuf,
    file: Option<File>,
    max_files: u32,
    max_time: u64,
    max_size: u64,
    cur_time: u64,
    cur_size: u64,
}

impl RotatingLog {
    fn new(directory: PathBuf, max_files: u32, max_time: u64, max_size: u64) -> RotatingLog {
        RotatingLog {
            directory,
            file: None,
            max_files,
            max_time,
            max_size,
            cur_time: 0,
            cur_size: 0,
        }
    }

    fn close(&mut self) {
        self.file = None;
    }

    fn write_line(&mut self, text: &str, timestamp: bool, buffered: bool) -> Result<()> {
        self.ensure_open()?;
        self.maybe_rotate()?;
        self.ensure_open()?;

        let mut out = String::new();
        if timestamp {
            out.push_str(&format_timestamp());
            out.push(' ');
        }
        out.push_str(text);
        out.push('\n');

        let file = self.file.as_mut().expect("ensure_open leaves file populated");
        loop {
            match file.write_all(out.as_bytes()) {
                Ok(()) => break,
                Err(e) => {
                    warn!(error = %e, "cannot write to logfile, retrying");
                    dmon_common::sys::safe_sleep(5);
                }
            }
        }
        self.cur_size += out.len() as u64;
        if !buffered {
            file.sync_all().context("fsync logfile")?;
        }
        Ok(())
    }

    /// Opens `DIR/current` if not already open, restoring or (re)seeding the
    /// `.timestamp` sidecar and the running size/time counters.
    fn ensure_open(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }

        let meta = std::fs::metadata(&self.directory)
            .with_context(|| format!("output directory does not exist: {}", self.directory.display()))?;
        if !meta.is_dir() {
            bail!("output path is not a directory: {}", self.directory.display());
        }

        let current_path = self.directory.join(LOGFILE_CURRENT);
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&current_path)
            .with_context(|| format!("cannot open '{}'", current_path.display()))?;

        let ts_path = self.directory.join(LOGDIR_TSTAMP);
        let ts = read_or_seed_timestamp(&ts_path)?;

        self.cur_time = if self.max_time > 0 { ts - (ts % self.max_time) } else { ts };
        self.cur_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.file = Some(file);
        Ok(())
    }

    /// Mirrors `flush_line`'s rotation check: past the size or age limit,
    /// rename `current` to a timestamped name, prune excess files, and drop
    /// the sidecar so the next `ensure_open` reseeds it.
    fn maybe_rotate(&mut self) -> Result<()> {
        if self.max_size == 0 || self.max_time == 0 {
            return Ok(());
        }
        let now = unix_now();
        if self.cur_size < self.max_size && now <= self.cur_time + self.max_time {
            return Ok(());
        }

        prune_old_logs(&self.directory, self.max_files)?;

        self.file = None;
        let current_path = self.directory.join(LOGFILE_CURRENT);
        let rotated_name = format!("{LOGFILE_PREFIX}{}", format_rotation_name(now));
        let rotated_path = self.directory.join(&rotated_name);
        if std::fs::rename(&current_path, &rotated_path).is_err() {
            let _ = std::fs::remove_file(&current_path);
        }
        let _ = std::fs::remove_file(self.directory.join(LOGDIR_TSTAMP));
        Ok(())
    }
}

fn read_or_seed_timestamp(path: &Path) -> Result<u64> {
    if let Ok(mut f) = File::open(path) {
        let mut contents = String::new();
        if f.read_to_string(&mut contents).is_ok() {
            if let Ok(ts) = contents.trim().parse::<u64>() {
                return Ok(ts);
            }
        }
    }
    let now = unix_now();
    let mut f = File::create(path).with_context(|| format!("unable to write timestamp to '{}'", path.display()))?;
    writeln!(f, "{now}")?;
    Ok(now)
}

/// Keeps at most `max_files` rotated logs, deleting the oldest first. Log
/// names are fixed-width zero-padded dates, so lexical order is chronological.
fn prune_old_logs(directory: &Path, max_files: u32) -> Result<()> {
    let mut names: Vec<String> = std::fs::read_dir(directory)
        .with_context(|| format!("unable to open directory '{}' for rotation", directory.display()))?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| is_rotated_log_name(n))
        .collect();
    names.sort();

    while names.len() >= max_files as usize && !names.is_empty() {
        let oldest = names.remove(0);
        let _ = std::fs::remove_file(directory.join(&oldest));
    }
    Ok(())
}

/// Validates `log-YYYY-MM-DD-HH:MM:SS`, mirroring the `sscanf` format string
/// in `rotate_log` in `drlog.c`.
fn is_rotated_log_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix(LOGFILE_PREFIX) else { return false };
    if rest.len() != 19 {
        return false;
    }
    let bytes = rest.as_bytes();
    let digit_positions: &[usize] = &[0, 1, 2, 3, 5, 6, 8, 9, 11, 12, 14, 15, 17, 18];
    let dash_positions: &[usize] = &[4, 7, 10];
    let colon_positions: &[usize] = &[13, 16];
    digit_positions.iter().all(|&i| bytes[i].is_ascii_digit())
        && dash_positions.iter().all(|&i| bytes[i] == b'-')
        && colon_positions.iter().all(|&i| bytes[i] == b':')
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn format_rotation_name(unix: u64) -> String {
    Utc.timestamp_opt(unix as i64, 0).unwrap().format("%Y-%m-%d-%H:%M:%S").to_string()
}

fn format_timestamp() -> String {
    Utc::now().format("%Y-%m-%d/%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_rotated_log_names() {
        assert!(is_rotated_log_name("log-2020-01-02-03:04:05"));
        assert!(!is_rotated_log_name("log-2020-01-02"));
        assert!(!is_rotated_log_name("current"));
        assert!(!is_rotated_log_name("log-20x0-01-02-03:04:05"));
    }

    #[test]
    fn prunes_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "log-2020-01-01-00:00:00",
            "log-2020-01-02-00:00:00",
            "log-2020-01-03-00:00:00",
        ] {
            File::create(dir.path().join(name)).unwrap();
        }
        // Pruning runs before the newly rotated file is added, so it leaves
        // room for max_files total once that file lands.
        prune_old_logs(dir.path(), 2).unwrap();
        let mut remaining: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().into_string().unwrap())
            .collect();
        remaining.sort();
        assert_eq!(remaining, vec!["log-2020-01-03-00:00:00"]);
    }
}
