//! Resource-limit name table and `name=value` parsing
//! grounded in `util.c`'s `rlimit_specs[]`.

use crate::period::{parse_byte_size, parse_period_seconds};
use crate::sys;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ValueKind {
    Bytes,
    Time,
    Number,
}

struct LimitSpec {
    name: &'static str,
    resource: libc::c_int,
    kind: ValueKind,
    desc: &'static str,
}

/// Mirrors `rlimit_specs[]`: each entry's `kind` governs how its `value`
/// string is parsed, which is not uniform (e.g. `msgq`'s doc string talks
/// about bytes but the original parses it as a plain number; preserved here).
const LIMITS: &[LimitSpec] = &[
    LimitSpec { name: "vmem", resource: libc::RLIMIT_AS, kind: ValueKind::Bytes, desc: "Maximum size of process' virtual memory (bytes)" },
    LimitSpec { name: "core", resource: libc::RLIMIT_CORE, kind: ValueKind::Bytes, desc: "Maximum size of core file (bytes)" },
    LimitSpec { name: "cpu", resource: libc::RLIMIT_CPU, kind: ValueKind::Time, desc: "Maximum CPU time used (seconds)" },
    LimitSpec { name: "data", resource: libc::RLIMIT_DATA, kind: ValueKind::Bytes, desc: "Maximum size of data segment (bytes)" },
    LimitSpec { name: "fsize", resource: libc::RLIMIT_FSIZE, kind: ValueKind::Bytes, desc: "Maximum size of created files (bytes)" },
    LimitSpec { name: "locks", resource: libc::RLIMIT_LOCKS, kind: ValueKind::Number, desc: "Maximum number of locked files" },
    LimitSpec { name: "mlock", resource: libc::RLIMIT_MEMLOCK, kind: ValueKind::Bytes, desc: "Maximum number of bytes locked in RAM (bytes)" },
    LimitSpec { name: "msgq", resource: libc::RLIMIT_MSGQUEUE, kind: ValueKind::Number, desc: "Maximum number of bytes used in message queues (bytes)" },
    LimitSpec { name: "nice", resource: libc::RLIMIT_NICE, kind: ValueKind::Number, desc: "Ceiling for the process nice value" },
    LimitSpec { name: "files", resource: libc::RLIMIT_NOFILE, kind: ValueKind::Number, desc: "Maximum number of open files" },
    LimitSpec { name: "nproc", resource: libc::RLIMIT_NPROC, kind: ValueKind::Number, desc: "Maximum number of processes" },
    LimitSpec { name: "rss", resource: libc::RLIMIT_RSS, kind: ValueKind::Number, desc: "Maximum number of pages resident in RAM" },
    LimitSpec { name: "rtprio", resource: libc::RLIMIT_RTPRIO, kind: ValueKind::Number, desc: "Ceiling for the real-time priority" },
    LimitSpec { name: "rttime", resource: libc::RLIMIT_RTTIME, kind: ValueKind::Time, desc: "Maximum real-time CPU time used (seconds)" },
    LimitSpec { name: "sigpending", resource: libc::RLIMIT_SIGPENDING, kind: ValueKind::Number, desc: "Maximum number of queued signals" },
    LimitSpec { name: "stack", resource: libc::RLIMIT_STACK, kind: ValueKind::Bytes, desc: "Maximum stack segment size (bytes)" },
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RlimitError {
    #[error("unknown resource limit name")]
    UnknownName,
    #[error("malformed resource limit value")]
    BadValue,
}

/// Returns `Ok(None)` for the special `help` argument (caller should print
/// [`format_help`] and exit cleanly), `Ok(Some((resource, value)))` on a
/// successfully parsed `name=value`, or an error.
pub fn parse_limit_arg(arg: &str) -> Result<Option<(libc::c_int, i64)>, RlimitError> {
    if arg == "help" {
        return Ok(None);
    }
    let (name, value) = arg.split_once('=').ok_or(RlimitError::UnknownName)?;
    let spec = LIMITS.iter().find(|s| s.name == name).ok_or(RlimitError::UnknownName)?;
    let parsed: i64 = match spec.kind {
        ValueKind::Bytes => parse_byte_size(value).map_err(|_| RlimitError::BadValue)? as i64,
        ValueKind::Time => parse_period_seconds(value).map_err(|_| RlimitError::BadValue)? as i64,
        ValueKind::Number => {
            if let Some(rest) = value.strip_prefix('-') {
                -(rest.parse::<i64>().map_err(|_| RlimitError::BadValue)?)
            } else {
                value.parse().map_err(|_| RlimitError::BadValue)?
            }
        }
    };
    Ok(Some((spec.resource, parsed)))
}

pub fn format_help() -> String {
    LIMITS.iter().map(|s| format!("{} -- {}\n", s.name, s.desc)).collect()
}

pub fn limit_name(resource: libc::c_int) -> &'static str {
    LIMITS.iter().find(|s| s.resource == resource).map(|s| s.name).unwrap_or("<unknown>")
}

/// Applies a parsed `(resource, value)` pair to the current process, via
/// get-then-set with clamping to the hard maximum.
pub fn apply(resource: libc::c_int, value: i64) -> std::io::Result<()> {
    sys::apply_rlimit(resource, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_byte_limit() {
        let (resource, value) = parse_limit_arg("core=150k").unwrap().unwrap();
        assert_eq!(resource, libc::RLIMIT_CORE);
        assert_eq!(value, 150 * 1024);
    }

    #[test]
    fn parses_time_limit() {
        let (resource, value) = parse_limit_arg("cpu=2h").unwrap().unwrap();
        assert_eq!(resource, libc::RLIMIT_CPU);
        assert_eq!(value, 7200);
    }

    #[test]
    fn parses_negative_as_hard_max_sentinel() {
        let (_, value) = parse_limit_arg("nproc=-1").unwrap().unwrap();
        assert_eq!(value, -1);
    }

    #[test]
    fn help_short_circuits() {
        assert_eq!(parse_limit_arg("help").unwrap(), None);
    }

    #[test]
    fn rejects_unknown_name() {
        assert_eq!(parse_limit_arg("bogus=1").unwrap_err(), RlimitError::UnknownName);
    }
}
