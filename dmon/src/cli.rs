//! Configuration composition and flag parsing grounded in
//! `dmon.c`'s `dmon_options[]` table and its config-file/env-var/argv
//! composition order in `dmon_main`.
//!
//! Hand-rolled rather than built on `clap`: the flag grammar needs to stop
//! parsing at the first non-flag token (the command) and hand everything
//! from there on through untouched, including a second `--`-delimited argv
//! for the log command. That does not fit a declarative derive.

use anyhow::{anyhow, bail, Context, Result};
use dmon_common::config::{parse_config_file, tokenize_options, ArgKind, FlagSpec};
use dmon_common::period::parse_period_seconds;
use dmon_common::rlimit::parse_limit_arg;
use std::path::PathBuf;

/// The flag table, shared between config-file validation and argv parsing.
/// Order matches the precedence table below; `config` is handled separately since
/// it is only legal as the first command-line token.
pub const SPECS: &[FlagSpec] = &[
    FlagSpec::flag("no-daemon", 'n'),
    FlagSpec::flag("stderr-redir", 'e'),
    FlagSpec::flag("cmd-sigs", 's'),
    FlagSpec::flag("log-sigs", 'S'),
    FlagSpec::flag("once", '1'),
    FlagSpec::value("max-respawns", 'm'),
    FlagSpec::value("write-info", 'I'),
    FlagSpec::value("pid-file", 'p'),
    FlagSpec::value("work-dir", 'W'),
    FlagSpec::value("load-high", 'L'),
    FlagSpec::value("load-low", 'l'),
    FlagSpec::value("timeout", 't'),
    FlagSpec::value("interval", 'i'),
    FlagSpec::value("environ", 'E'),
    FlagSpec::value("limit", 'r'),
    FlagSpec::value("cmd-user", 'u'),
    FlagSpec::value("log-user", 'U'),
];

#[derive(Debug, Default)]
pub struct Config {
    pub no_daemon: bool,
    pub stderr_redir: bool,
    pub cmd_sigs: bool,
    pub log_sigs: bool,
    pub once: bool,
    pub max_respawns: Option<i64>,
    pub write_info: Option<PathBuf>,
    pub pid_file: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub load_high: f64,
    pub load_low: f64,
    pub timeout: u64,
    pub interval: u64,
    pub environ: Vec<(String, Option<String>)>,
    pub limits: Vec<(libc::c_int, i64)>,
    pub cmd_user: Option<String>,
    pub log_user: Option<String>,
    pub cmd_argv: Vec<String>,
    pub log_argv: Option<Vec<String>>,
}

/// Assembles the effective token stream (config file, then `DMON_OPTIONS`,
/// then the process argv) and parses it into a [`Config`].
pub fn compose_and_parse(argv: Vec<String>) -> Result<Config> {
    let mut tokens = argv;

    if tokens.len() > 1 && (tokens[0] == "-C" || tokens[0] == "--config") {
        let path = tokens[1].clone();
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot open file '{path}'"))?;
        let entries = parse_config_file(&contents, SPECS)
            .with_context(|| format!("error parsing {path}"))?;
        let mut prepend = Vec::new();
        for entry in entries {
            prepend.push(format!("--{}", entry.name));
            if let Some(value) = entry.value {
                prepend.push(value);
            }
        }
        tokens.splice(0..2, std::iter::empty());
        tokens.splice(0..0, prepend);
    }

    if let Ok(opts_env) = std::env::var("DMON_OPTIONS") {
        let extra = tokenize_options(&opts_env).context("parsing DMON_OPTIONS")?;
        tokens.splice(0..0, extra);
    }

    parse_tokens(&tokens)
}

fn parse_tokens(tokens: &[String]) -> Result<Config> {
    let mut cfg = Config::default();
    let mut idx = 0;

    while idx < tokens.len() {
        let tok = &tokens[idx];
        let (name, inline_value) = match parse_flag_token(tok) {
            Some(parsed) => parsed,
            None => break,
        };
        let spec = SPECS
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| anyhow!("unknown option '{tok}'"))?;

        let value = match spec.arg {
            ArgKind::None => {
                idx += 1;
                None
            }
            ArgKind::Required => {
                if let Some(v) = inline_value {
                    idx += 1;
                    Some(v)
                } else {
                    let v = tokens
                        .get(idx + 1)
                        .ok_or_else(|| anyhow!("option '{tok}' requires an argument"))?
                        .clone();
                    idx += 2;
                    Some(v)
                }
            }
        };

        apply_flag(&mut cfg, spec.name, value)?;
    }

    let rest = &tokens[idx..];
    let split = rest.iter().position(|t| t == "--");
    let (cmd, log) = match split {
        Some(at) => (&rest[..at], Some(rest[at + 1..].to_vec())),
        None => (rest, None),
    };

    if cmd.is_empty() {
        bail!("no command to run given");
    }
    if cfg.interval > 0 && cfg.once {
        bail!("options 'interval' and 'once' cannot be used together");
    }
    if cfg.load_high > 0.0 && cfg.load_low.abs() < 1e-9 {
        cfg.load_low = cfg.load_high / 2.0;
    }

    cfg.cmd_argv = cmd.to_vec();
    cfg.log_argv = log;
    Ok(cfg)
}

/// Recognises `-X`, `-Xvalue`, `--name`, `--name=value`. Returns `None` for
/// anything that is not a flag token at all (the first such token begins
/// the command argv).
fn parse_flag_token(tok: &str) -> Option<(String, Option<String>)> {
    if let Some(rest) = tok.strip_prefix("--") {
        return match rest.split_once('=') {
            Some((name, value)) => Some((name.to_string(), Some(value.to_string()))),
            None => Some((rest.to_string(), None)),
        };
    }
    if tok.len() >= 2 && tok.starts_with('-') && tok != "-" {
        let short = tok.chars().nth(1).unwrap();
        let name = SPECS.iter().find(|s| s.short == short)?.name.to_string();
        let inline = if tok.len() > 2 { Some(tok[2..].to_string()) } else { None };
        return Some((name, inline));
    }
    None
}

fn apply_flag(cfg: &mut Config, name: &str, value: Option<String>) -> Result<()> {
    match name {
        "no-daemon" => cfg.no_daemon = true,
        "stderr-redir" => cfg.stderr_redir = true,
        "cmd-sigs" => cfg.cmd_sigs = true,
        "log-sigs" => cfg.log_sigs = true,
        "once" => cfg.once = true,
        "max-respawns" => cfg.max_respawns = Some(value.unwrap().parse()?),
        "write-info" => cfg.write_info = Some(PathBuf::from(value.unwrap())),
        "pid-file" => cfg.pid_file = Some(PathBuf::from(value.unwrap())),
        "work-dir" => cfg.work_dir = Some(PathBuf::from(value.unwrap())),
        "load-high" => cfg.load_high = value.unwrap().parse()?,
        "load-low" => cfg.load_low = value.unwrap().parse()?,
        "timeout" => cfg.timeout = parse_period_seconds(&value.unwrap())?,
        "interval" => cfg.interval = parse_period_seconds(&value.unwrap())?,
        "environ" => {
            let v = value.unwrap();
            match v.split_once('=') {
                Some((var, val)) => cfg.environ.push((var.to_string(), Some(val.to_string()))),
                None => cfg.environ.push((v, None)),
            }
        }
        "limit" => {
            let v = value.unwrap();
            if v == "help" {
                print!("{}", dmon_common::rlimit::format_help());
                std::process::exit(0);
            }
            // Re-derive the byte/time classification through the shared parser.
            if let Some((resource, parsed)) = parse_limit_arg(&v)? {
                cfg.limits.push((resource, parsed));
            }
        }
        "cmd-user" => cfg.cmd_user = Some(value.unwrap()),
        "log-user" => cfg.log_user = Some(value.unwrap()),
        _ => unreachable!("SPECS and apply_flag are out of sync"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_cmd_and_log_argv() {
        let tokens: Vec<String> = vec!["-n", "-t", "5", "sleep", "60", "--", "cat"]
            .into_iter()
            .map(String::from)
            .collect();
        let cfg = parse_tokens(&tokens).unwrap();
        assert!(cfg.no_daemon);
        assert_eq!(cfg.timeout, 5);
        assert_eq!(cfg.cmd_argv, vec!["sleep", "60"]);
        assert_eq!(cfg.log_argv, Some(vec!["cat".to_string()]));
    }

    #[test]
    fn rejects_interval_with_once() {
        let tokens: Vec<String> = vec!["-1", "-i", "2", "sh"].into_iter().map(String::from).collect();
        assert!(parse_tokens(&tokens).is_err());
    }

    #[test]
    fn defaults_load_low_to_half_load_high() {
        let tokens: Vec<String> = vec!["-L", "4.0", "sleep", "1"].into_iter().map(String::from).collect();
        let cfg = parse_tokens(&tokens).unwrap();
        assert_eq!(cfg.load_low, 2.0);
    }

    #[test]
    fn rejects_missing_command() {
        let tokens: Vec<String> = vec!["-n".to_string()];
        assert!(parse_tokens(&tokens).is_err());
    }
}
