//! `denv`: builds an environment from inherited variables, explicit
//! `NAME=VALUE` settings, an `environment.d`-style directory, or a file, then
//! execs the given command into it, grounded in `denv.c`.
//!
//! Each flag mutates the environment being built as it is parsed, so (unlike
//! `dlog`/`dslog`/`drlog`) this is hand-rolled argument processing rather than
//! `clap::Parser`: order matters (`-E FOO=1 -i FOO` overwrites, not the
//! reverse), which a declarative struct-of-fields parser cannot express.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::Command;
use tracing::debug;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    if let Err(e) = run() {
        eprintln!("denv: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let argv: Vec<String> = std::env::args().collect();
    let prog = Path::new(&argv[0])
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut env = EnvBuilder::new();

    let child_argv: Vec<String> = if prog == "envdir" {
        if argv.len() < 3 {
            bail!("usage: {prog} dir child [args...]");
        }
        env.inherit_all();
        env.load_dir(Path::new(&argv[1]))?;
        argv[2..].to_vec()
    } else {
        let mut i = 1;
        loop {
            if i >= argv.len() {
                bail!("no command specified");
            }
            let tok = &argv[i];
            match parse_flag(tok) {
                Some(("inherit-env", None)) => {
                    env.inherit_all();
                    i += 1;
                }
                Some(("inherit", inline)) => {
                    let (value, consumed) = take_value(&argv, i, inline)?;
                    env.inherit_one(&value);
                    i += consumed;
                }
                Some(("environ", inline)) => {
                    let (value, consumed) = take_value(&argv, i, inline)?;
                    env.apply_spec(&value);
                    i += consumed;
                }
                Some(("envdir", inline)) => {
                    let (value, consumed) = take_value(&argv, i, inline)?;
                    env.load_dir(Path::new(&value))?;
                    i += consumed;
                }
                Some(("file", inline)) => {
                    let (value, consumed) = take_value(&argv, i, inline)?;
                    env.load_file(Path::new(&value))?;
                    i += consumed;
                }
                Some(("help", None)) => {
                    print_help(&prog);
                    std::process::exit(0);
                }
                Some((name, _)) => bail!("unknown option '{name}'"),
                None => break,
            }
        }
        argv[i..].to_vec()
    };

    if child_argv.is_empty() {
        bail!("no command specified");
    }

    let err = env.exec(&child_argv);
    Err(err).with_context(|| format!("cannot execute '{}'", child_argv[0]))
}

/// Recognizes `--name`, `--name=value`, `-x`, `-xvalue` against the fixed
/// short-letter table `denv_options` uses in the original.
fn parse_flag(tok: &str) -> Option<(&'static str, Option<String>)> {
    if let Some(rest) = tok.strip_prefix("--") {
        let (name, inline) = match rest.split_once('=') {
            Some((n, v)) => (n, Some(v.to_string())),
            None => (rest, None),
        };
        return Some((canonical_name(name)?, inline));
    }
    if let Some(rest) = tok.strip_prefix('-') {
        if rest.is_empty() {
            return None;
        }
        let letter = rest.chars().next().unwrap();
        let name = canonical_letter(letter)?;
        let inline = if rest.len() > 1 { Some(rest[letter.len_utf8()..].to_string()) } else { None };
        return Some((name, inline));
    }
    None
}

fn canonical_name(name: &str) -> Option<&'static str> {
    match name {
        "inherit-env" => Some("inherit-env"),
        "inherit" => Some("inherit"),
        "environ" => Some("environ"),
        "envdir" => Some("envdir"),
        "file" => Some("file"),
        "help" => Some("help"),
        _ => None,
    }
}

fn canonical_letter(letter: char) -> Option<&'static str> {
    match letter {
        'I' => Some("inherit-env"),
        'i' => Some("inherit"),
        'E' => Some("environ"),
        'd' => Some("envdir"),
        'f' => Some("file"),
        'h' => Some("help"),
        _ => None,
    }
}

fn take_value(argv: &[String], i: usize, inline: Option<String>) -> Result<(String, usize)> {
    match inline {
        Some(v) => Ok((v, 1)),
        None => {
            let v = argv.get(i + 1).context("option requires a value")?;
            Ok((v.clone(), 2))
        }
    }
}

fn print_help(prog: &str) {
    println!("usage: {prog} [options] [path] command [command-options...]");
    println!("  -I, --inherit-env        Inherit all environment variables of the calling process.");
    println!("  -i, --inherit VAR        Inherit one environment variable of the calling process.");
    println!("  -E, --environ NAME[=VAL] Set (or, with no value, delete) an environment variable.");
    println!("  -d, --envdir DIR         Add environment variables from files in a directory.");
    println!("  -f, --file PATH          Add environment variables from an environment.d(5) file.");
    println!("  -h, --help               Show this help and exit.");
}

const TRIM_CHARS: &[char] = &['\r', '\n', '\x0b', '\t', '\x0c', ' '];

/// The environment being assembled, built up by sequential `add`/`del`
/// operations exactly as `env_add`/`env_del` do in `denv.c`: setting a
/// variable that is already present moves it to the end, rather than
/// updating it in place.
struct EnvBuilder {
    entries: Vec<(String, String)>,
}

impl EnvBuilder {
    fn new() -> EnvBuilder {
        EnvBuilder { entries: Vec::new() }
    }

    fn add(&mut self, name: &str, value: &str) {
        self.entries.retain(|(n, _)| n != name);
        self.entries.push((name.to_string(), value.to_string()));
    }

    fn del(&mut self, name: &str) {
        self.entries.retain(|(n, _)| n != name);
    }

    fn inherit_all(&mut self) {
        for (name, value) in std::env::vars() {
            self.add(&name, &value);
        }
    }

    fn inherit_one(&mut self, name: &str) {
        match std::env::var(name) {
            Ok(value) => self.add(name, &value),
            Err(_) => debug!(name, "cannot inherit undefined variable"),
        }
    }

    /// `NAME=VALUE` sets; a bare `NAME` with no `=` deletes.
    fn apply_spec(&mut self, spec: &str) {
        match spec.split_once('=') {
            Some((name, value)) => self.add(name, value),
            None => self.del(spec),
        }
    }

    /// One file per variable: the file name is the variable name, its first
    /// line (trimmed) is the value. An empty file deletes the variable.
    /// Dotfiles and non-regular entries are skipped.
    fn load_dir(&mut self, dir: &Path) -> Result<()> {
        let read_dir = std::fs::read_dir(dir).with_context(|| format!("cannot open directory '{}'", dir.display()))?;
        for entry in read_dir {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            if meta.len() == 0 {
                self.del(&name);
                continue;
            }
            let contents = std::fs::read_to_string(entry.path())
                .with_context(|| format!("cannot read '{}'", entry.path().display()))?;
            let value = contents.lines().next().unwrap_or("").trim_matches(TRIM_CHARS);
            self.add(&name, value);
        }
        Ok(())
    }

    /// `environment.d(5)` format: one `NAME=VALUE` per line, a line whose
    /// first non-blank character is `#` is a comment, blank lines are
    /// ignored, and a trailing-bare `NAME=` with no value deletes that
    /// variable.
    fn load_file(&mut self, path: &Path) -> Result<()> {
        let contents = std::fs::read_to_string(path).with_context(|| format!("cannot read '{}'", path.display()))?;
        for raw_line in contents.lines() {
            let line = raw_line.trim_matches(TRIM_CHARS);
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((name, value)) = line.split_once('=') else {
                continue;
            };
            if value.is_empty() {
                self.del(name);
            } else {
                self.add(name, value);
            }
        }
        Ok(())
    }

    /// Replaces the current process image, matching `execvpe` in the
    /// original. Only returns on failure.
    fn exec(&self, argv: &[String]) -> std::io::Error {
        use std::os::unix::process::CommandExt;
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd.env_clear();
        for (name, value) in &self.entries {
            cmd.env(name, value);
        }
        cmd.exec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_moves_existing_var_to_end() {
        let mut env = EnvBuilder::new();
        env.add("A", "1");
        env.add("B", "2");
        env.add("A", "3");
        assert_eq!(env.entries, vec![("B".into(), "2".into()), ("A".into(), "3".into())]);
    }

    #[test]
    fn apply_spec_deletes_on_bare_name() {
        let mut env = EnvBuilder::new();
        env.add("A", "1");
        env.apply_spec("A");
        assert!(env.entries.is_empty());
    }

    #[test]
    fn load_dir_reads_first_line_and_deletes_on_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("FOO"), "bar\nignored\n").unwrap();
        std::fs::write(dir.path().join("BAZ"), "").unwrap();
        let mut env = EnvBuilder::new();
        env.add("BAZ", "old");
        env.load_dir(dir.path()).unwrap();
        assert!(env.entries.contains(&("FOO".to_string(), "bar".to_string())));
        assert!(!env.entries.iter().any(|(n, _)| n == "BAZ"));
    }

    #[test]
    fn load_file_skips_comments_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env");
        std::fs::write(&path, "# comment\n\nFOO=bar\nBAZ=\n").unwrap();
        let mut env = EnvBuilder::new();
        env.add("BAZ", "old");
        env.load_file(&path).unwrap();
        assert!(env.entries.contains(&("FOO".to_string(), "bar".to_string())));
        assert!(!env.entries.iter().any(|(n, _)| n == "BAZ"));
    }

    #[test]
    fn parses_long_and_short_flags() {
        assert_eq!(parse_flag("--inherit-env"), Some(("inherit-env", None)));
        assert_eq!(parse_flag("-ifoo"), Some(("inherit", Some("foo".to_string()))));
        assert_eq!(parse_flag("--environ=FOO=1"), Some(("environ", Some("FOO=1".to_string()))));
        assert_eq!(parse_flag("-E"), Some(("environ", None)));
    }
}
