//! The status side-channel: a line-buffered append-only file
//! or FIFO that the main loop writes fixed-grammar lifecycle lines to.
//! Never touched from the signal handler; write failures are warnings.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::warn;

/// Which task a status line is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Cmd,
    Log,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Role::Cmd => "cmd",
            Role::Log => "log",
        }
    }
}

pub struct StatusSink {
    file: File,
}

impl StatusSink {
    /// Opens `path` append-only, creating it if absent,.
    pub fn open(path: &Path) -> io::Result<StatusSink> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .custom_flags(libc::O_APPEND)
            .open(path)?;
        Ok(StatusSink { file })
    }

    fn write_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.file, "{line}") {
            warn!(error = %e, "failed to write status line");
            return;
        }
        if let Err(e) = self.file.flush() {
            warn!(error = %e, "failed to flush status sink");
        }
    }

    /// `cmd|log start`, to be followed immediately by [`pid`].
    pub fn start(&mut self, role: Role) {
        self.write_line(&format!("{} start", role.label()));
    }

    /// The bare pid line that must follow a [`start`] line.
    pub fn pid(&mut self, pid: i32) {
        self.write_line(&pid.to_string());
    }

    pub fn stop(&mut self, role: Role, pid: i32) {
        self.write_line(&format!("{} stop {pid}", role.label()));
    }

    pub fn signal(&mut self, role: Role, pid: i32, signum: i32) {
        self.write_line(&format!("{} signal {pid} {signum}", role.label()));
    }

    pub fn exit(&mut self, role: Role, pid: i32, status: i32) {
        self.write_line(&format!("{} exit {pid} {status}", role.label()));
    }

    /// `cmd`-only lines: `timeout`, `resume`, `pause`.
    pub fn cmd_timeout(&mut self, pid: i32) {
        self.write_line(&format!("cmd timeout {pid}"));
    }

    pub fn cmd_resume(&mut self, pid: i32) {
        self.write_line(&format!("cmd resume {pid}"));
    }

    pub fn cmd_pause(&mut self, pid: i32) {
        self.write_line(&format!("cmd pause {pid}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn emits_fixed_grammar_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status");
        {
            let mut sink = StatusSink::open(&path).unwrap();
            sink.start(Role::Cmd);
            sink.pid(1234);
            sink.exit(Role::Cmd, 1234, 256);
            sink.cmd_timeout(5678);
        }
        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(
            contents,
            "cmd start\n1234\ncmd exit 1234 256\ncmd timeout 5678\n"
        );
    }
}
