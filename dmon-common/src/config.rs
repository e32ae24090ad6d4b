//! Configuration-file grammar and `*_OPTIONS` environment tokenizer
//! grounded in `conf.c` and `util.c`'s
//! `replace_args_string`/`conf_parse`.
//!
//! Composition order (who gets to prepend tokens to argv) is the caller's
//! job; this module only turns a config-file's or an environment variable's
//! text into the tokens to prepend.

use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgKind {
    /// A bare flag, e.g. `--no-daemon`.
    None,
    /// A flag that takes one value, e.g. `--timeout 30`.
    Required,
}

#[derive(Clone, Copy, Debug)]
pub struct FlagSpec {
    pub name: &'static str,
    pub short: char,
    pub arg: ArgKind,
}

impl FlagSpec {
    pub const fn flag(name: &'static str, short: char) -> FlagSpec {
        FlagSpec { name, short, arg: ArgKind::None }
    }

    pub const fn value(name: &'static str, short: char) -> FlagSpec {
        FlagSpec { name, short, arg: ArgKind::Required }
    }
}

fn find_flag<'a>(specs: &'a [FlagSpec], name: &str) -> Option<&'a FlagSpec> {
    specs.iter().find(|s| s.name == name)
}

/// One `NAME VALUE` (or bare `NAME`) entry parsed out of a config file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigEntry {
    pub name: String,
    pub value: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{line}:{col} {message}")]
    Syntax { line: u32, col: u32, message: String },
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    look: Option<char>,
    line: u32,
    col: u32,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Parser<'a> {
        Parser {
            chars: input.chars().peekable(),
            look: None,
            line: 1,
            col: 0,
        }
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.col = 0;
            self.line += 1;
        }
        self.col += 1;
        c
    }

    fn advance(&mut self) {
        loop {
            self.look = self.next_char();
            if self.look == Some('#') {
                while self.look.is_some() && self.look != Some('\n') {
                    self.look = self.next_char();
                }
            } else {
                break;
            }
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.look, Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    fn err(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::Syntax {
            line: self.line,
            col: self.col,
            message: message.into(),
        }
    }

    fn parse_word(&mut self) -> Result<String, ConfigError> {
        let mut out = String::new();
        while matches!(self.look, Some(c) if !c.is_whitespace()) {
            out.push(self.look.unwrap());
            self.advance();
        }
        self.skip_ws();
        if out.is_empty() {
            return Err(self.err("Identifier expected"));
        }
        Ok(out)
    }

    fn parse_string(&mut self) -> Result<String, ConfigError> {
        let mut out = String::new();
        loop {
            let c = match self.next_char() {
                Some(c) => c,
                None => return Err(self.err("Unterminated string")),
            };
            if c == '"' {
                break;
            }
            if c == '\\' {
                let esc = self.next_char().ok_or_else(|| self.err("Unterminated string"))?;
                let resolved = match esc {
                    'n' => '\n',
                    'r' => '\r',
                    'b' => '\u{8}',
                    'e' => '\u{1b}',
                    'a' => '\u{7}',
                    't' => '\t',
                    'v' => '\u{b}',
                    'x' | 'X' => {
                        let h1 = self.next_char().ok_or_else(|| self.err("Invalid hex sequence"))?;
                        let h2 = self.next_char().ok_or_else(|| self.err("Invalid hex sequence"))?;
                        let n = u32::from_str_radix(&format!("{h1}{h2}"), 16)
                            .map_err(|_| self.err("Invalid hex sequence"))?;
                        char::from_u32(n).ok_or_else(|| self.err("Invalid hex sequence"))?
                    }
                    other => other,
                };
                out.push(resolved);
            } else {
                out.push(c);
            }
        }
        self.advance();
        self.skip_ws();
        Ok(out)
    }
}

impl fmt::Debug for ConfigEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:?}", self.name, self.value)
    }
}

/// Parses a config file's contents against `specs`. `#` begins a
/// to-end-of-line comment; each entry is `NAME VALUE` (a bare word) or
/// `NAME "quoted value"`.
pub fn parse_config_file(input: &str, specs: &[FlagSpec]) -> Result<Vec<ConfigEntry>, ConfigError> {
    let mut p = Parser::new(input);
    p.advance();
    p.skip_ws();

    let mut entries = Vec::new();
    while p.look.is_some() {
        let name = p.parse_word()?;
        let spec = find_flag(specs, &name)
            .ok_or_else(|| p.err(format!("No such option {name}")))?;

        let value = match spec.arg {
            ArgKind::None => None,
            ArgKind::Required => {
                if p.look == Some('"') {
                    p.next_char();
                    Some(p.parse_string()?)
                } else {
                    Some(p.parse_word()?)
                }
            }
        };
        entries.push(ConfigEntry { name, value });
    }
    Ok(entries)
}

/// Splits `s` on whitespace, honouring single/double quotes as in a shell,
/// per `replace_args_string` in `util.c`. A run of non-printable characters
/// outside of quotes is rejected.
pub fn tokenize_options(s: &str) -> Result<Vec<String>, ConfigError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;

    for c in s.chars() {
        if quote.is_none() && c.is_whitespace() {
            if in_token {
                tokens.push(std::mem::take(&mut current));
                in_token = false;
            }
            continue;
        }
        if let Some(q) = quote {
            if c == q {
                quote = None;
            } else {
                current.push(c);
            }
            in_token = true;
            continue;
        }
        if c == '"' || c == '\'' {
            quote = Some(c);
            in_token = true;
            continue;
        }
        if !c.is_ascii_graphic() && c != ' ' {
            return Err(ConfigError::Syntax {
                line: 0,
                col: 0,
                message: "non-printable character outside of quotes".into(),
            });
        }
        current.push(c);
        in_token = true;
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPECS: &[FlagSpec] = &[
        FlagSpec::flag("no-daemon", 'n'),
        FlagSpec::value("timeout", 't'),
        FlagSpec::value("write-info", 'I'),
    ];

    #[test]
    fn parses_bare_and_valued_entries() {
        let entries = parse_config_file("# comment\nno-daemon\ntimeout 30\n", SPECS).unwrap();
        assert_eq!(
            entries,
            vec![
                ConfigEntry { name: "no-daemon".into(), value: None },
                ConfigEntry { name: "timeout".into(), value: Some("30".into()) },
            ]
        );
    }

    #[test]
    fn parses_quoted_string_with_escapes() {
        let entries = parse_config_file("write-info \"/tmp/a\\tb\"\n", SPECS).unwrap();
        assert_eq!(entries[0].value.as_deref(), Some("/tmp/a\tb"));
    }

    #[test]
    fn rejects_unknown_option() {
        let err = parse_config_file("bogus\n", SPECS).unwrap_err();
        assert!(matches!(err, ConfigError::Syntax { .. }));
    }

    #[test]
    fn rejects_unterminated_string() {
        let err = parse_config_file("write-info \"unterminated\n", SPECS).unwrap_err();
        assert!(matches!(err, ConfigError::Syntax { .. }));
    }

    #[test]
    fn tokenizes_quoted_options() {
        let tokens = tokenize_options("-n --timeout '30' \"--write-info=/tmp/x\"").unwrap();
        assert_eq!(tokens, vec!["-n", "--timeout", "30", "--write-info=/tmp/x"]);
    }
}
