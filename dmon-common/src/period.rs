//! Period (time) and byte-size value parsing, grounded in
//! `util.c`'s `cflag_timei`/`cflag_bytes`-backed `_parse_limit_time` /
//! `_parse_limit_bytes` helpers.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid value: {0}")]
pub struct ParseValueError(pub String);

/// Parses `N[w|d|h|m]` (weeks/days/hours/minutes) or a bare unsuffixed
/// integer number of seconds.
pub fn parse_period_seconds(s: &str) -> Result<u64, ParseValueError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ParseValueError(s.to_string()));
    }
    let (digits, mult) = match s.chars().last().unwrap() {
        'w' => (&s[..s.len() - 1], 7 * 24 * 60 * 60),
        'd' => (&s[..s.len() - 1], 24 * 60 * 60),
        'h' => (&s[..s.len() - 1], 60 * 60),
        'm' => (&s[..s.len() - 1], 60),
        _ => (s, 1),
    };
    let n: u64 = digits.parse().map_err(|_| ParseValueError(s.to_string()))?;
    n.checked_mul(mult).ok_or_else(|| ParseValueError(s.to_string()))
}

/// Parses `N[k|m|g]` (x1024 multiples) or a bare unsuffixed byte count.
pub fn parse_byte_size(s: &str) -> Result<u64, ParseValueError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ParseValueError(s.to_string()));
    }
    let (digits, mult) = match s.chars().last().unwrap() {
        'k' | 'K' => (&s[..s.len() - 1], 1024u64),
        'm' | 'M' => (&s[..s.len() - 1], 1024 * 1024),
        'g' | 'G' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let n: u64 = digits.parse().map_err(|_| ParseValueError(s.to_string()))?;
    n.checked_mul(mult).ok_or_else(|| ParseValueError(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_seconds() {
        assert_eq!(parse_period_seconds("30").unwrap(), 30);
    }

    #[test]
    fn parses_suffixed_periods() {
        assert_eq!(parse_period_seconds("2h").unwrap(), 7200);
        assert_eq!(parse_period_seconds("1d").unwrap(), 86400);
        assert_eq!(parse_period_seconds("1w").unwrap(), 604800);
        assert_eq!(parse_period_seconds("5m").unwrap(), 300);
    }

    #[test]
    fn parses_byte_sizes() {
        assert_eq!(parse_byte_size("150k").unwrap(), 150 * 1024);
        assert_eq!(parse_byte_size("2m").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_byte_size("1024").unwrap(), 1024);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_period_seconds("abc").is_err());
        assert!(parse_byte_size("").is_err());
    }
}
