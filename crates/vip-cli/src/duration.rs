//! Human-friendly durations for CLI flags

use std::time::Duration;

/// Parse a duration such as `15m`, `30s`, `1h`, or raw seconds.
///
/// Returns a plain message so it can serve as a clap `value_parser`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let invalid = || format!("invalid duration '{}', expected e.g. 1h, 15m, 90s", s);

    let (digits, unit) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&s[..i], c),
        _ => (s, 's'),
    };
    let n: u64 = digits.trim().parse().map_err(|_| invalid())?;
    let secs = match unit {
        'h' => n.checked_mul(3600),
        'm' => n.checked_mul(60),
        's' => Some(n),
        _ => None,
    }
    .ok_or_else(invalid)?;

    if secs == 0 {
        return Err(format!("duration '{}' must be greater than zero", s));
    }
    Ok(Duration::from_secs(secs))
}
