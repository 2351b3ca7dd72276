//! Duration strings like "300ms", "1.5h" or "2h45m".
//!
//! A duration is a sequence of decimal numbers, each with an optional
//! fraction and a mandatory unit suffix. Valid units are `ns`, `us` (or
//! `µs`), `ms`, `s`, `m` and `h`. The bare string `"0"` is accepted.
//! Negative durations are rejected.

use std::time::Duration;

use crate::error::DurationError;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Parse a duration string.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationError::Empty);
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.starts_with('-') {
        return Err(DurationError::Negative(s.to_string()));
    }

    let mut rest = s.strip_prefix('+').unwrap_or(s);
    if rest.is_empty() {
        return Err(DurationError::Invalid(s.to_string()));
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..num_end];
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];

        if number.is_empty() || number == "." {
            return Err(DurationError::Invalid(s.to_string()));
        }

        let scale = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => NANOS_PER_MICRO,
            "ms" => NANOS_PER_MILLI,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3600 * NANOS_PER_SEC,
            "" => return Err(DurationError::MissingUnit(s.to_string())),
            other => {
                return Err(DurationError::UnknownUnit {
                    unit: other.to_string(),
                    input: s.to_string(),
                });
            }
        };

        let nanos = component_nanos(number, scale)
            .ok_or_else(|| DurationError::Invalid(s.to_string()))?;
        total = total
            .checked_add(nanos)
            .ok_or_else(|| DurationError::Overflow(s.to_string()))?;
    }

    let nanos = u64::try_from(total).map_err(|_| DurationError::Overflow(s.to_string()))?;
    Ok(Duration::from_nanos(nanos))
}

/// Convert one `<int>[.<frac>]` component with the given unit scale to nanoseconds.
fn component_nanos(number: &str, scale: u128) -> Option<u128> {
    let (int, frac) = number.split_once('.').unwrap_or((number, ""));
    if !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole: u128 = if int.is_empty() { 0 } else { int.parse().ok()? };
    let mut nanos = whole.checked_mul(scale)?;

    // Digits past 18 places cannot change the nanosecond result.
    let mut frac_value: u128 = 0;
    let mut divisor: u128 = 1;
    for c in frac.chars().take(18) {
        frac_value = frac_value * 10 + u128::from(c as u8 - b'0');
        divisor *= 10;
    }
    nanos = nanos.checked_add(frac_value * scale / divisor)?;
    Some(nanos)
}
