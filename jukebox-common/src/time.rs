//! Duration parsing and formatting

use crate::{Error, Result};
use std::time::Duration;

/// Format a millisecond duration as `m:ss` (or `h:mm:ss` past one hour)
pub fn format_duration_ms(millis: u64) -> String {
    let total_secs = millis / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Parse a duration such as `1s`, `500ms`, `2m` or `1m30s`
///
/// Units: `ms`, `s`, `m`, `h`. A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidInput("empty duration".to_string()));
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(Error::InvalidInput(format!("invalid duration: {}", input)));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| Error::InvalidInput(format!("invalid duration: {}", input)))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            unit => {
                return Err(Error::InvalidInput(format!(
                    "unknown duration unit '{}' in {}",
                    unit, input
                )))
            }
        };
        total += part;
        rest = &rest[unit_len..];
    }
    Ok(total)
}
