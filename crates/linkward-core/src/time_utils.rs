use chrono::{DateTime, TimeZone, Utc};

/// Parses a chat message timestamp of the form `"<seconds>.<fraction>"`
/// (e.g. `"1723111111.000200"`) into a UTC datetime.
///
/// The fractional part is optional and read as a decimal fraction of a
/// second. Returns `None` for anything that does not look like a
/// non-negative epoch timestamp.
pub fn message_ts_to_datetime(ts: &str) -> Option<DateTime<Utc>> {
    let trimmed = ts.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (secs_part, frac_part) = match trimmed.split_once('.') {
        Some((secs, frac)) => (secs, Some(frac)),
        None => (trimmed, None),
    };

    let secs: i64 = secs_part.parse().ok()?;
    if secs < 0 {
        return None;
    }

    let nanos = match frac_part {
        Some(frac) if !frac.is_empty() => {
            if frac.chars().any(|ch| !ch.is_ascii_digit()) {
                return None;
            }
            // Scale the fraction to nanoseconds, truncating past 9 digits.
            let digits: String = frac.chars().take(9).collect();
            let value: u32 = digits.parse().ok()?;
            value * 10u32.pow(9 - digits.len() as u32)
        }
        _ => 0,
    };

    unix_secs_to_datetime(secs, nanos)
}

/// Converts epoch seconds plus a nanosecond component into a UTC datetime.
pub fn unix_secs_to_datetime(secs: i64, nanos: u32) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, nanos).single()
}
