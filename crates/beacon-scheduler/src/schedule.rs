use std::time::Duration;

use chrono::{NaiveDateTime, NaiveTime, Timelike};

use crate::types::Schedule;

/// Parse a strict `HH:MM:SS` time of day.
///
/// Shorter forms such as `7:30:00` or `07:30` are rejected so a typo fails at
/// registration instead of silently never matching.
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    let b = s.as_bytes();
    let shape_ok = b.len() == 8
        && b[2] == b':'
        && b[5] == b':'
        && [0, 1, 3, 4, 6, 7].iter().all(|&i| b[i].is_ascii_digit());
    if !shape_ok {
        return None;
    }
    NaiveTime::parse_from_str(s, "%H:%M:%S").ok()
}

/// Build a daily schedule from `HH:MM:SS` strings. Returns the offending
/// entry on failure.
pub fn daily_at<I, T>(times: I) -> Result<Schedule, String>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let mut parsed = Vec::new();
    for t in times {
        let t = t.as_ref();
        match parse_time_of_day(t) {
            Some(tod) => parsed.push(tod),
            None => return Err(format!("'{t}' is not a valid HH:MM:SS time")),
        }
    }
    if parsed.is_empty() {
        return Err("daily schedule needs at least one time".to_string());
    }
    Ok(Schedule::DailyAt(parsed))
}

/// Longest accepted interval: 365 days.
pub const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 3600);

/// Build an interval schedule. The period must be non-zero and at most
/// [`MAX_PERIOD`], so arming the timer can never overflow `Instant`.
pub fn every(period: Duration) -> Result<Schedule, String> {
    if period.is_zero() {
        return Err("interval must be greater than zero".to_string());
    }
    if period > MAX_PERIOD {
        return Err(format!(
            "interval of {}s exceeds the maximum of {}s",
            period.as_secs(),
            MAX_PERIOD.as_secs()
        ));
    }
    Ok(Schedule::Every(period))
}

/// The configured entry equal to `now` at second granularity, if any.
pub fn daily_match(times: &[NaiveTime], now: NaiveDateTime) -> Option<NaiveTime> {
    let now = now.time().with_nanosecond(0)?;
    times.iter().copied().find(|t| *t == now)
}
