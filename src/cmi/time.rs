//! Session-time formatting and parsing.
//!
//! SCORM 1.2 uses `HHHH:MM:SS.ss` timespans, SCORM 2004 uses ISO 8601
//! durations (`PT1H2M3.5S`).

use std::time::Duration;

use crate::version::ScormVersion;

/// Literal values that mean "content never really set the session time".
pub const UNSET_SESSION_TIMES: &[&str] = &[
    "",
    "PT0S",
    "PT0H0M0S",
    "PT0M0S",
    "PT0H0S",
    "PT0.0S",
    "PT0.00S",
    "PT0H0M0.0S",
    "PT0H0M0.00S",
    "P0D",
    "P0DT0H0M0S",
    "00:00:00",
    "00:00:00.0",
    "00:00:00.00",
    "0000:00:00",
    "0000:00:00.0",
    "0000:00:00.00",
];

pub fn is_unset_session_time(value: &str) -> bool {
    UNSET_SESSION_TIMES.contains(&value.trim())
}

fn split_centis(elapsed: Duration) -> (u64, u64, u64, u64) {
    let total_centis = elapsed.as_millis() as u64 / 10;
    let centis = total_centis % 100;
    let total_secs = total_centis / 100;
    (total_secs / 3600, (total_secs % 3600) / 60, total_secs % 60, centis)
}

/// `HHHH:MM:SS.ss`
pub fn format_timespan(elapsed: Duration) -> String {
    let (h, m, s, cs) = split_centis(elapsed);
    format!("{h:04}:{m:02}:{s:02}.{cs:02}")
}

/// `PTxHxMxS`, seconds carrying up to two decimals.
pub fn format_iso_duration(elapsed: Duration) -> String {
    let (h, m, s, cs) = split_centis(elapsed);
    if cs == 0 {
        format!("PT{h}H{m}M{s}S")
    } else {
        format!("PT{h}H{m}M{s}.{cs:02}S")
    }
}

pub fn format_session_time(version: ScormVersion, elapsed: Duration) -> String {
    match version {
        ScormVersion::Scorm12 => format_timespan(elapsed),
        ScormVersion::Scorm2004 => format_iso_duration(elapsed),
    }
}

/// Parse either representation.
pub fn parse_session_time(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.starts_with('P') {
        parse_iso_duration(value)
    } else {
        parse_timespan(value)
    }
}

fn parse_timespan(value: &str) -> Option<Duration> {
    let mut parts = value.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes > 59 || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    let whole = hours.checked_mul(3600)?.checked_add(minutes * 60)?;
    Duration::from_secs(whole).checked_add(Duration::try_from_secs_f64(seconds).ok()?)
}

fn parse_iso_duration(value: &str) -> Option<Duration> {
    let rest = value.strip_prefix('P')?;
    let (date, time) = match rest.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };

    let mut secs = 0f64;
    secs += sum_units(date, &[('Y', 31_536_000.0), ('M', 2_592_000.0), ('D', 86_400.0)])?;
    if let Some(time) = time {
        if time.is_empty() {
            return None;
        }
        secs += sum_units(time, &[('H', 3600.0), ('M', 60.0), ('S', 1.0)])?;
    }
    Duration::try_from_secs_f64(secs).ok()
}

/// Sum `<number><unit>` pairs; units must appear in the given order.
fn sum_units(mut input: &str, units: &[(char, f64)]) -> Option<f64> {
    let mut total = 0.0;
    let mut next_unit = 0;
    while !input.is_empty() {
        let end = input.find(|c: char| c.is_ascii_alphabetic())?;
        let number: f64 = input[..end].parse().ok()?;
        if !number.is_finite() || number.is_sign_negative() {
            return None;
        }
        let unit = input[end..].chars().next()?;
        let offset = units[next_unit..].iter().position(|(u, _)| *u == unit)?;
        total += number * units[next_unit + offset].1;
        next_unit += offset + 1;
        input = &input[end + unit.len_utf8()..];
    }
    Some(total)
}
