use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use std::time::Duration;

/// Returns the duration in Go's `time.Duration` notation, e.g. "2h0m0s",
/// "1m30s", "45s". Durations from `parse_go_duration` are whole seconds.
pub fn format_go_duration(d: Duration) -> String {
    let total = d.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Returns the compact form the cost API expects: zero components are
/// omitted, so 2h becomes "2h" and 90m becomes "1h30m".
pub fn format_api_duration(d: Duration) -> String {
    let total = d.as_secs();
    if total == 0 {
        return "0s".to_string();
    }
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    if seconds > 0 {
        out.push_str(&format!("{}s", seconds));
    }
    out
}

/// Parse a Go-style duration such as "2h", "90m", "1h30m15s" or "3000ms".
/// Returns None for empty input, unknown units, missing numbers or a total
/// that is not a whole number of seconds.
pub fn parse_go_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if input == "0" {
        return Some(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "h" => Duration::from_secs(value.checked_mul(3600)?),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "s" => Duration::from_secs(value),
            "ms" => Duration::from_millis(value),
            _ => return None,
        };
        total = total.checked_add(part)?;
    }
    if total.subsec_nanos() != 0 {
        return None;
    }
    Some(total)
}

/// Parse a report start time. Accepts "YYYY-MM-DD", "YYYY-MM-DDTHH:MM" and
/// RFC 3339. Values without an offset are taken as UTC.
pub fn parse_start_time(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Truncate a timestamp to the start of its hour in its own time zone.
pub fn hour_bucket<Tz: TimeZone>(t: &DateTime<Tz>) -> DateTime<Tz> {
    t.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or_else(|| t.clone())
}

/// Returns the window start as used in export filenames: "2024-03-01-09-00".
pub fn format_file_stamp(begin: &DateTime<Utc>) -> String {
    begin.format("%Y-%m-%d-%H-%M").to_string()
}

/// Returns "$123.45".
pub fn format_cost(amount: f64) -> String {
    format!("${:.2}", amount)
}

/// Returns "3h 25m", "12m" or "40s" for a second count.
pub fn format_seconds(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", seconds)
    }
}
