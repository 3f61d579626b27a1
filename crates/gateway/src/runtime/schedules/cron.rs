//! Timezone-aware cron evaluator (5-field: min hour dom month dow).
//!
//! Matching is minute-granular; the runner's per-minute fire record makes
//! dispatch idempotent however often the ticker lands inside a matching
//! minute. Missed minutes are never back-filled.

use bh_domain::{Error, Result};
use chrono::{DateTime, Datelike, Timelike, Utc};

/// Parse a timezone string into a `chrono_tz::Tz`, falling back to UTC.
pub fn parse_tz(tz: &str) -> chrono_tz::Tz {
    tz.parse::<chrono_tz::Tz>().unwrap_or(chrono_tz::UTC)
}

/// Check a single cron field against a value.
fn cron_field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        if let Ok(n) = step.parse::<u32>() {
            return n > 0 && value % n == 0;
        }
    }
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start_s.parse::<u32>(), end_s.parse::<u32>()) {
                if value >= start && value <= end {
                    return true;
                }
            }
        } else if let Ok(n) = part.parse::<u32>() {
            if value == n {
                return true;
            }
        }
    }
    false
}

fn cron_field_is_valid(field: &str) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        return step.parse::<u32>().map(|n| n > 0).unwrap_or(false);
    }
    field.split(',').all(|part| {
        if let Some((start, end)) = part.split_once('-') {
            start.parse::<u32>().is_ok() && end.parse::<u32>().is_ok()
        } else {
            part.parse::<u32>().is_ok()
        }
    })
}

/// Validate a 5-field pattern at schedule-creation time.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    let fields: Vec<&str> = pattern.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(Error::Validation(format!(
            "cron pattern needs 5 fields, got {}: {pattern:?}",
            fields.len()
        )));
    }
    for field in &fields {
        if !cron_field_is_valid(field) {
            return Err(Error::Validation(format!("bad cron field: {field:?}")));
        }
    }
    Ok(())
}

/// Check a **local** naive datetime against a 5-field cron expression.
fn cron_matches_naive(pattern: &str, dt: &chrono::NaiveDateTime) -> bool {
    let fields: Vec<&str> = pattern.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    cron_field_matches(fields[0], dt.minute())
        && cron_field_matches(fields[1], dt.hour())
        && cron_field_matches(fields[2], dt.day())
        && cron_field_matches(fields[3], dt.month())
        && cron_field_matches(fields[4], dt.weekday().num_days_from_sunday())
}

/// Check a UTC instant against a pattern evaluated in `tz`.
pub fn cron_matches_tz(pattern: &str, dt: &DateTime<Utc>, tz: chrono_tz::Tz) -> bool {
    cron_matches_naive(pattern, &dt.with_timezone(&tz).naive_local())
}

/// UTC shorthand.
pub fn cron_matches(pattern: &str, dt: &DateTime<Utc>) -> bool {
    cron_matches_naive(pattern, &dt.naive_utc())
}

/// Next occurrence after `after`, evaluated in `tz`, returned in UTC.
///
/// DST handling: local times inside a spring-forward gap are skipped;
/// fall-back overlaps pick the earliest mapping.
pub fn cron_next_tz(pattern: &str, after: &DateTime<Utc>, tz: chrono_tz::Tz) -> Option<DateTime<Utc>> {
    use chrono::TimeZone;

    let local_after = after.with_timezone(&tz).naive_local();
    let next_min_secs = 60 - (local_after.second() as i64);
    let mut candidate = local_after + chrono::Duration::seconds(next_min_secs);
    candidate = candidate.with_second(0).unwrap_or(candidate);

    let max_checks = 366 * 24 * 60; // one year of minutes
    for _ in 0..max_checks {
        if cron_matches_naive(pattern, &candidate) {
            match tz.from_local_datetime(&candidate) {
                chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                chrono::LocalResult::Ambiguous(earliest, _) => {
                    return Some(earliest.with_timezone(&Utc));
                }
                chrono::LocalResult::None => {
                    // DST gap — this local minute does not exist.
                }
            }
        }
        candidate += chrono::Duration::minutes(1);
    }
    None
}

/// UTC shorthand.
pub fn cron_next(pattern: &str, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    cron_next_tz(pattern, after, chrono_tz::UTC)
}
