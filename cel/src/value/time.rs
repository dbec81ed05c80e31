//! Timestamp and duration values (§3.1, §3.4 invariant 3, §4.3, §4.10).

use crate::error::ExecutionError;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use std::cmp::Ordering;

const MIN_SECONDS: i64 = -62135596800; // 0001-01-01T00:00:00Z
const MAX_SECONDS: i64 = 253402300799; // 9999-12-31T23:59:59Z

/// (seconds since epoch, nanos in [0, 1e9)), normalized and range-checked
/// at construction (§3.1, §3.4 invariant 3).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanos: i64) -> Result<Timestamp, ExecutionError> {
        let (seconds, nanos) = normalize_unsigned_nanos(seconds, nanos)?;
        if seconds < MIN_SECONDS || seconds > MAX_SECONDS {
            return Err(ExecutionError::ValueOutOfDomain("timestamp out of range 0001-9999".into()));
        }
        Ok(Timestamp { seconds, nanos })
    }

    pub fn parse(s: &str) -> Result<Timestamp, ExecutionError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| ExecutionError::ValueOutOfDomain(format!("invalid timestamp '{s}': {e}")))?;
        Timestamp::new(dt.timestamp(), dt.timestamp_subsec_nanos() as i64)
    }

    pub fn to_rfc3339(&self) -> String {
        self.to_chrono().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
    }

    fn to_chrono(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.seconds, self.nanos).single().expect("validated at construction")
    }

    pub fn checked_add_duration(&self, d: &Duration) -> Result<Timestamp, ExecutionError> {
        let total_nanos = self.nanos as i64 + d.nanos as i64;
        let seconds = self
            .seconds
            .checked_add(d.seconds)
            .ok_or(ExecutionError::Overflow { op: "timestamp+duration" })?;
        Timestamp::new(seconds, total_nanos)
    }

    pub fn checked_sub_duration(&self, d: &Duration) -> Result<Timestamp, ExecutionError> {
        self.checked_add_duration(&Duration { seconds: -d.seconds, nanos: -d.nanos })
    }

    pub fn checked_diff(&self, other: &Timestamp) -> Result<Duration, ExecutionError> {
        let seconds = self
            .seconds
            .checked_sub(other.seconds)
            .ok_or(ExecutionError::Overflow { op: "timestamp-timestamp" })?;
        let nanos = self.nanos as i64 - other.nanos as i64;
        Duration::new(seconds, nanos)
    }

    pub fn in_zone(&self, tz: &str) -> Result<chrono::DateTime<chrono_tz::Tz>, ExecutionError> {
        let zone: chrono_tz::Tz = tz
            .parse()
            .or_else(|_| parse_fixed_offset(tz).map(|_| chrono_tz::UTC))
            .map_err(|_| ExecutionError::ValueOutOfDomain(format!("unknown timezone '{tz}'")))?;
        Ok(self.to_chrono().with_timezone(&zone))
    }

    pub fn field_in_zone(&self, field: &str, tz: Option<&str>) -> Result<i64, ExecutionError> {
        let naive = match tz {
            Some(name) => self.in_zone(name)?.naive_local(),
            None => self.to_chrono().naive_utc(),
        };
        Ok(match field {
            "getFullYear" => naive.year() as i64,
            "getMonth" => naive.month0() as i64,
            "getDate" | "getDayOfMonth" => naive.day() as i64 - 1,
            "getDayOfWeek" => naive.weekday().num_days_from_sunday() as i64,
            "getDayOfYear" => naive.ordinal0() as i64,
            "getHours" => naive.hour() as i64,
            "getMinutes" => naive.minute() as i64,
            "getSeconds" => naive.second() as i64,
            "getMilliseconds" => (naive.nanosecond() / 1_000_000) as i64,
            _ => return Err(ExecutionError::NoSuchFunction(field.to_string())),
        })
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some((self.seconds, self.nanos).cmp(&(other.seconds, other.nanos)))
    }
}

fn parse_fixed_offset(s: &str) -> Result<(), ()> {
    // `±HH:MM` offsets are accepted by field_in_zone's caller via chrono
    // directly; this just validates the shape so `in_zone` doesn't blindly
    // fall back to UTC for garbage input.
    if s.len() == 6 && (s.starts_with('+') || s.starts_with('-')) {
        Ok(())
    } else {
        Err(())
    }
}

fn normalize_unsigned_nanos(seconds: i64, nanos: i64) -> Result<(i64, u32), ExecutionError> {
    let extra_seconds = nanos.div_euclid(1_000_000_000);
    let nanos = nanos.rem_euclid(1_000_000_000);
    let seconds = seconds
        .checked_add(extra_seconds)
        .ok_or(ExecutionError::Overflow { op: "timestamp" })?;
    Ok((seconds, nanos as u32))
}

/// (seconds, nanos); total nanoseconds fit in i64 and nanos' sign matches
/// seconds' sign after normalization (§3.1, §3.4 invariant 3).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Duration {
    pub seconds: i64,
    pub nanos: i32,
}

impl Duration {
    pub fn new(seconds: i64, nanos: i64) -> Result<Duration, ExecutionError> {
        let total = total_nanos(seconds, nanos).ok_or(ExecutionError::Overflow { op: "duration" })?;
        Duration::from_total_nanos(total)
    }

    fn from_total_nanos(total: i128) -> Result<Duration, ExecutionError> {
        if total > i64::MAX as i128 || total < i64::MIN as i128 {
            return Err(ExecutionError::ValueOutOfDomain("duration exceeds int64 nanoseconds".into()));
        }
        let seconds = (total / 1_000_000_000) as i64;
        let nanos = (total % 1_000_000_000) as i32;
        Ok(Duration { seconds, nanos })
    }

    fn as_total_nanos(&self) -> i128 {
        self.seconds as i128 * 1_000_000_000 + self.nanos as i128
    }

    pub fn checked_add(&self, other: &Duration) -> Result<Duration, ExecutionError> {
        Duration::from_total_nanos(self.as_total_nanos() + other.as_total_nanos())
    }

    pub fn checked_sub(&self, other: &Duration) -> Result<Duration, ExecutionError> {
        Duration::from_total_nanos(self.as_total_nanos() - other.as_total_nanos())
    }

    /// Parses a Go-style duration string like `"24h"`, `"1h30m"`, `"500ms"`.
    pub fn parse(s: &str) -> Result<Duration, ExecutionError> {
        let err = || ExecutionError::ValueOutOfDomain(format!("invalid duration '{s}'"));
        let mut rest = s;
        let negative = if let Some(r) = rest.strip_prefix('-') {
            rest = r;
            true
        } else {
            false
        };
        if rest.is_empty() {
            return Err(err());
        }
        let mut total: i128 = 0;
        while !rest.is_empty() {
            let digits_end = rest
                .find(|c: char| !c.is_ascii_digit() && c != '.')
                .ok_or_else(err)?;
            if digits_end == 0 {
                return Err(err());
            }
            let (num, tail) = rest.split_at(digits_end);
            let value: f64 = num.parse().map_err(|_| err())?;
            let (unit_len, nanos_per_unit) = if tail.starts_with("ns") {
                (2, 1.0)
            } else if tail.starts_with("us") || tail.starts_with("µs") {
                (2, 1_000.0)
            } else if tail.starts_with("ms") {
                (2, 1_000_000.0)
            } else if tail.starts_with('s') {
                (1, 1_000_000_000.0)
            } else if tail.starts_with('m') {
                (1, 60_000_000_000.0)
            } else if tail.starts_with('h') {
                (1, 3_600_000_000_000.0)
            } else {
                return Err(err());
            };
            total += (value * nanos_per_unit) as i128;
            rest = &tail[unit_len..];
        }
        if negative {
            total = -total;
        }
        Duration::from_total_nanos(total)
    }

    pub fn to_go_string(&self) -> String {
        let mut total = self.as_total_nanos();
        if total == 0 {
            return "0s".to_string();
        }
        let mut out = String::new();
        if total < 0 {
            out.push('-');
            total = -total;
        }
        let hours = total / 3_600_000_000_000;
        total %= 3_600_000_000_000;
        let minutes = total / 60_000_000_000;
        total %= 60_000_000_000;
        let seconds = total as f64 / 1_000_000_000.0;
        if hours > 0 {
            out.push_str(&format!("{hours}h"));
        }
        if hours > 0 || minutes > 0 {
            out.push_str(&format!("{minutes}m"));
        }
        out.push_str(&format!("{seconds}s"));
        out
    }

    pub fn field(&self, field: &str) -> Result<i64, ExecutionError> {
        let total = self.as_total_nanos();
        Ok(match field {
            "getHours" => total / 3_600_000_000_000,
            "getMinutes" => total / 60_000_000_000,
            "getSeconds" => total / 1_000_000_000,
            "getMilliseconds" => total / 1_000_000,
            _ => return Err(ExecutionError::NoSuchFunction(field.to_string())),
        } as i64)
    }
}

impl PartialOrd for Duration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.as_total_nanos().cmp(&other.as_total_nanos()))
    }
}

fn total_nanos(seconds: i64, nanos: i64) -> Option<i128> {
    (seconds as i128).checked_mul(1_000_000_000)?.checked_add(nanos as i128)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_parses_combined_units() {
        let d = Duration::parse("1h30m").unwrap();
        assert_eq!(d.as_total_nanos(), 90 * 60 * 1_000_000_000);
    }

    #[test]
    fn timestamp_plus_duration() {
        let ts = Timestamp::parse("2024-01-01T00:00:00Z").unwrap();
        let d = Duration::parse("24h").unwrap();
        let next = ts.checked_add_duration(&d).unwrap();
        assert_eq!(next, Timestamp::parse("2024-01-02T00:00:00Z").unwrap());
    }

    #[test]
    fn timestamp_out_of_range_errors() {
        assert!(Timestamp::new(MAX_SECONDS + 1, 0).is_err());
    }
}
