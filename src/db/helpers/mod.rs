use std::{convert::TryFrom, time::Duration};

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::db::models::ReadingStatus;

/// Format of the `recorded_at` column. Fixed width, so string order is time order.
pub const RETENTION_KEY_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn parse_status(value: i64) -> Result<ReadingStatus> {
    match value {
        0 => Ok(ReadingStatus::Normal),
        1 => Ok(ReadingStatus::Abnormal),
        other => Err(anyhow!("unknown reading status {other}")),
    }
}

pub fn format_retention_key(at: DateTime<Utc>) -> String {
    at.format(RETENTION_KEY_FORMAT).to_string()
}

/// Parses a device timestamp into UTC. Naive timestamps are taken as UTC.
pub fn parse_device_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// Retention key for a reading; unparseable device clocks fall back to `received_at`.
pub fn retention_key(raw_timestamp: &str, received_at: DateTime<Utc>) -> String {
    format_retention_key(parse_device_timestamp(raw_timestamp).unwrap_or(received_at))
}

pub fn retention_cutoff(now: DateTime<Utc>, window: Duration) -> Result<String> {
    let window = chrono::Duration::from_std(window)
        .map_err(|_| anyhow!("retention window {window:?} is out of range"))?;
    let cutoff = now
        .checked_sub_signed(window)
        .ok_or_else(|| anyhow!("retention window {window} underflows the calendar"))?;
    Ok(format_retention_key(cutoff))
}
