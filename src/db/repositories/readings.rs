use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_status, retention_cutoff, retention_key, to_i64, to_u64},
    models::{Reading, StoredReading},
};

const SELECT_COLUMNS: &str =
    "id, timestamp, ax, ay, az, temp, amp, rul_predict, status, recorded_at";

fn row_to_stored_reading(row: &Row) -> Result<StoredReading> {
    let status: i64 = row.get("status")?;

    Ok(StoredReading {
        id: row.get("id")?,
        recorded_at: row.get("recorded_at")?,
        reading: Reading {
            timestamp: row.get("timestamp")?,
            ax: row.get("ax")?,
            ay: row.get("ay")?,
            az: row.get("az")?,
            temp: row.get("temp")?,
            amp: row.get("amp")?,
            rul_predict: row.get("rul_predict")?,
            status: parse_status(status)?,
        },
    })
}

impl Database {
    /// Appends one reading and returns its assigned id.
    pub async fn insert_reading(&self, reading: &Reading) -> Result<i64> {
        let record = reading.clone();
        let recorded_at = retention_key(&record.timestamp, Utc::now());
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO readings (timestamp, ax, ay, az, temp, amp, rul_predict, status, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.timestamp,
                    record.ax,
                    record.ay,
                    record.az,
                    record.temp,
                    record.amp,
                    record.rul_predict,
                    record.status.as_i64(),
                    recorded_at,
                ],
            )
            .with_context(|| "failed to insert reading")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Deletes every reading recorded more than `window` ago. Returns the number removed.
    pub async fn evict_older_than(&self, window: Duration) -> Result<usize> {
        let cutoff = retention_cutoff(Utc::now(), window)?;
        self.execute(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM readings WHERE recorded_at < ?1",
                    params![cutoff],
                )
                .with_context(|| "failed to evict old readings")?;
            Ok(removed)
        })
        .await
    }

    /// Readings recorded within the last `window`, oldest first.
    pub async fn readings_within(&self, window: Duration) -> Result<Vec<StoredReading>> {
        let cutoff = retention_cutoff(Utc::now(), window)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM readings
                 WHERE recorded_at >= ?1
                 ORDER BY id ASC"
            ))?;

            let mut rows = stmt.query(params![cutoff])?;
            let mut readings = Vec::new();
            while let Some(row) = rows.next()? {
                readings.push(row_to_stored_reading(row)?);
            }

            Ok(readings)
        })
        .await
    }

    /// The `limit` most recently inserted readings, newest first.
    pub async fn latest_readings(&self, limit: u64) -> Result<Vec<StoredReading>> {
        let limit = to_i64(limit)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM readings
                 ORDER BY id DESC
                 LIMIT ?1"
            ))?;

            let mut rows = stmt.query(params![limit])?;
            let mut readings = Vec::new();
            while let Some(row) = rows.next()? {
                readings.push(row_to_stored_reading(row)?);
            }

            Ok(readings)
        })
        .await
    }

    pub async fn count_readings(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))
                .with_context(|| "failed to count readings")?;
            to_u64(count, "count")
        })
        .await
    }
}
