//! # Reading Store
//!
//! Append-only SQLite persistence of meter readings and the fixed catalogue
//! of aggregation queries the reports are built from.
//!
//! Timestamps are local wall-clock time stored as ISO-8601 text with
//! microseconds (`2025-03-14T09:26:53.589793`), so lexical order is time
//! order and SQLite's `date()`/`strftime()` bucket them directly. Every query
//! is a single statement and therefore sees one consistent snapshot while the
//! poller keeps inserting.

use crate::error::MBusError;
use chrono::{Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, NaiveTime};
use log::info;
use serde::Serialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::time::Duration;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// One persisted meter reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub timestamp: NaiveDateTime,
    pub address: u8,
    /// Cumulative counter value in cubic meters
    pub value: f64,
}

/// Calendar unit used by [`ReadingStore::query_bucketed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    /// Label `HH`
    Hour,
    /// Label `YYYY-MM-DD`
    Day,
    /// Label `YYYY-MM`
    Month,
}

impl Bucket {
    fn sql_expr(self) -> &'static str {
        match self {
            Bucket::Hour => "strftime('%H', timestamp)",
            Bucket::Day => "date(timestamp)",
            Bucket::Month => "strftime('%Y-%m', timestamp)",
        }
    }
}

/// `(bucket, device) -> sum(value)` row of a bucketed query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketRow {
    pub label: String,
    pub address: u8,
    pub total: f64,
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(text: &str) -> Result<NaiveDateTime, MBusError> {
    text.parse::<NaiveDateTime>()
        .map_err(|e| MBusError::Other(format!("bad timestamp {text:?}: {e}")))
}

fn parse_date(text: &str) -> Result<NaiveDate, MBusError> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| MBusError::Other(format!("bad date {text:?}: {e}")))
}

fn start_of(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::default())
}

fn address_of(row: &SqliteRow) -> Result<u8, MBusError> {
    let raw: i64 = row.try_get("slave_id")?;
    u8::try_from(raw).map_err(|_| MBusError::Other(format!("stored address {raw} out of range")))
}

#[derive(Clone)]
pub struct ReadingStore {
    pool: SqlitePool,
}

impl ReadingStore {
    /// Opens (creating if missing) the database file in WAL mode so report
    /// readers never block the poller's inserts.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, MBusError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| MBusError::Config(format!("{}: {e}", parent.display())))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool).await?;
        info!("Reading store opened: {}", path.display());
        Ok(store)
    }

    /// Private in-memory database; a single connection keeps it alive.
    pub async fn in_memory() -> Result<Self, MBusError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    /// Wraps an existing pool and makes sure the schema exists.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MBusError> {
        let store = ReadingStore { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), MBusError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT,
                slave_id INTEGER,
                value REAL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_readings_timestamp ON readings (timestamp)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_readings_slave_timestamp ON readings (slave_id, timestamp)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Appends a reading stamped with the current local time.
    pub async fn insert(&self, address: u8, value: f64) -> Result<i64, MBusError> {
        self.insert_at(address, value, Local::now().naive_local()).await
    }

    /// Appends a reading with an explicit timestamp. Duplicates are legal.
    pub async fn insert_at(
        &self,
        address: u8,
        value: f64,
        timestamp: NaiveDateTime,
    ) -> Result<i64, MBusError> {
        let result = sqlx::query("INSERT INTO readings (timestamp, slave_id, value) VALUES (?, ?, ?)")
            .bind(format_timestamp(&timestamp))
            .bind(address as i64)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn count(&self) -> Result<i64, MBusError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM readings")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Daily grand totals for the trailing `days` days including `today`,
    /// oldest first. Days without readings are absent.
    pub async fn query_trend(&self, days: u32, today: NaiveDate) -> Result<Vec<(NaiveDate, f64)>, MBusError> {
        if days == 0 {
            return Ok(Vec::new());
        }
        let since = start_of(today - ChronoDuration::days(days as i64 - 1));
        let until = start_of(today + ChronoDuration::days(1));
        let rows = sqlx::query(
            r#"
            SELECT date(timestamp) AS day, SUM(value) AS total
            FROM readings
            WHERE timestamp >= ? AND timestamp < ?
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(format_timestamp(&since))
        .bind(format_timestamp(&until))
        .fetch_all(&self.pool)
        .await?;

        let mut trend: Vec<(NaiveDate, f64)> = Vec::with_capacity(rows.len());
        for row in rows {
            let day: String = row.try_get("day")?;
            trend.push((parse_date(&day)?, row.try_get("total")?));
        }
        Ok(trend)
    }

    /// Per-device sums of every reading at or after `period_start`, by address.
    pub async fn query_period_totals(&self, period_start: NaiveDateTime) -> Result<Vec<(u8, f64)>, MBusError> {
        let rows = sqlx::query(
            r#"
            SELECT slave_id, SUM(value) AS total
            FROM readings
            WHERE timestamp >= ?
            GROUP BY slave_id
            ORDER BY slave_id
            "#,
        )
        .bind(format_timestamp(&period_start))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(u8, f64), MBusError> { Ok((address_of(row)?, row.try_get("total")?)) })
            .collect()
    }

    /// The highest reading with `value >= threshold`; ties go to the earliest row.
    pub async fn query_peak_above_threshold(&self, threshold: f64) -> Result<Option<Reading>, MBusError> {
        let row = sqlx::query(
            r#"
            SELECT slave_id, value, timestamp
            FROM readings
            WHERE value >= ?
            ORDER BY value DESC, id ASC
            LIMIT 1
            "#,
        )
        .bind(threshold)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Reading {
                timestamp: parse_timestamp(&row.try_get::<String, _>("timestamp")?)?,
                address: address_of(&row)?,
                value: row.try_get("value")?,
            })),
            None => Ok(None),
        }
    }

    /// The most recent reading of every device that has one, by address.
    pub async fn query_latest_per_device(&self) -> Result<Vec<Reading>, MBusError> {
        // SQLite takes the bare columns from the row holding MAX()
        let rows = sqlx::query(
            r#"
            SELECT slave_id, value, MAX(timestamp) AS last_seen
            FROM readings
            GROUP BY slave_id
            ORDER BY slave_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut latest = Vec::with_capacity(rows.len());
        for row in rows {
            latest.push(Reading {
                timestamp: parse_timestamp(&row.try_get::<String, _>("last_seen")?)?,
                address: address_of(&row)?,
                value: row.try_get("value")?,
            });
        }
        Ok(latest)
    }

    /// `(bucket label, device, sum(value))` for readings since `since`.
    pub async fn query_bucketed(&self, bucket: Bucket, since: NaiveDateTime) -> Result<Vec<BucketRow>, MBusError> {
        self.query_bucketed_range(bucket, since, None).await
    }

    /// Same as [`query_bucketed`](Self::query_bucketed), bounded above by `until` (exclusive).
    pub async fn query_bucketed_range(
        &self,
        bucket: Bucket,
        since: NaiveDateTime,
        until: Option<NaiveDateTime>,
    ) -> Result<Vec<BucketRow>, MBusError> {
        let sql = format!(
            r#"
            SELECT {expr} AS bucket, slave_id, SUM(value) AS total
            FROM readings
            WHERE timestamp >= ? AND (? IS NULL OR timestamp < ?)
            GROUP BY bucket, slave_id
            ORDER BY bucket, slave_id
            "#,
            expr = bucket.sql_expr()
        );
        let until = until.map(|ts| format_timestamp(&ts));
        let rows = sqlx::query(&sql)
            .bind(format_timestamp(&since))
            .bind(until.clone())
            .bind(until)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<BucketRow, MBusError> {
                Ok(BucketRow {
                    label: row.try_get("bucket")?,
                    address: address_of(row)?,
                    total: row.try_get("total")?,
                })
            })
            .collect()
    }

    /// Values of one device, newest first.
    pub async fn query_recent_values(&self, address: u8, limit: u32) -> Result<Vec<f64>, MBusError> {
        let rows = sqlx::query(
            r#"
            SELECT value
            FROM readings
            WHERE slave_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(address as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<f64, MBusError> { Ok(row.try_get("value")?) })
            .collect()
    }

    /// Per-day sums of one device for `since..until` (dates, `until` exclusive).
    pub async fn query_device_daily(
        &self,
        address: u8,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>, MBusError> {
        let rows = sqlx::query(
            r#"
            SELECT date(timestamp) AS day, SUM(value) AS total
            FROM readings
            WHERE slave_id = ? AND timestamp >= ? AND timestamp < ?
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(address as i64)
        .bind(format_timestamp(&start_of(since)))
        .bind(format_timestamp(&start_of(until)))
        .fetch_all(&self.pool)
        .await?;

        let mut days: Vec<(NaiveDate, f64)> = Vec::with_capacity(rows.len());
        for row in rows {
            let day: String = row.try_get("day")?;
            days.push((parse_date(&day)?, row.try_get("total")?));
        }
        Ok(days)
    }

    /// Timestamp of the newest reading of one device.
    pub async fn query_last_timestamp(&self, address: u8) -> Result<Option<NaiveDateTime>, MBusError> {
        let row = sqlx::query("SELECT MAX(timestamp) AS last_seen FROM readings WHERE slave_id = ?")
            .bind(address as i64)
            .fetch_one(&self.pool)
            .await?;
        let last: Option<String> = row.try_get("last_seen")?;
        last.as_deref().map(parse_timestamp).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(text: &str) -> NaiveDateTime {
        text.parse().unwrap()
    }

    #[test]
    fn test_timestamp_text_round_trip() {
        let t = ts("2025-03-14T09:26:53.589793");
        assert_eq!(format_timestamp(&t), "2025-03-14T09:26:53.589793");
        assert_eq!(parse_timestamp(&format_timestamp(&t)).unwrap(), t);
        assert_eq!(format_timestamp(&ts("2025-03-14T09:00:00")), "2025-03-14T09:00:00.000000");
    }

    #[tokio::test]
    async fn test_bucket_labels() {
        let store = ReadingStore::in_memory().await.unwrap();
        store.insert_at(1, 1.5, ts("2025-03-14T09:10:00")).await.unwrap();
        store.insert_at(1, 2.0, ts("2025-03-14T09:50:00")).await.unwrap();
        store.insert_at(2, 4.0, ts("2025-03-14T23:59:59")).await.unwrap();
        let since = ts("2025-03-14T00:00:00");

        let hours = store.query_bucketed(Bucket::Hour, since).await.unwrap();
        assert_eq!(
            hours,
            vec![
                BucketRow { label: "09".into(), address: 1, total: 3.5 },
                BucketRow { label: "23".into(), address: 2, total: 4.0 },
            ]
        );

        let days = store.query_bucketed(Bucket::Day, since).await.unwrap();
        assert_eq!(days[0].label, "2025-03-14");

        let months = store.query_bucketed(Bucket::Month, since).await.unwrap();
        assert_eq!(months[0].label, "2025-03");
    }

    #[tokio::test]
    async fn test_range_upper_bound_is_exclusive() {
        let store = ReadingStore::in_memory().await.unwrap();
        store.insert_at(1, 1.0, ts("2025-03-14T12:00:00")).await.unwrap();
        store.insert_at(1, 9.0, ts("2025-03-15T00:00:00")).await.unwrap();
        let rows = store
            .query_bucketed_range(Bucket::Day, ts("2025-03-14T00:00:00"), Some(ts("2025-03-15T00:00:00")))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total, 1.0);
    }
}
