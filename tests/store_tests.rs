//! Tests for the SQLite reading store.

use chrono::{NaiveDate, NaiveDateTime};
use mbus_meter::store::{Bucket, Reading, ReadingStore};
use sqlx::Row;

fn ts(text: &str) -> NaiveDateTime {
    text.parse().unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Tests that a file database is created in WAL mode and keeps readings across reopen.
#[tokio::test]
async fn test_file_store_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("mbus.db");

    let store = ReadingStore::open(&path).await.unwrap();
    let mode: String = sqlx::query("PRAGMA journal_mode")
        .fetch_one(store.pool())
        .await
        .unwrap()
        .try_get(0)
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
    store.insert(1, 10.5).await.unwrap();
    store.insert(1, 10.5).await.unwrap();
    store.pool().close().await;

    let reopened = ReadingStore::open(&path).await.unwrap();
    assert_eq!(reopened.count().await.unwrap(), 2);
}

/// Tests that the trend holds only days with data, oldest first, within the window.
#[tokio::test]
async fn test_trend_window() {
    let store = ReadingStore::in_memory().await.unwrap();
    store.insert_at(1, 5.0, ts("2025-03-01T12:00:00")).await.unwrap();
    store.insert_at(1, 1.0, ts("2025-03-08T08:00:00")).await.unwrap();
    store.insert_at(2, 2.0, ts("2025-03-08T09:00:00")).await.unwrap();
    store.insert_at(1, 4.0, ts("2025-03-14T23:00:00")).await.unwrap();

    let trend = store.query_trend(7, date(2025, 3, 14)).await.unwrap();
    assert_eq!(trend, vec![(date(2025, 3, 8), 3.0), (date(2025, 3, 14), 4.0)]);
    assert!(store.query_trend(0, date(2025, 3, 14)).await.unwrap().is_empty());
}

/// Tests that period totals include only readings at or after the start.
#[tokio::test]
async fn test_period_totals() {
    let store = ReadingStore::in_memory().await.unwrap();
    store.insert_at(1, 100.0, ts("2025-03-13T23:59:59")).await.unwrap();
    store.insert_at(1, 1.5, ts("2025-03-14T00:00:00")).await.unwrap();
    store.insert_at(3, 2.0, ts("2025-03-14T10:00:00")).await.unwrap();
    store.insert_at(3, 2.0, ts("2025-03-14T11:00:00")).await.unwrap();

    let totals = store.query_period_totals(ts("2025-03-14T00:00:00")).await.unwrap();
    assert_eq!(totals, vec![(1, 1.5), (3, 4.0)]);
}

/// Tests that the peak query picks the highest reading at or above the threshold.
#[tokio::test]
async fn test_peak_above_threshold() {
    let store = ReadingStore::in_memory().await.unwrap();
    store.insert_at(1, 150.0, ts("2025-03-14T01:00:00")).await.unwrap();
    store.insert_at(2, 310.0, ts("2025-03-14T02:00:00")).await.unwrap();
    store.insert_at(3, 305.0, ts("2025-03-14T03:00:00")).await.unwrap();

    let peak = store.query_peak_above_threshold(300.0).await.unwrap().unwrap();
    assert_eq!((peak.address, peak.value), (2, 310.0));
    assert_eq!(peak.timestamp, ts("2025-03-14T02:00:00"));
    assert!(store.query_peak_above_threshold(311.0).await.unwrap().is_none());
    assert_eq!(
        store.query_peak_above_threshold(310.0).await.unwrap().map(|r| r.address),
        Some(2)
    );
}

/// Tests that equal peak values resolve to the earliest inserted row.
#[tokio::test]
async fn test_peak_tie_goes_to_earliest_row() {
    let store = ReadingStore::in_memory().await.unwrap();
    store.insert_at(4, 400.0, ts("2025-03-14T05:00:00")).await.unwrap();
    store.insert_at(5, 400.0, ts("2025-03-14T01:00:00")).await.unwrap();

    let peak = store.query_peak_above_threshold(300.0).await.unwrap().unwrap();
    assert_eq!(peak.address, 4);
}

/// Tests that the latest reading of every device is returned.
#[tokio::test]
async fn test_latest_per_device() {
    let store = ReadingStore::in_memory().await.unwrap();
    store.insert_at(1, 1.0, ts("2025-03-14T01:00:00")).await.unwrap();
    store.insert_at(1, 2.0, ts("2025-03-14T03:00:00")).await.unwrap();
    store.insert_at(1, 3.0, ts("2025-03-14T02:00:00")).await.unwrap();
    store.insert_at(2, 9.0, ts("2025-03-13T00:00:00")).await.unwrap();

    let latest = store.query_latest_per_device().await.unwrap();
    assert_eq!(
        latest,
        vec![
            Reading { timestamp: ts("2025-03-14T03:00:00"), address: 1, value: 2.0 },
            Reading { timestamp: ts("2025-03-13T00:00:00"), address: 2, value: 9.0 },
        ]
    );
}

/// Tests that recent values come newest first and respect the limit.
#[tokio::test]
async fn test_recent_values() {
    let store = ReadingStore::in_memory().await.unwrap();
    store.insert_at(6, 10.0, ts("2025-03-14T01:00:00")).await.unwrap();
    store.insert_at(6, 12.5, ts("2025-03-14T02:00:00")).await.unwrap();
    store.insert_at(6, 11.0, ts("2025-03-14T03:00:00")).await.unwrap();

    assert_eq!(store.query_recent_values(6, 2).await.unwrap(), vec![11.0, 12.5]);
    assert!(store.query_recent_values(7, 2).await.unwrap().is_empty());
}

/// Tests the per-device daily sums and the last timestamp of a device.
#[tokio::test]
async fn test_device_daily_and_last_timestamp() {
    let store = ReadingStore::in_memory().await.unwrap();
    store.insert_at(2, 1.0, ts("2025-03-10T06:00:00")).await.unwrap();
    store.insert_at(2, 2.0, ts("2025-03-10T18:00:00")).await.unwrap();
    store.insert_at(2, 7.0, ts("2025-03-12T12:00:00")).await.unwrap();
    store.insert_at(3, 50.0, ts("2025-03-12T12:00:00")).await.unwrap();

    let days = store
        .query_device_daily(2, date(2025, 3, 10), date(2025, 3, 12))
        .await
        .unwrap();
    assert_eq!(days, vec![(date(2025, 3, 10), 3.0)]);

    assert_eq!(
        store.query_last_timestamp(2).await.unwrap(),
        Some(ts("2025-03-12T12:00:00"))
    );
    assert_eq!(store.query_last_timestamp(8).await.unwrap(), None);
}

/// Tests that bucketed rows are grouped by label and device.
#[tokio::test]
async fn test_bucketed_by_month() {
    let store = ReadingStore::in_memory().await.unwrap();
    store.insert_at(1, 1.0, ts("2025-01-31T23:00:00")).await.unwrap();
    store.insert_at(1, 2.0, ts("2025-02-01T01:00:00")).await.unwrap();
    store.insert_at(2, 4.0, ts("2025-02-15T01:00:00")).await.unwrap();

    let rows = store.query_bucketed(Bucket::Month, ts("2025-01-01T00:00:00")).await.unwrap();
    let flat: Vec<_> = rows.iter().map(|r| (r.label.as_str(), r.address, r.total)).collect();
    assert_eq!(flat, vec![("2025-01", 1, 1.0), ("2025-02", 1, 2.0), ("2025-02", 2, 4.0)]);
}
