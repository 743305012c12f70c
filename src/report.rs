//! # Consumption Reports
//!
//! Calendar bucketing over the [`ReadingStore`]. The engine holds no state of
//! its own: every report is one or a few store queries, zero-filled so each
//! roster device and each calendar slot of the period is present.
//!
//! Bucket totals are sums of the cumulative counter snapshots stored in the
//! period, not differences between them. Only
//! [`ReportEngine::instantaneous`] reports an actual consumption delta.

use crate::constants::{HISTORY_MAX_DAYS, HISTORY_MIN_DAYS};
use crate::error::MBusError;
use crate::store::{Bucket, BucketRow, Reading, ReadingStore};
use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Source of "now" for calendar anchoring.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock stopped at a given instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReportPeriod {
    /// Hours `00`..`23` of today
    Daily,
    /// The trailing seven days, Monday first
    Weekly,
    /// Day 1 of the month through today
    Monthly,
    /// Months `01`..`12` of the current year
    Yearly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComparisonPeriod {
    Day,
    Month,
}

/// One labelled slot of a bucketed report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationBucket {
    pub label: String,
    pub per_device_totals: BTreeMap<u8, f64>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketReport {
    pub period: ReportPeriod,
    pub buckets: Vec<AggregationBucket>,
}

impl BucketReport {
    pub fn bucket(&self, label: &str) -> Option<&AggregationBucket> {
        self.buckets.iter().find(|b| b.label == label)
    }

    pub fn grand_total(&self) -> f64 {
        self.buckets.iter().map(|b| b.total).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceTotal {
    pub address: u8,
    pub total: f64,
}

/// Difference between the two newest readings of a device, floored at zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstantConsumption {
    pub address: u8,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub total: f64,
}

/// Drill-down of one device over a trailing window of days.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceHistory {
    pub address: u8,
    pub days: Vec<DailyTotal>,
    pub total: f64,
    pub mean_per_day: f64,
    pub max_total: f64,
    /// First day reaching `max_total`
    pub max_day: NaiveDate,
    /// Smallest non-zero day, 0 when every day is empty
    pub min_positive: f64,
    pub last_reading: Option<NaiveDateTime>,
}

fn start_of(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::default())
}

/// Most recent date on or before `today` falling on `weekday`.
fn latest_weekday(today: NaiveDate, weekday: Weekday) -> NaiveDate {
    let back = (7 + today.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
    today - ChronoDuration::days(back as i64)
}

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

pub struct ReportEngine {
    store: ReadingStore,
    roster: Vec<u8>,
    clock: Arc<dyn Clock>,
}

impl ReportEngine {
    pub fn new(store: ReadingStore, device_count: u8) -> Self {
        Self::with_clock(store, device_count, Arc::new(SystemClock))
    }

    pub fn with_clock(store: ReadingStore, device_count: u8, clock: Arc<dyn Clock>) -> Self {
        ReportEngine {
            store,
            roster: (1..=device_count).collect(),
            clock,
        }
    }

    pub fn store(&self) -> &ReadingStore {
        &self.store
    }

    fn zeroed(&self) -> BTreeMap<u8, f64> {
        self.roster.iter().map(|&a| (a, 0.0)).collect()
    }

    /// Lays store rows onto the `(key, label)` slots of a period. Rows of
    /// addresses outside the roster are ignored.
    fn fill(&self, slots: Vec<(String, String)>, rows: Vec<BucketRow>) -> Vec<AggregationBucket> {
        let mut by_key: HashMap<String, BTreeMap<u8, f64>> = HashMap::new();
        for row in rows.into_iter().filter(|r| self.roster.contains(&r.address)) {
            *by_key
                .entry(row.label)
                .or_insert_with(|| self.zeroed())
                .entry(row.address)
                .or_insert(0.0) += row.total;
        }

        slots
            .into_iter()
            .map(|(key, label)| {
                let per_device_totals = by_key.remove(&key).unwrap_or_else(|| self.zeroed());
                let total = per_device_totals.values().sum();
                AggregationBucket {
                    label,
                    per_device_totals,
                    total,
                }
            })
            .collect()
    }

    /// Bucketed totals for one of the calendar periods, anchored to today.
    pub async fn bucket_report(&self, period: ReportPeriod) -> Result<BucketReport, MBusError> {
        let today = self.clock.today();
        let tomorrow = start_of(today + ChronoDuration::days(1));

        let (bucket, since, slots): (Bucket, NaiveDate, Vec<(String, String)>) = match period {
            ReportPeriod::Daily => {
                let slots = (0..24).map(|h| (format!("{h:02}"), format!("{h:02}"))).collect();
                (Bucket::Hour, today, slots)
            }
            ReportPeriod::Weekly => {
                let slots = WEEK
                    .iter()
                    .map(|&w| {
                        let date = latest_weekday(today, w);
                        (date.format("%Y-%m-%d").to_string(), date.format("%a (%m-%d)").to_string())
                    })
                    .collect();
                (Bucket::Day, today - ChronoDuration::days(6), slots)
            }
            ReportPeriod::Monthly => {
                let first = today.with_day(1).unwrap_or(today);
                let slots = first
                    .iter_days()
                    .take_while(|d| *d <= today)
                    .map(|d| (d.format("%Y-%m-%d").to_string(), d.format("%d").to_string()))
                    .collect();
                (Bucket::Day, first, slots)
            }
            ReportPeriod::Yearly => {
                let first = NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today);
                let slots = (1..=12)
                    .map(|m| (format!("{:04}-{m:02}", today.year()), format!("{m:02}")))
                    .collect();
                (Bucket::Month, first, slots)
            }
        };

        let rows = self
            .store
            .query_bucketed_range(bucket, start_of(since), Some(tomorrow))
            .await?;
        Ok(BucketReport {
            period,
            buckets: self.fill(slots, rows),
        })
    }

    pub async fn hourly_today(&self) -> Result<BucketReport, MBusError> {
        self.bucket_report(ReportPeriod::Daily).await
    }

    pub async fn day_of_week(&self) -> Result<BucketReport, MBusError> {
        self.bucket_report(ReportPeriod::Weekly).await
    }

    pub async fn month_to_date(&self) -> Result<BucketReport, MBusError> {
        self.bucket_report(ReportPeriod::Monthly).await
    }

    pub async fn year_to_date(&self) -> Result<BucketReport, MBusError> {
        self.bucket_report(ReportPeriod::Yearly).await
    }

    /// Daily grand totals over the trailing `days` days; empty days are absent.
    pub async fn trend(&self, days: u32) -> Result<Vec<TrendPoint>, MBusError> {
        let points = self.store.query_trend(days, self.clock.today()).await?;
        Ok(points
            .into_iter()
            .map(|(date, total)| TrendPoint { date, total })
            .collect())
    }

    /// Per-device totals of the roster since the start of the day or month,
    /// highest first.
    pub async fn comparison(&self, period: ComparisonPeriod) -> Result<Vec<DeviceTotal>, MBusError> {
        let today = self.clock.today();
        let start = match period {
            ComparisonPeriod::Day => today,
            ComparisonPeriod::Month => today.with_day(1).unwrap_or(today),
        };

        let mut totals = self.zeroed();
        for (address, total) in self.store.query_period_totals(start_of(start)).await? {
            if let Some(slot) = totals.get_mut(&address) {
                *slot = total;
            }
        }
        let mut ranked: Vec<DeviceTotal> = totals
            .into_iter()
            .map(|(address, total)| DeviceTotal { address, total })
            .collect();
        ranked.sort_by(|a, b| b.total.total_cmp(&a.total).then(a.address.cmp(&b.address)));
        Ok(ranked)
    }

    /// Highest stored reading at or above `threshold`.
    pub async fn peak(&self, threshold: f64) -> Result<Option<Reading>, MBusError> {
        self.store.query_peak_above_threshold(threshold).await
    }

    pub async fn instantaneous(&self) -> Result<Vec<InstantConsumption>, MBusError> {
        let mut out = Vec::with_capacity(self.roster.len());
        for &address in &self.roster {
            let values = self.store.query_recent_values(address, 2).await?;
            let delta = match values.as_slice() {
                [latest, previous] => (latest - previous).max(0.0),
                _ => 0.0,
            };
            out.push(InstantConsumption { address, delta });
        }
        Ok(out)
    }

    /// Per-day totals of one device over the trailing `days` days.
    pub async fn device_history(&self, address: u8, days: u32) -> Result<DeviceHistory, MBusError> {
        if !(HISTORY_MIN_DAYS..=HISTORY_MAX_DAYS).contains(&days) {
            return Err(MBusError::InvalidArgument(format!(
                "history window must be {HISTORY_MIN_DAYS}..={HISTORY_MAX_DAYS} days, got {days}"
            )));
        }

        let today = self.clock.today();
        let first = today - ChronoDuration::days(days as i64 - 1);
        let stored: HashMap<NaiveDate, f64> = self
            .store
            .query_device_daily(address, first, today + ChronoDuration::days(1))
            .await?
            .into_iter()
            .collect();

        let daily: Vec<DailyTotal> = first
            .iter_days()
            .take(days as usize)
            .map(|date| DailyTotal {
                date,
                total: stored.get(&date).copied().unwrap_or(0.0),
            })
            .collect();

        let total: f64 = daily.iter().map(|d| d.total).sum();
        let mut max_total = daily[0].total;
        let mut max_day = daily[0].date;
        for day in &daily[1..] {
            if day.total > max_total {
                max_total = day.total;
                max_day = day.date;
            }
        }
        let min_positive = daily
            .iter()
            .map(|d| d.total)
            .filter(|&t| t > 0.0)
            .min_by(f64::total_cmp)
            .unwrap_or(0.0);

        Ok(DeviceHistory {
            address,
            total,
            mean_per_day: total / days as f64,
            max_total,
            max_day,
            min_positive,
            last_reading: self.store.query_last_timestamp(address).await?,
            days: daily,
        })
    }

    /// Newest stored reading of every device that has one.
    pub async fn latest_readings(&self) -> Result<Vec<Reading>, MBusError> {
        self.store.query_latest_per_device().await
    }
}
