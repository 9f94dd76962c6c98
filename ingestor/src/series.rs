//! Resampling of heartbeats onto a dense, interval-aligned grid. Empty slots
//! are emitted with `None`, never zero.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use crate::model::HeartbeatReport;

/// Numeric heartbeat fields that can be charted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesField {
    Temperature,
    LensTemperature,
    CpuTemperature,
    Humidity,
    CoverPosition,
    StoragePrimaryAvailable,
    StoragePrimaryTotal,
    StoragePermanentAvailable,
    StoragePermanentTotal,
}

impl SeriesField {
    pub const ALL: [SeriesField; 9] = [
        SeriesField::Temperature,
        SeriesField::LensTemperature,
        SeriesField::CpuTemperature,
        SeriesField::Humidity,
        SeriesField::CoverPosition,
        SeriesField::StoragePrimaryAvailable,
        SeriesField::StoragePrimaryTotal,
        SeriesField::StoragePermanentAvailable,
        SeriesField::StoragePermanentTotal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SeriesField::Temperature => "temperature",
            SeriesField::LensTemperature => "lens_temperature",
            SeriesField::CpuTemperature => "cpu_temperature",
            SeriesField::Humidity => "humidity",
            SeriesField::CoverPosition => "cover_position",
            SeriesField::StoragePrimaryAvailable => "storage_primary_available",
            SeriesField::StoragePrimaryTotal => "storage_primary_total",
            SeriesField::StoragePermanentAvailable => "storage_permanent_available",
            SeriesField::StoragePermanentTotal => "storage_permanent_total",
        }
    }

    pub fn value(self, report: &HeartbeatReport) -> Option<f64> {
        match self {
            SeriesField::Temperature => report.readings.temperature,
            SeriesField::LensTemperature => report.readings.lens_temperature,
            SeriesField::CpuTemperature => report.readings.cpu_temperature,
            SeriesField::Humidity => report.readings.humidity,
            SeriesField::CoverPosition => report.cover_position,
            SeriesField::StoragePrimaryAvailable => report.storage.primary_available,
            SeriesField::StoragePrimaryTotal => report.storage.primary_total,
            SeriesField::StoragePermanentAvailable => report.storage.permanent_available,
            SeriesField::StoragePermanentTotal => report.storage.permanent_total,
        }
    }
}

impl fmt::Display for SeriesField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SeriesField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        SeriesField::ALL
            .into_iter()
            .find(|field| field.name() == s)
            .ok_or_else(|| format!("unknown series field {:?}", s))
    }
}

/// Bucket width: fixed seconds, or `all` for an unaggregated scatter view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    All,
    Every(NonZeroU32),
}

impl Interval {
    pub fn seconds(seconds: u32) -> Option<Self> {
        NonZeroU32::new(seconds).map(Interval::Every)
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all" => Ok(Interval::All),
            other => other
                .parse::<u32>()
                .ok()
                .and_then(Interval::seconds)
                .ok_or_else(|| format!("interval {:?} must be \"all\" or a positive number of seconds", other)),
        }
    }
}

/// One slot of the resampled grid
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub bucket_start: DateTime<Utc>,
    /// One mean per tracked field, in field order
    pub means: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketedSeries {
    pub interval_seconds: u32,
    pub fields: Vec<SeriesField>,
    pub points: Vec<SeriesPoint>,
}

/// Result of a series query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Series {
    Buckets(BucketedSeries),
    Scatter { reports: Vec<HeartbeatReport> },
}

/// Round `time` down to a multiple of `interval` seconds since the epoch (UTC)
pub fn floor_to(time: DateTime<Utc>, interval: NonZeroU32) -> DateTime<Utc> {
    let interval_ms = i64::from(interval.get()) * 1000;
    let floored = time.timestamp_millis().div_euclid(interval_ms) * interval_ms;
    Utc.timestamp_millis_opt(floored).single().unwrap_or(time)
}

/// Number of slots covering `[start, end)`: `ceil((end − start) / interval)`
pub fn bucket_count(start: DateTime<Utc>, end: DateTime<Utc>, interval: NonZeroU32) -> usize {
    let span_ms = (end - start).num_milliseconds();
    if span_ms <= 0 {
        return 0;
    }
    let interval_ms = i64::from(interval.get()) * 1000;
    ((span_ms + interval_ms - 1) / interval_ms) as usize
}

/// Mean per slot and field over `[floor(start), ...)`, exactly
/// [`bucket_count`] slots. Samples outside the grid are ignored.
pub fn aggregate<I>(
    samples: I,
    width: usize,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: NonZeroU32,
) -> Vec<SeriesPoint>
where
    I: IntoIterator<Item = (DateTime<Utc>, Vec<Option<f64>>)>,
{
    let count = bucket_count(start, end, interval);
    let grid_start = floor_to(start, interval);
    let step = Duration::seconds(i64::from(interval.get()));
    let interval_ms = step.num_milliseconds();

    // (sum, count) per slot per field
    let mut sums: Vec<Vec<(f64, u32)>> = vec![vec![(0.0, 0); width]; count];

    for (timestamp, values) in samples {
        let offset = (timestamp - grid_start).num_milliseconds();
        if offset < 0 {
            continue;
        }
        let slot = (offset / interval_ms) as usize;
        let Some(slot) = sums.get_mut(slot) else {
            continue;
        };
        for (acc, value) in slot.iter_mut().zip(values) {
            if let Some(value) = value {
                acc.0 += value;
                acc.1 += 1;
            }
        }
    }

    sums.into_iter()
        .enumerate()
        .map(|(i, slot)| SeriesPoint {
            bucket_start: grid_start + step * i as i32,
            means: slot
                .into_iter()
                .map(|(sum, n)| (n > 0).then(|| sum / f64::from(n)))
                .collect(),
        })
        .collect()
}

/// Aggregate heartbeat reports over the chosen fields
pub fn aggregate_reports(
    reports: &[HeartbeatReport],
    fields: &[SeriesField],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: NonZeroU32,
) -> BucketedSeries {
    let samples = reports.iter().map(|report| {
        (
            report.timestamp,
            fields.iter().map(|field| field.value(report)).collect(),
        )
    });

    BucketedSeries {
        interval_seconds: interval.get(),
        fields: fields.to_vec(),
        points: aggregate(samples, fields.len(), start, end, interval),
    }
}

/// Keep the records inside `[start, end)`, ascending by timestamp
pub fn scatter<T, F>(records: Vec<T>, start: DateTime<Utc>, end: DateTime<Utc>, timestamp: F) -> Vec<T>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    let mut kept: Vec<T> = records
        .into_iter()
        .filter(|record| {
            let t = timestamp(record);
            t >= start && t < end
        })
        .collect();
    kept.sort_by_key(|record| timestamp(record));
    kept
}
