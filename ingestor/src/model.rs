use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::status::DecodedStatus;

pub type StationId = i64;

/// Geodetic position: degrees, degrees, metres above the ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Registered observation station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub code: String,
    pub name: String,
    pub location: Option<Location>,
}

/// Dome climate readings, copied verbatim from the `dome.t` map
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DomeReadings {
    pub temperature: Option<f64>,
    pub lens_temperature: Option<f64>,
    pub cpu_temperature: Option<f64>,
    pub humidity: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageReadings {
    pub primary_available: Option<f64>,
    pub primary_total: Option<f64>,
    pub permanent_available: Option<f64>,
    pub permanent_total: Option<f64>,
}

/// A heartbeat that passed validation but has not been stored yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHeartbeat {
    pub station_id: StationId,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub automatic: bool,
    pub raw_status_string: Option<String>,
    pub status: DecodedStatus,
    pub cover_position: Option<f64>,
    pub readings: DomeReadings,
    pub storage: StorageReadings,
}

impl NewHeartbeat {
    pub fn into_report(self, id: i64) -> HeartbeatReport {
        HeartbeatReport {
            id,
            station_id: self.station_id,
            timestamp: self.timestamp,
            received_at: self.received_at,
            automatic: self.automatic,
            raw_status_string: self.raw_status_string,
            status: self.status,
            cover_position: self.cover_position,
            readings: self.readings,
            storage: self.storage,
        }
    }
}

/// One stored telemetry sample. Insert-only; never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatReport {
    pub id: i64,
    pub station_id: StationId,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub automatic: bool,
    pub raw_status_string: Option<String>,
    pub status: DecodedStatus,
    pub cover_position: Option<f64>,
    pub readings: DomeReadings,
    pub storage: StorageReadings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    Ok,
    Timeout,
    NoReports,
    Malfunction,
}

/// Derived on every request from the latest heartbeat, never stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationHealth {
    pub station_id: StationId,
    pub state: HealthState,
    #[serde(serialize_with = "serialize_age")]
    pub last_report_age: Option<Duration>,
    pub detail: String,
}

fn serialize_age<S: Serializer>(age: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match age {
        Some(age) => serializer.serialize_some(&(age.num_milliseconds() as f64 / 1000.0)),
        None => serializer.serialize_none(),
    }
}

/// Apparent direction on the sky, degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SkyPoint {
    pub azimuth: Option<f64>,
    pub altitude: Option<f64>,
}

/// Stored meteor sighting as seen from one station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub id: i64,
    pub station_id: Option<StationId>,
    /// Time of light maximum
    pub timestamp: Option<DateTime<Utc>>,
    pub beginning: SkyPoint,
    pub lightmax: SkyPoint,
    pub end: SkyPoint,
    pub beginning_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub magnitude: Option<f64>,
    /// Light maximum of the associated meteor, if one was matched
    pub meteor_location: Option<Location>,
}

impl Sighting {
    /// Time from beginning to end of the trail
    pub fn duration(&self) -> Option<Duration> {
        Some(self.end_time? - self.beginning_time?)
    }
}

/// A validated sighting upload ready for the store
#[derive(Debug, Clone, PartialEq)]
pub struct SightingSubmission {
    pub station_id: StationId,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub avi_size: Option<i64>,
    pub composite_jpg: Option<Vec<u8>>,
    pub composite_xml: Option<Vec<u8>>,
}

/// Raw parts of a sighting upload before validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SightingUpload {
    /// JSON text of the `meta` form field
    pub meta: Option<String>,
    pub jpg: Option<Vec<u8>>,
    pub xml: Option<Vec<u8>>,
}
