//! Persistence collaborator.
//!
//! The engine only ever talks to storage through [`Store`]. Reports are
//! insert-only: there is no update or delete.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::errors::{Error, Result};
use crate::model::{
    HeartbeatReport, Location, NewHeartbeat, SightingSubmission, Station, StationId,
};

#[async_trait]
pub trait Store: Send + Sync {
    async fn station_by_code(&self, code: &str) -> Result<Option<Station>>;

    /// Insert one heartbeat and return its id
    async fn create_heartbeat(&self, heartbeat: &NewHeartbeat) -> Result<i64>;

    /// Insert one sighting upload and return its id
    async fn create_sighting(&self, sighting: &SightingSubmission) -> Result<i64>;

    /// Most recent heartbeat by station timestamp
    async fn latest_heartbeat(&self, station_id: StationId) -> Result<Option<HeartbeatReport>>;

    /// Heartbeats with `start <= timestamp < end`, in no particular order
    async fn heartbeats_in_range(
        &self,
        station_id: StationId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HeartbeatReport>>;

    async fn station_location(&self, station_id: StationId) -> Result<Option<Location>>;
}

#[derive(Debug, Default)]
struct Tables {
    stations: Vec<Station>,
    heartbeats: Vec<HeartbeatReport>,
    sightings: Vec<(i64, SightingSubmission)>,
}

/// In-process store for tests and local runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stations(stations: impl IntoIterator<Item = Station>) -> Self {
        let store = Self::new();
        store.lock().stations.extend(stations);
        store
    }

    pub fn add_station(&self, station: Station) {
        self.lock().stations.push(station);
    }

    /// Make every following call fail with [`Error::StoreUnavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn heartbeat_count(&self) -> usize {
        self.lock().heartbeats.len()
    }

    pub fn sighting(&self, id: i64) -> Option<SightingSubmission> {
        self.lock()
            .sightings
            .iter()
            .find(|(stored, _)| *stored == id)
            .map(|(_, sighting)| sighting.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::StoreUnavailable(sqlx::Error::PoolClosed))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn station_by_code(&self, code: &str) -> Result<Option<Station>> {
        self.check()?;
        Ok(self
            .lock()
            .stations
            .iter()
            .find(|station| station.code == code)
            .cloned())
    }

    async fn create_heartbeat(&self, heartbeat: &NewHeartbeat) -> Result<i64> {
        self.check()?;
        let mut tables = self.lock();
        let id = tables.heartbeats.len() as i64 + 1;
        tables.heartbeats.push(heartbeat.clone().into_report(id));
        Ok(id)
    }

    async fn create_sighting(&self, sighting: &SightingSubmission) -> Result<i64> {
        self.check()?;
        let mut tables = self.lock();
        let id = tables.sightings.len() as i64 + 1;
        tables.sightings.push((id, sighting.clone()));
        Ok(id)
    }

    async fn latest_heartbeat(&self, station_id: StationId) -> Result<Option<HeartbeatReport>> {
        self.check()?;
        Ok(self
            .lock()
            .heartbeats
            .iter()
            .filter(|report| report.station_id == station_id)
            .max_by_key(|report| (report.timestamp, report.id))
            .cloned())
    }

    async fn heartbeats_in_range(
        &self,
        station_id: StationId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HeartbeatReport>> {
        self.check()?;
        Ok(self
            .lock()
            .heartbeats
            .iter()
            .filter(|report| {
                report.station_id == station_id && report.timestamp >= start && report.timestamp < end
            })
            .cloned()
            .collect())
    }

    async fn station_location(&self, station_id: StationId) -> Result<Option<Location>> {
        self.check()?;
        Ok(self
            .lock()
            .stations
            .iter()
            .find(|station| station.id == station_id)
            .and_then(|station| station.location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DomeReadings, StorageReadings};
    use crate::status::DecodedStatus;
    use chrono::{Duration, TimeZone};

    fn station() -> Station {
        Station {
            id: 3,
            code: "AGO".to_string(),
            name: "Modra".to_string(),
            location: Some(Location {
                latitude: 48.373,
                longitude: 17.274,
                altitude: 531.0,
            }),
        }
    }

    fn heartbeat(seconds: i64) -> NewHeartbeat {
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(seconds);
        NewHeartbeat {
            station_id: 3,
            timestamp,
            received_at: timestamp,
            automatic: true,
            raw_status_string: None,
            status: DecodedStatus::default(),
            cover_position: None,
            readings: DomeReadings::default(),
            storage: StorageReadings::default(),
        }
    }

    #[tokio::test]
    async fn test_latest_is_by_station_timestamp() {
        let store = MemoryStore::with_stations([station()]);
        store.create_heartbeat(&heartbeat(60)).await.unwrap();
        store.create_heartbeat(&heartbeat(30)).await.unwrap();

        let latest = store.latest_heartbeat(3).await.unwrap().unwrap();
        assert_eq!(latest.id, 1);
        assert!(store.latest_heartbeat(4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_range_is_half_open() {
        let store = MemoryStore::new();
        for seconds in [0, 30, 60, 90] {
            store.create_heartbeat(&heartbeat(seconds)).await.unwrap();
        }
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 30).unwrap();
        let found = store.heartbeats_in_range(3, start, end).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicates_are_stored() {
        let store = MemoryStore::new();
        let first = store.create_heartbeat(&heartbeat(0)).await.unwrap();
        let second = store.create_heartbeat(&heartbeat(0)).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.heartbeat_count(), 2);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryStore::with_stations([station()]);
        store.set_unavailable(true);
        let err = store.station_by_code("AGO").await.unwrap_err();
        assert!(err.is_transient());

        store.set_unavailable(false);
        assert_eq!(store.station_by_code("AGO").await.unwrap(), Some(station()));
        assert_eq!(store.station_location(3).await.unwrap(), station().location);
        assert_eq!(store.station_location(9).await.unwrap(), None);
    }
}
