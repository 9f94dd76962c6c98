//! Operations offered to the web layer.
//!
//! [`AmosService`] ties the pure modules to their collaborators: the store
//! for records, the clock for "now", and the ephemeris for sun and moon
//! positions.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::celestial::{self, Ephemeris, Horizontal, SightingGeometry};
use crate::clock::Clock;
use crate::config::SeriesDefaults;
use crate::errors::{Error, Result};
use crate::gateway::IngestionGateway;
use crate::health::{self, HealthPolicy};
use crate::metrics::IngestMetrics;
use crate::model::{Sighting, SightingUpload, StationHealth, StationId};
use crate::series::{self, Interval, Series, SeriesField};
use crate::status::{self, DecodedStatus};
use crate::store::Store;

/// Upper bound on the number of slots a single series request may produce
pub const MAX_BUCKETS: usize = 100_000;

#[derive(Clone)]
pub struct AmosService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    gateway: IngestionGateway,
    ephemeris: Option<Arc<dyn Ephemeris>>,
    health: HealthPolicy,
    series: SeriesDefaults,
}

impl AmosService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, metrics: Arc<IngestMetrics>) -> Self {
        let gateway = IngestionGateway::new(store.clone(), clock.clone(), metrics);
        Self {
            store,
            clock,
            gateway,
            ephemeris: None,
            health: HealthPolicy::default(),
            series: SeriesDefaults::default(),
        }
    }

    pub fn with_ephemeris(mut self, ephemeris: Arc<dyn Ephemeris>) -> Self {
        self.ephemeris = Some(ephemeris);
        self
    }

    pub fn with_health_policy(mut self, policy: HealthPolicy) -> Self {
        self.health = policy;
        self
    }

    pub fn with_series_defaults(mut self, defaults: SeriesDefaults) -> Self {
        self.series = defaults;
        self
    }

    pub fn gateway(&self) -> &IngestionGateway {
        &self.gateway
    }

    pub fn decode_status(&self, raw: Option<&str>) -> DecodedStatus {
        status::decode(raw)
    }

    /// Resolve a station code for the read endpoints
    pub async fn station_id(&self, station_code: &str) -> Result<StationId> {
        self.store
            .station_by_code(station_code)
            .await?
            .map(|station| station.id)
            .ok_or_else(|| Error::UnknownStation(station_code.to_string()))
    }

    pub async fn classify_health(&self, station_id: StationId) -> Result<StationHealth> {
        let latest = self.store.latest_heartbeat(station_id).await?;
        Ok(health::classify(
            station_id,
            latest.as_ref(),
            self.clock.now(),
            &self.health,
        ))
    }

    /// Missing bounds default to `[now − window, now + interval)`, and empty
    /// `fields` means every tracked field
    pub async fn aggregate_series(
        &self,
        station_id: StationId,
        fields: &[SeriesField],
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        interval: Option<Interval>,
    ) -> Result<Series> {
        let interval = interval.unwrap_or(Interval::Every(self.series.interval));
        let now = self.clock.now();
        let step = match interval {
            Interval::Every(seconds) => Duration::seconds(i64::from(seconds.get())),
            Interval::All => Duration::zero(),
        };
        let end = end.unwrap_or(now + step);
        let start = start.unwrap_or(now - self.series.window);

        let fields = if fields.is_empty() {
            SeriesField::ALL.to_vec()
        } else {
            fields.to_vec()
        };

        match interval {
            Interval::All => {
                let reports = if start < end {
                    self.store.heartbeats_in_range(station_id, start, end).await?
                } else {
                    Vec::new()
                };
                Ok(Series::Scatter {
                    reports: series::scatter(reports, start, end, |report| report.timestamp),
                })
            }
            Interval::Every(seconds) => {
                let count = series::bucket_count(start, end, seconds);
                if count > MAX_BUCKETS {
                    return Err(Error::malformed(
                        "interval",
                        format!("{} buckets requested, at most {} allowed", count, MAX_BUCKETS),
                    ));
                }
                let grid_start = series::floor_to(start, seconds);
                let reports = if count > 0 {
                    self.store.heartbeats_in_range(station_id, grid_start, end).await?
                } else {
                    Vec::new()
                };
                Ok(Series::Buckets(series::aggregate_reports(
                    &reports, &fields, start, end, seconds,
                )))
            }
        }
    }

    pub async fn sighting_geometry(&self, sighting: &Sighting) -> Result<SightingGeometry> {
        let station = match sighting.station_id {
            Some(station_id) => self.store.station_location(station_id).await?,
            None => None,
        };
        Ok(celestial::sighting_geometry(
            self.ephemeris.as_deref(),
            sighting,
            station.as_ref(),
        ))
    }

    /// Sun altitude and azimuth over a station, at `at` or now.
    /// `None` without an ephemeris or a known station location.
    pub async fn station_sun_position(
        &self,
        station_id: StationId,
        at: Option<DateTime<Utc>>,
    ) -> Result<Option<Horizontal>> {
        let Some(ephemeris) = self.ephemeris.as_deref() else {
            return Ok(None);
        };
        let location = self.store.station_location(station_id).await?;
        let at = at.unwrap_or_else(|| self.clock.now());
        Ok(celestial::sun_position(ephemeris, location.as_ref(), at))
    }

    pub async fn ingest_heartbeat(&self, station_code: &str, payload: &[u8]) -> Result<i64> {
        self.gateway
            .receive_heartbeat(station_code, payload)
            .await
            .map(|report| report.id)
    }

    pub async fn ingest_sighting(&self, station_code: &str, upload: SightingUpload) -> Result<i64> {
        self.gateway
            .receive_sighting(station_code, upload)
            .await
            .map(|(id, _)| id)
    }
}
