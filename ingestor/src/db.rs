use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::Result;
use crate::model::{
    DomeReadings, HeartbeatReport, Location, NewHeartbeat, SightingSubmission, Station, StationId,
    StorageReadings,
};
use crate::status::{CoverState, DecodedStatus};
use crate::store::Store;

const HEARTBEAT_COLUMNS: &str = "id, station_id, ts, received_at, automatic, raw_status, \
     cover_state, lens_heating, camera_heating, intensifier_active, fan_active, \
     rain_sensor_active, light_sensor_active, computer_power, cover_position, \
     temperature, lens_temperature, cpu_temperature, humidity, \
     storage_primary_available, storage_primary_total, \
     storage_permanent_available, storage_permanent_total";

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// [`Store`] backed by PostgreSQL
///
/// Every call is a single statement. Failures surface as
/// `StoreUnavailable`; retrying is left to the caller.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn location_from_row(row: &PgRow) -> Result<Option<Location>> {
    let latitude: Option<f64> = row.try_get("latitude")?;
    let longitude: Option<f64> = row.try_get("longitude")?;
    let altitude: Option<f64> = row.try_get("altitude")?;

    Ok(match (latitude, longitude, altitude) {
        (Some(latitude), Some(longitude), Some(altitude)) => Some(Location {
            latitude,
            longitude,
            altitude,
        }),
        _ => None,
    })
}

fn heartbeat_from_row(row: &PgRow) -> Result<HeartbeatReport> {
    let cover_code: String = row.try_get("cover_state")?;
    let status = DecodedStatus {
        cover_state: cover_code
            .chars()
            .next()
            .map(CoverState::from_code)
            .unwrap_or_default(),
        lens_heating: row.try_get("lens_heating")?,
        camera_heating: row.try_get("camera_heating")?,
        intensifier_active: row.try_get("intensifier_active")?,
        fan_active: row.try_get("fan_active")?,
        rain_sensor_active: row.try_get("rain_sensor_active")?,
        light_sensor_active: row.try_get("light_sensor_active")?,
        computer_power: row.try_get("computer_power")?,
    };

    Ok(HeartbeatReport {
        id: row.try_get("id")?,
        station_id: row.try_get("station_id")?,
        timestamp: row.try_get("ts")?,
        received_at: row.try_get("received_at")?,
        automatic: row.try_get("automatic")?,
        raw_status_string: row.try_get("raw_status")?,
        status,
        cover_position: row.try_get("cover_position")?,
        readings: DomeReadings {
            temperature: row.try_get("temperature")?,
            lens_temperature: row.try_get("lens_temperature")?,
            cpu_temperature: row.try_get("cpu_temperature")?,
            humidity: row.try_get("humidity")?,
        },
        storage: StorageReadings {
            primary_available: row.try_get("storage_primary_available")?,
            primary_total: row.try_get("storage_primary_total")?,
            permanent_available: row.try_get("storage_permanent_available")?,
            permanent_total: row.try_get("storage_permanent_total")?,
        },
    })
}

#[async_trait]
impl Store for PgStore {
    async fn station_by_code(&self, code: &str) -> Result<Option<Station>> {
        let row = sqlx::query(
            "SELECT id, code, name, latitude, longitude, altitude FROM stations WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Station {
                id: row.try_get("id")?,
                code: row.try_get("code")?,
                name: row.try_get("name")?,
                location: location_from_row(&row)?,
            })),
            None => Ok(None),
        }
    }

    async fn create_heartbeat(&self, heartbeat: &NewHeartbeat) -> Result<i64> {
        let query = r#"
            INSERT INTO heartbeats (
                station_id, ts, received_at, automatic, raw_status,
                cover_state, lens_heating, camera_heating, intensifier_active, fan_active,
                rain_sensor_active, light_sensor_active, computer_power, cover_position,
                temperature, lens_temperature, cpu_temperature, humidity,
                storage_primary_available, storage_primary_total,
                storage_permanent_available, storage_permanent_total
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
            RETURNING id
            "#;

        let status = &heartbeat.status;
        let id: i64 = sqlx::query_scalar(query)
            .bind(heartbeat.station_id)
            .bind(heartbeat.timestamp)
            .bind(heartbeat.received_at)
            .bind(heartbeat.automatic)
            .bind(heartbeat.raw_status_string.as_deref())
            .bind(status.cover_state.code().to_string())
            .bind(status.lens_heating)
            .bind(status.camera_heating)
            .bind(status.intensifier_active)
            .bind(status.fan_active)
            .bind(status.rain_sensor_active)
            .bind(status.light_sensor_active)
            .bind(status.computer_power)
            .bind(heartbeat.cover_position)
            .bind(heartbeat.readings.temperature)
            .bind(heartbeat.readings.lens_temperature)
            .bind(heartbeat.readings.cpu_temperature)
            .bind(heartbeat.readings.humidity)
            .bind(heartbeat.storage.primary_available)
            .bind(heartbeat.storage.primary_total)
            .bind(heartbeat.storage.permanent_available)
            .bind(heartbeat.storage.permanent_total)
            .fetch_one(&self.pool)
            .await?;

        debug!("Stored heartbeat {} for station {}", id, heartbeat.station_id);
        Ok(id)
    }

    async fn create_sighting(&self, sighting: &SightingSubmission) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sightings (station_id, ts, received_at, avi_size, composite_jpg, composite_xml)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(sighting.station_id)
        .bind(sighting.timestamp)
        .bind(sighting.received_at)
        .bind(sighting.avi_size)
        .bind(sighting.composite_jpg.as_deref())
        .bind(sighting.composite_xml.as_deref())
        .fetch_one(&self.pool)
        .await?;

        debug!("Stored sighting {} for station {}", id, sighting.station_id);
        Ok(id)
    }

    async fn latest_heartbeat(&self, station_id: StationId) -> Result<Option<HeartbeatReport>> {
        let query = format!(
            "SELECT {} FROM heartbeats WHERE station_id = $1 ORDER BY ts DESC, id DESC LIMIT 1",
            HEARTBEAT_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(station_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(heartbeat_from_row).transpose()
    }

    async fn heartbeats_in_range(
        &self,
        station_id: StationId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HeartbeatReport>> {
        let query = format!(
            "SELECT {} FROM heartbeats WHERE station_id = $1 AND ts >= $2 AND ts < $3 ORDER BY ts",
            HEARTBEAT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(station_id)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(heartbeat_from_row).collect()
    }

    async fn station_location(&self, station_id: StationId) -> Result<Option<Location>> {
        let row = sqlx::query("SELECT latitude, longitude, altitude FROM stations WHERE id = $1")
            .bind(station_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => location_from_row(&row),
            None => Ok(None),
        }
    }
}
