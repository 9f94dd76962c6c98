//! Station submissions: resolve, validate, decode, write once. Retries
//! belong to the caller.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::errors::{Error, Result};
use crate::metrics::IngestMetrics;
use crate::model::{HeartbeatReport, NewHeartbeat, SightingSubmission, SightingUpload, Station};
use crate::status;
use crate::store::Store;
use crate::validate;

const HEARTBEAT: &str = "heartbeat";
const SIGHTING: &str = "sighting";

#[derive(Clone)]
pub struct IngestionGateway {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    metrics: Arc<IngestMetrics>,
}

impl IngestionGateway {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, metrics: Arc<IngestMetrics>) -> Self {
        Self {
            store,
            clock,
            metrics,
        }
    }

    /// An undecodable status string is logged, not rejected
    pub async fn receive_heartbeat(&self, station_code: &str, payload: &[u8]) -> Result<HeartbeatReport> {
        self.metrics.messages_total.with_label_values(&[HEARTBEAT]).inc();
        let _timer = self.metrics.ingest_latency_seconds.start_timer();

        let result = self.store_heartbeat(station_code, payload).await;
        self.observe(HEARTBEAT, station_code, &result);
        result
    }

    pub async fn receive_sighting(
        &self,
        station_code: &str,
        upload: SightingUpload,
    ) -> Result<(i64, SightingSubmission)> {
        self.metrics.messages_total.with_label_values(&[SIGHTING]).inc();
        let _timer = self.metrics.ingest_latency_seconds.start_timer();

        let result = self.store_sighting(station_code, upload).await;
        self.observe(SIGHTING, station_code, &result);
        result
    }

    async fn resolve(&self, station_code: &str) -> Result<Station> {
        self.store
            .station_by_code(station_code)
            .await?
            .ok_or_else(|| Error::UnknownStation(station_code.to_string()))
    }

    async fn store_heartbeat(&self, station_code: &str, payload: &[u8]) -> Result<HeartbeatReport> {
        let station = self.resolve(station_code).await?;

        let body: Value = serde_json::from_slice(payload)
            .map_err(|e| Error::malformed("payload", e.to_string()))?;
        let payload = validate::heartbeat_payload(&body)?;

        let decoded = match status::try_decode(payload.status.as_deref()) {
            Ok(decoded) => decoded,
            Err(reason) => {
                self.metrics.decode_degraded_total.inc();
                warn!(
                    "Degraded status decode for station {}: {} ({:?})",
                    station.code,
                    reason,
                    payload.status.as_deref().unwrap_or_default()
                );
                Default::default()
            }
        };

        let heartbeat = NewHeartbeat {
            station_id: station.id,
            timestamp: payload.time,
            received_at: self.clock.now(),
            automatic: payload.automatic,
            raw_status_string: payload.status,
            status: decoded,
            cover_position: payload.cover_position,
            readings: payload.readings,
            storage: payload.storage,
        };

        let id = self.store.create_heartbeat(&heartbeat).await?;
        Ok(heartbeat.into_report(id))
    }

    async fn store_sighting(
        &self,
        station_code: &str,
        upload: SightingUpload,
    ) -> Result<(i64, SightingSubmission)> {
        let station = self.resolve(station_code).await?;

        let meta = upload
            .meta
            .as_deref()
            .ok_or_else(|| Error::malformed("meta", "missing"))?;
        let meta: Value =
            serde_json::from_str(meta).map_err(|e| Error::malformed("meta", e.to_string()))?;
        let meta = validate::sighting_meta(&meta)?;

        let submission = SightingSubmission {
            station_id: station.id,
            timestamp: meta.timestamp,
            received_at: self.clock.now(),
            avi_size: meta.avi_size,
            composite_jpg: upload.jpg,
            composite_xml: upload.xml,
        };

        let id = self.store.create_sighting(&submission).await?;
        Ok((id, submission))
    }

    fn observe<T>(&self, kind: &str, station_code: &str, result: &Result<T>) {
        match result {
            Ok(_) => {
                self.metrics.accepted_total.with_label_values(&[kind]).inc();
                debug!("Accepted {} from station {}", kind, station_code);
            }
            Err(e) => {
                self.metrics.record_failure(e);
                warn!("Rejected {} from station {}: {}", kind, station_code, e);
            }
        }
    }
}
