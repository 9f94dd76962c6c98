use crate::errors::{Error, Result};
use crate::gateway::IngestionGateway;
use crate::model::HeartbeatReport;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tracing::{debug, error, info, warn};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 2000;

pub const HEARTBEAT_TOPIC: &str = "station/+/heartbeat";

pub async fn run_mqtt(
    broker: String,
    port: u16,
    client_id: String,
    gateway: IngestionGateway,
) -> Result<()> {
    info!("Connecting to MQTT broker at {}:{}", broker, port);

    let mut mqtt_options = MqttOptions::new(client_id, broker, port);
    mqtt_options.set_keep_alive(std::time::Duration::from_secs(30));
    mqtt_options.set_clean_session(false);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10000);

    client.subscribe(HEARTBEAT_TOPIC, QoS::AtLeastOnce).await?;

    info!("Subscribed to {} with QoS 1", HEARTBEAT_TOPIC);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    "Received message on topic {}, size: {} bytes",
                    publish.topic,
                    publish.payload.len()
                );

                let Some(station_code) = station_code(&publish.topic) else {
                    warn!("Ignoring message on unexpected topic {}", publish.topic);
                    continue;
                };

                if let Err(e) = ingest_with_retry(&gateway, station_code, &publish.payload).await {
                    error!(
                        "Dropping heartbeat from station {}: {}",
                        station_code, e
                    );
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc reconnects on the next poll
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// Station code from a `station/<code>/heartbeat` topic
pub fn station_code(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("station"), Some(code), Some("heartbeat"), None) if !code.is_empty() => Some(code),
        _ => None,
    }
}

/// Hand one heartbeat to the gateway, retrying transient store failures
/// with exponential backoff
async fn ingest_with_retry(
    gateway: &IngestionGateway,
    station_code: &str,
    payload: &[u8],
) -> Result<HeartbeatReport> {
    let mut attempt = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match gateway.receive_heartbeat(station_code, payload).await {
            Ok(report) => {
                if attempt > 1 {
                    info!("Heartbeat stored on attempt {}", attempt);
                }
                return Ok(report);
            }
            Err(e) => {
                if !should_retry(&e, attempt) {
                    return Err(e);
                }

                warn!(
                    "Heartbeat ingestion failed (attempt {}/{}): {}. Retrying in {}ms...",
                    attempt, MAX_RETRIES, e, backoff_ms
                );

                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}

fn should_retry(error: &Error, attempt: u32) -> bool {
    attempt < MAX_RETRIES && error.is_transient()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::metrics::IngestMetrics;
    use crate::model::Station;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn gateway(store: Arc<MemoryStore>) -> IngestionGateway {
        IngestionGateway::new(
            store,
            Arc::new(SystemClock),
            Arc::new(IngestMetrics::new().unwrap()),
        )
    }

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_stations([Station {
            id: 1,
            code: "SVK-01".to_string(),
            name: "Test".to_string(),
            location: None,
        }]))
    }

    #[test]
    fn test_station_code() {
        assert_eq!(station_code("station/AGO/heartbeat"), Some("AGO"));
        assert_eq!(station_code("station//heartbeat"), None);
        assert_eq!(station_code("station/AGO/sighting"), None);
        assert_eq!(station_code("station/AGO/heartbeat/extra"), None);
        assert_eq!(station_code("telemetry/AGO"), None);
    }

    #[test]
    fn test_retry_policy() {
        let transient = Error::StoreUnavailable(sqlx::Error::PoolClosed);
        assert!(should_retry(&transient, 1));
        assert!(!should_retry(&transient, MAX_RETRIES));
        assert!(!should_retry(&Error::malformed("time", "missing"), 1));
        assert!(!should_retry(&Error::UnknownStation("XX".to_string()), 1));
    }

    #[test]
    fn test_ingest_valid() {
        tokio_test::block_on(async {
            let store = store();
            let gateway = gateway(store.clone());
            let payload = br#"{"time": "2024-01-01 00:00:00", "auto": true}"#;

            let report = ingest_with_retry(&gateway, "SVK-01", payload).await.unwrap();
            assert_eq!(report.station_id, 1);
            assert_eq!(store.heartbeat_count(), 1);
        });
    }

    #[test]
    fn test_ingest_invalid_json_is_not_retried() {
        tokio_test::block_on(async {
            let store = store();
            let gateway = gateway(store.clone());

            assert!(ingest_with_retry(&gateway, "SVK-01", b"invalid json").await.is_err());
            assert_eq!(store.heartbeat_count(), 0);
        });
    }

    #[tokio::test]
    async fn test_store_outage_gives_up() {
        let store = store();
        store.set_unavailable(true);
        let gateway = gateway(store.clone());
        let payload = br#"{"time": "2024-01-01 00:00:00", "auto": true}"#;

        let err = ingest_with_retry(&gateway, "SVK-01", payload).await.unwrap_err();
        assert!(err.is_transient());
    }
}
