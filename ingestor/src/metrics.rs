use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::error;

use crate::errors::Error;

/// Ingestion counters, each set owning its own registry
#[derive(Clone)]
pub struct IngestMetrics {
    registry: Registry,
    pub messages_total: IntCounterVec,
    pub accepted_total: IntCounterVec,
    pub rejected_total: IntCounterVec,
    pub decode_degraded_total: IntCounter,
    pub store_failures_total: IntCounter,
    pub ingest_latency_seconds: Histogram,
}

impl IngestMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let messages_total = IntCounterVec::new(
            Opts::new("ingestor_messages_total", "Total submissions received from stations"),
            &["kind"],
        )?;
        let accepted_total = IntCounterVec::new(
            Opts::new("ingestor_accepted_total", "Total submissions stored"),
            &["kind"],
        )?;
        let rejected_total = IntCounterVec::new(
            Opts::new("ingestor_rejected_total", "Total submissions rejected by validation"),
            &["reason"],
        )?;
        let decode_degraded_total = IntCounter::with_opts(Opts::new(
            "ingestor_decode_degraded_total",
            "Total status strings that fell back to the all-null decode",
        ))?;
        let store_failures_total = IntCounter::with_opts(Opts::new(
            "ingestor_store_failures_total",
            "Total store calls that failed",
        ))?;
        let ingest_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "ingestor_ingest_latency_seconds",
                "Time taken to validate and store one submission",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
        )?;

        registry.register(Box::new(messages_total.clone()))?;
        registry.register(Box::new(accepted_total.clone()))?;
        registry.register(Box::new(rejected_total.clone()))?;
        registry.register(Box::new(decode_degraded_total.clone()))?;
        registry.register(Box::new(store_failures_total.clone()))?;
        registry.register(Box::new(ingest_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            messages_total,
            accepted_total,
            rejected_total,
            decode_degraded_total,
            store_failures_total,
            ingest_latency_seconds,
        })
    }

    /// Count a failed submission under the matching counter
    pub fn record_failure(&self, error: &Error) {
        match error {
            Error::UnknownStation(_) => self.rejected_total.with_label_values(&["unknown_station"]).inc(),
            Error::MalformedPayload { .. } => {
                self.rejected_total.with_label_values(&["malformed_payload"]).inc()
            }
            Error::MalformedTimestamp(_) => {
                self.rejected_total.with_label_values(&["malformed_timestamp"]).inc()
            }
            Error::StoreUnavailable(_) => self.store_failures_total.inc(),
            _ => {}
        }
    }

    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
