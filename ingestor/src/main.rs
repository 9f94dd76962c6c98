use amos_ingestor::clock::SystemClock;
use amos_ingestor::config::Config;
use amos_ingestor::db::{self, PgStore};
use amos_ingestor::metrics::IngestMetrics;
use amos_ingestor::service::AmosService;
use amos_ingestor::{mqtt, rest};
use anyhow::Context;
use axum::{extract::State, routing::get, Router};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    info!("Starting AMOS Ingestor");
    info!("MQTT broker: {}:{}", config.mqtt_broker, config.mqtt_port);
    info!("HTTP server: {}", config.http_addr);
    info!(
        "Database: {}",
        config.database_url.split('@').last().unwrap_or("***")
    );
    info!(
        "Health timeout: {}s, fault rules: {}",
        config.health.timeout.num_seconds(),
        config.health.fault_rules.len()
    );

    let metrics = Arc::new(IngestMetrics::new().context("Failed to register metrics")?);

    let pool = db::make_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let store = Arc::new(PgStore::new(pool));

    let service = AmosService::new(store, Arc::new(SystemClock), metrics.clone())
        .with_health_policy(config.health.clone())
        .with_series_defaults(config.series);

    let client_id = format!("amos-ingestor-{}", uuid::Uuid::new_v4());
    let gateway = service.gateway().clone();
    let (broker, port) = (config.mqtt_broker.clone(), config.mqtt_port);
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt::run_mqtt(broker, port, client_id, gateway).await {
            error!("MQTT task failed: {}", e);
        }
    });

    let app = Router::new()
        .route("/metrics", get(metrics_handler).with_state(metrics))
        .merge(rest::create_router(service));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.http_addr))?;

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = mqtt_handle => {
            error!("MQTT task terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
    Ok(())
}

async fn metrics_handler(State(metrics): State<Arc<IngestMetrics>>) -> String {
    metrics.gather()
}
