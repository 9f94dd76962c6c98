mod heartbeat;

use chrono::Utc;
use clap::Parser;
use heartbeat::SimulatedStation;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Publish heartbeats for a fleet of simulated stations
#[derive(Debug, Parser)]
#[command(name = "amos-simulator", version)]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Number of stations in the fleet
    #[arg(long, env = "STATIONS", default_value_t = 20)]
    stations: usize,

    /// Station code prefix; codes are `<prefix>-<n>`
    #[arg(long, env = "CODE_PREFIX", default_value = "SIM")]
    code_prefix: String,

    /// Seconds between two heartbeats of the same station
    #[arg(long, env = "PERIOD_SECONDS", default_value_t = 60)]
    period_seconds: u64,

    /// Share of heartbeats sent with a truncated status string
    #[arg(long, env = "MALFORMED_RATIO", default_value_t = 0.02)]
    malformed_ratio: f64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if !(0.0..=1.0).contains(&args.malformed_ratio) {
        error!("MALFORMED_RATIO must be between 0 and 1, got {}", args.malformed_ratio);
        std::process::exit(2);
    }

    info!("Starting AMOS station simulator");
    info!(
        "Broker: {}:{}, Stations: {}, Period: {}s",
        args.broker, args.port, args.stations, args.period_seconds
    );

    let client_id = format!("amos-sim-{}", uuid::Uuid::new_v4());
    let mut mqtt_options = MqttOptions::new(client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 20000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(2)).await;

    let mut rng = rand::thread_rng();
    let mut fleet: Vec<SimulatedStation> = (0..args.stations)
        .map(|n| SimulatedStation::new(format!("{}-{}", args.code_prefix, n), &mut rng))
        .collect();

    let period = Duration::from_secs(args.period_seconds.max(1));
    let mut ticker = tokio::time::interval(period);
    let mut published = 0u64;

    info!("Connected to MQTT broker, publishing heartbeats");

    loop {
        ticker.tick().await;
        let now = Utc::now();

        for station in fleet.iter_mut() {
            let heartbeat = station.next_heartbeat(now, args.malformed_ratio, &mut rng);
            let payload = match serde_json::to_string(&heartbeat) {
                Ok(p) => p,
                Err(e) => {
                    error!("Failed to serialize heartbeat: {}", e);
                    continue;
                }
            };

            match client
                .publish(station.topic(), QoS::AtLeastOnce, false, payload)
                .await
            {
                Ok(_) => published += 1,
                Err(e) => warn!("Failed to publish for {}: {}", station.code, e),
            }
        }

        info!("Published {} heartbeats", published);
    }
}
