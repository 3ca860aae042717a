//! Twin reconciler - keeps door and room digital twins in step with telemetry
//!
//! Module structure:
//! - `domain/` - Sensor payloads, semantic states, errors
//! - `io/` - External interfaces (twin store, HTTP, MQTT, audit)
//! - `services/` - Classifiers, history store, updater, orchestrator
//! - `infra/` - Infrastructure (Config, Metrics, Clock)

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use twin_reconciler::infra::{Config, Metrics, SystemClock};
use twin_reconciler::io::HttpTwinStore;
use twin_reconciler::services::{HistoryStore, Orchestrator};

/// Twin reconciler - telemetry to digital twin state
#[derive(Parser, Debug)]
#[command(name = "twin-reconciler", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Default: INFO, use RUST_LOG=debug for per-room occupancy decisions
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = env!("GIT_HASH"), "twin-reconciler starting");

    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, config_file = %args.config, "config_invalid");
            return ExitCode::FAILURE;
        }
    };

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        twin_store = ?config.twin_store_endpoint(),
        twin_store_timeout_ms = %config.twin_store_timeout_ms(),
        twins = ?config.twin_ids(),
        hallway_timeout_secs = %config.hallway_timeout_secs(),
        door_adjacent_timeout_secs = %config.door_adjacent_timeout_secs(),
        anomaly_enabled = %config.anomaly_enabled(),
        http_port = %config.http_port(),
        mqtt = %config.mqtt().is_some(),
        audit_file = ?config.audit_file(),
        "config_loaded"
    );

    match run(config).await {
        Ok(()) => {
            info!("twin-reconciler shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "twin-reconciler failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let endpoint = config
        .twin_store_endpoint()
        .ok_or_else(|| anyhow::anyhow!("twin store endpoint missing after validation"))?;
    let store = HttpTwinStore::new(
        endpoint,
        config.twin_store_api_token().map(str::to_string),
        Duration::from_millis(config.twin_store_timeout_ms()),
    )?;

    let metrics = Arc::new(Metrics::new());
    let orchestrator = Arc::new(Orchestrator::new(
        &config,
        Arc::new(store),
        Arc::new(HistoryStore::new()),
        Arc::new(SystemClock),
        metrics.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start MQTT subscriber (optional)
    if let Some(mqtt_config) = config.mqtt().cloned() {
        let mqtt_orchestrator = orchestrator.clone();
        let mqtt_shutdown = shutdown_rx.clone();
        let client_id = config.site_id().to_string();
        tokio::spawn(async move {
            if let Err(e) = twin_reconciler::io::mqtt::start_mqtt_client(
                &mqtt_config,
                &client_id,
                mqtt_orchestrator,
                mqtt_shutdown,
            )
            .await
            {
                error!(error = %e, "MQTT client error");
            }
        });
    }

    // Start metrics reporter
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Serve ingestion until shutdown
    twin_reconciler::io::http::start_http_server(
        config.http_bind_address(),
        config.http_port(),
        orchestrator,
        config.site_id().to_string(),
        shutdown_rx,
    )
    .await
    .map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))
}
