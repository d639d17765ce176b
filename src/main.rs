// src/main.rs - Windlass host: relay board, background loops and the web API
use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use windlass_rs::communication::{Action, EventLog};
use windlass_rs::config::{self, Config, RelayBackend, WindlassParameters};
use windlass_rs::hardware::temperature::{CpuThermalZone, SimulatedTemperature, TemperatureSensor};
use windlass_rs::hardware::{FanSwitch, RelayBoard, output_source};
use windlass_rs::scheduler::Scheduler;
use windlass_rs::telemetry::TelemetryChannel;
use windlass_rs::web::api::{AppStateInner, create_router};
use windlass_rs::web::control::ControlArbiter;
use windlass_rs::windlass::Windlass;

#[derive(Parser, Debug)]
#[command(name = "windlass-host", version, about = "Anchor windlass controller")]
struct Args {
    /// Configuration file
    #[arg(default_value = "windlass.toml")]
    config: String,
    /// Address to serve the API on, overrides the configuration
    #[arg(long)]
    bind: Option<String>,
    /// Use in-memory relays whatever the configuration says
    #[arg(long)]
    mock: bool,
    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    let config = if Path::new(&args.config).exists() {
        Some(config::load_config(&args.config))
    } else {
        None
    };
    let level = args
        .log_level
        .as_deref()
        .and_then(|level| level.parse().ok())
        .or_else(|| config.as_ref().and_then(|c| c.as_ref().ok()).map(|c| c.server.tracing_level()))
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    tracing::info!("Starting windlass host");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match config {
        Some(Ok(config)) => config,
        Some(Err(e)) => {
            tracing::error!("Failed to load config from '{}': {}", args.config, e);
            tracing::error!("Please ensure the configuration file is properly formatted");
            return Err(e.into());
        }
        None => {
            tracing::warn!("Configuration file '{}' not found, using defaults", args.config);
            Config::default()
        }
    };

    tracing::info!(
        "Boat: {} ({}m chain, down {} m/min, up {} m/min)",
        config.boat.boat_name.as_deref().unwrap_or("Unknown"),
        config.boat.chain_length,
        config.boat.down_speed,
        config.boat.up_speed
    );

    let source = output_source(&config.relay, args.mock);
    let board = RelayBoard::from_config(&config.relay, source.clone());
    let fan = FanSwitch::new(source, config.relay.fan_pin);
    let sensor: Arc<dyn TemperatureSensor> = if config.relay.backend == RelayBackend::Sysfs && !args.mock {
        Arc::new(CpuThermalZone::new(&config.monitor.thermal_zone))
    } else {
        tracing::info!("Mock relay board, simulated CPU temperature");
        Arc::new(SimulatedTemperature::new(60.0))
    };

    let (events, mut event_rx) = EventLog::channel(64, config.app.tz_hour_adjust);
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let by = event.identity.as_deref().unwrap_or("windlass");
            if event.action.is_length_relevant() {
                tracing::info!(
                    "Event {:?} ({}) at {}: target={}m actual={}m by {}",
                    event.action,
                    event.action.code(),
                    event.timestamp,
                    event.target_length,
                    event.actual_length,
                    by
                );
            } else {
                tracing::info!(
                    "Event {:?} ({}) at {} by {}",
                    event.action,
                    event.action.code(),
                    event.timestamp,
                    by
                );
            }
        }
    });

    let windlass = Windlass::new(
        Box::new(board),
        WindlassParameters::from_config(&config),
        &config.windlass,
        events.clone(),
    );
    let initial = windlass.status().await;
    events.record(Action::InitialValue, None, initial.target_length, initial.actual_length);
    let mut scheduler = Scheduler::new(windlass.clone(), sensor, fan, &config.app, &config.monitor);
    scheduler.start();

    let state = Arc::new(AppStateInner {
        telemetry: TelemetryChannel::new(&windlass, &config.windlass),
        windlass,
        arbiter: ControlArbiter::new(),
        app: RwLock::new(config.app.clone()),
        events,
    });
    let app = create_router(state);

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("Web API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    scheduler.shutdown().await;
    tracing::info!("Windlass host stopped");
    Ok(())
}
