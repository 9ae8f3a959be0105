//! # Tide Relay Application Entry Point
//!
//! Wires the refresh core to a simple line-oriented host:
//! - **stdin**: one JSON object per line carrying the vessel's position and,
//!   optionally, the host's notion of the current date-time
//! - **stdout**: one JSON delta per line with the next high and low tide
//! - **stderr**: logs (`RUST_LOG` controls verbosity)
//!
//! ## Usage
//! ```text
//! tide-relay [--config tide-relay.toml] run
//! tide-relay once --lat 42.36 --lon -70.95
//! tide-relay stations --lat 42.36 --lon -70.95 --limit 5
//! ```


use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tide_relay_lib::config::{Config, DEFAULT_CONFIG_FILE};
use tide_relay_lib::host::{
    FixedPosition, HostClock, JsonLinesSink, LogStatus, SharedPosition, SystemClock,
};
use tide_relay_lib::refresh::{spawn_refresher, Collaborators, CycleOutcome, Refresher, Trigger};
use tide_relay_lib::stations::StationDirectory;
use tide_relay_lib::tide_data::{http_client, select_source};
use tide_relay_lib::Coordinate;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tide-relay", version, about = "Publishes the next high and low tide for the vessel's position")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh on a timer and on every host update read from stdin (default)
    Run,
    /// Run a single refresh for a fixed position and print the delta
    Once {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
    },
    /// List the NOAA tide stations closest to a position
    Stations {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

/// Apply one host update line to the shared position and clock.
///
/// A `position` key (even `null`) replaces the known position; a `datetime`
/// key replaces the host-reported time. Missing keys leave things unchanged.
fn apply_host_message(
    line: &str,
    position: &SharedPosition,
    clock: &HostClock,
) -> anyhow::Result<()> {
    let message: Value = serde_json::from_str(line).context("host update is not JSON")?;
    let Some(fields) = message.as_object() else {
        bail!("host update must be a JSON object");
    };

    if let Some(value) = fields.get("position") {
        let coordinate: Option<Coordinate> =
            serde_json::from_value(value.clone()).context("invalid position")?;
        position.set(coordinate);
    }
    if let Some(value) = fields.get("datetime") {
        let reported: Option<DateTime<Utc>> =
            serde_json::from_value(value.clone()).context("invalid datetime")?;
        clock.report(reported);
    }
    Ok(())
}

fn log_trigger(result: Trigger, cause: &str) {
    match result {
        Trigger::Queued => debug!(cause, "tide refresh queued"),
        Trigger::Coalesced => debug!(cause, "tide refresh already pending"),
        Trigger::Closed => warn!(cause, "tide refresher has stopped"),
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let client = http_client(config.request_timeout(), config.connect_timeout());
    let source = select_source(&config, client)
        .await
        .context("selecting tide source")?;
    info!(source = source.title(), "tide source ready");

    let position = SharedPosition::default();
    let clock = HostClock::default();
    let host = Collaborators {
        position: Arc::new(position.clone()),
        clock: Arc::new(clock.clone()),
        sink: Arc::new(JsonLinesSink::new(std::io::stdout())),
        status: Arc::new(LogStatus),
    };
    let refresher = Refresher::new(
        source,
        host,
        config.context(),
        config.host.source_label.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, worker) = spawn_refresher(refresher, shutdown_rx);

    // First tick fires immediately
    let mut ticker = tokio::time::interval(config.refresh_period());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            _ = ticker.tick() => log_trigger(handle.trigger(), "timer"),
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match apply_host_message(&line, &position, &clock) {
                    Ok(()) => log_trigger(handle.trigger(), "host update"),
                    Err(err) => warn!(error = %err, "ignoring host update"),
                },
                Ok(None) => {
                    info!("host feed closed");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "host feed failed");
                    break;
                }
            },
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(err) = worker.await {
        warn!(error = %err, "tide refresher ended abnormally");
    }
    Ok(())
}

async fn once(config: Config, coordinate: Coordinate) -> anyhow::Result<()> {
    let client = http_client(config.request_timeout(), config.connect_timeout());
    let source = select_source(&config, client)
        .await
        .context("selecting tide source")?;

    let host = Collaborators {
        position: Arc::new(FixedPosition(Some(coordinate))),
        clock: Arc::new(SystemClock),
        sink: Arc::new(JsonLinesSink::new(std::io::stdout())),
        status: Arc::new(LogStatus),
    };
    let mut refresher = Refresher::new(
        source,
        host,
        config.context(),
        config.host.source_label.clone(),
    );

    match refresher.run_cycle().await {
        CycleOutcome::Failed(err) => Err(err.into()),
        _ => Ok(()),
    }
}

async fn stations(config: Config, coordinate: Coordinate, limit: usize) -> anyhow::Result<()> {
    let client = http_client(config.request_timeout(), config.connect_timeout());
    let directory = StationDirectory::load(
        &client,
        &config.endpoints.noaa_stations_url,
        &config.station_cache_path(),
    )
    .await?;

    for (station, meters) in directory.near(coordinate, limit) {
        println!(
            "{:>8}  {:>8.1} km  {} (reference {})",
            station.id,
            meters / 1000.0,
            station.name,
            station.reference_id
        );
    }
    Ok(())
}

/// Main application entry point.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tide_relay=info,tide_relay_lib=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load_from_path(&cli.config);

    // Create Tokio runtime for async operations
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        match cli.command.unwrap_or(Command::Run) {
            Command::Run => run(config).await,
            Command::Once { lat, lon } => {
                once(
                    config,
                    Coordinate {
                        latitude: lat,
                        longitude: lon,
                    },
                )
                .await
            }
            Command::Stations { lat, lon, limit } => {
                stations(
                    config,
                    Coordinate {
                        latitude: lat,
                        longitude: lon,
                    },
                    limit,
                )
                .await
            }
        }
    })
}
