//! # Deluge
//!
//! Runs a shallow-water simulation, or replays a recorded one, from a TOML
//! configuration file.
//!
//! Usage: `deluge [config.toml]` (default `deluge.toml`). Set `RUST_LOG` to
//! adjust logging.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use deluge_engine::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How often the run state is logged.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Main entry point.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("deluge=info".parse()?))
        .init();

    info!("Deluge starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(CONFIG_FILE), PathBuf::from);
    let mut config = SimulationConfig::load_from(&config_path);
    config.validate();

    if config.playback_dir.is_some() {
        run_playback(&config).await?;
    } else {
        run_live(config).await?;
    }

    info!("Deluge shutdown complete");
    Ok(())
}

async fn run_live(config: SimulationConfig) -> Result<()> {
    let terrain = config.terrain.load().context("loading terrain")?;
    let run_seconds = config.run_seconds;
    let mut sim = FluidSimulation::init(config, terrain.as_ref())
        .await
        .context("initialising simulation")?;

    let placed = sim.add_configured_sources();
    info!("Placed {placed} configured source(s)");
    if sim.backend_name().is_none() {
        warn!("No solver available, output stays blank");
    }

    sim.start();
    report_until_done(run_seconds, || sim.info(), || true).await?;
    sim.stop();

    let metrics = sim.metrics();
    info!(
        "{} ticks, {:.2} ms average, {} overruns",
        metrics.ticks(),
        metrics.average_tick_ms(),
        metrics.overruns()
    );
    Ok(())
}

async fn run_playback(config: &SimulationConfig) -> Result<()> {
    let mut session = PlaybackSession::open(config).context("opening recording")?;
    session.start();
    report_until_done(config.run_seconds, || session.info(), || !session.is_finished()).await?;
    session.stop();
    Ok(())
}

/// Logs the run state as JSON until interrupted, the deadline passes, or `active` turns false.
async fn report_until_done(
    run_seconds: Option<f64>,
    info: impl Fn() -> SimulationInfo,
    active: impl Fn() -> bool,
) -> Result<()> {
    let deadline = run_seconds
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(|s| tokio::time::Instant::now() + Duration::from_secs_f64(s));
    let mut report = tokio::time::interval(REPORT_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = report.tick() => {
                info!("{}", serde_json::to_string(&info())?);
                if !active() {
                    break;
                }
                if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                    break;
                }
            }
        }
    }
    Ok(())
}
