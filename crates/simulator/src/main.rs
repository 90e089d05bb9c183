//! signal-grid
//!
//! Runs a simulated traffic-control network in-process: a registry and a
//! coordinator plus one edge node per preset intersection. Prints periodic
//! snapshots until the run time elapses or Ctrl+C is pressed.

use anyhow::Result;
use clap::Parser;
use grid_network::{NetworkSnapshot, TrafficNetwork};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::SimulatorConfig;

/// Simulated traffic-control network
#[derive(Parser, Debug)]
#[command(name = "signal-grid")]
#[command(about = "In-process simulation of cooperating traffic-light nodes", long_about = None)]
struct Args {
    /// JSON config file (defaults are used for missing fields)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds (runs until Ctrl+C if omitted)
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Number of preset intersections to start (all if omitted)
    #[arg(long)]
    nodes: Option<usize>,

    /// Switch rush hour on after this many seconds
    #[arg(long)]
    rush_hour_after_secs: Option<u64>,

    /// Print a snapshot every N seconds (0 = never)
    #[arg(long, default_value = "10")]
    snapshot_every_secs: u64,

    /// Print full snapshots as JSON
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &args.config {
        Some(path) => SimulatorConfig::load(path)?,
        None => SimulatorConfig::default(),
    };

    run(args, config).await
}

async fn run(args: Args, config: SimulatorConfig) -> Result<()> {
    let presets: Vec<_> = config
        .intersections
        .iter()
        .take(args.nodes.unwrap_or(usize::MAX))
        .cloned()
        .collect();

    tracing::info!("Starting signal-grid traffic network");
    tracing::info!("  Intersections: {}", presets.len());
    tracing::info!(
        "  Broker latency: {}ms (+{}ms jitter)",
        config.broker_latency_ms,
        config.broker_jitter_ms
    );
    tracing::info!("  Initial timing: {}", config.initial_timing);
    tracing::info!("  Time unit: {}ms per timing second", config.time_unit_ms);
    if let Some(secs) = args.duration_secs {
        tracing::info!("  Run time: {}s", secs);
    }

    let network = TrafficNetwork::new(config.network_config());
    network.start_network();

    for preset in &presets {
        let node = network.add_node(&preset.name, &preset.intersection).await?;
        tracing::info!("  {} -> {} ({})", node.id(), preset.name, preset.intersection);
    }

    tracing::info!("Network running. Press Ctrl+C to stop.");

    let started = Instant::now();
    let deadline = sleep_or_never(args.duration_secs);
    let rush_hour = sleep_or_never(args.rush_hour_after_secs);
    tokio::pin!(deadline, rush_hour);
    let mut rush_hour_pending = args.rush_hour_after_secs.is_some();

    let period = Duration::from_secs(args.snapshot_every_secs.max(1));
    let mut snapshots = tokio::time::interval_at(Instant::now() + period, period);
    snapshots.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                tracing::info!("Run time elapsed");
                break;
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Shutting down...");
                break;
            }
            _ = &mut rush_hour, if rush_hour_pending => {
                rush_hour_pending = false;
                network.set_rush_hour(true);
            }
            _ = snapshots.tick(), if args.snapshot_every_secs > 0 => {
                report(&network.snapshot(), args.verbose)?;
            }
        }
    }

    network.stop_network().await;

    let summary = network.snapshot();
    tracing::info!(
        "Network stopped after {:.1}s: {} messages sent",
        started.elapsed().as_secs_f64(),
        summary.total_messages
    );
    Ok(())
}

async fn sleep_or_never(secs: Option<u64>) {
    match secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}

fn report(snapshot: &NetworkSnapshot, verbose: bool) -> Result<()> {
    if verbose {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
        return Ok(());
    }

    tracing::info!(
        "{} nodes ({} online), {} messages, rush hour {}",
        snapshot.nodes.len(),
        snapshot.online_nodes(),
        snapshot.total_messages,
        if snapshot.rush_hour_active { "on" } else { "off" }
    );
    for node in &snapshot.nodes {
        let congestion = node
            .last_metrics
            .as_ref()
            .map(|m| format!("{} ({} vehicles)", m.congestion, m.vehicle_count))
            .unwrap_or_else(|| "no data".to_string());
        tracing::info!(
            "  {:<8} {:<16} {:<11} {:<6} {} {}",
            node.id.as_str(),
            node.name,
            node.status.to_string(),
            node.light_state.to_string(),
            node.timing,
            congestion
        );
    }
    Ok(())
}
