//! Simulator Configuration

use anyhow::{ensure, Context, Result};
use grid_actors::{CoordinatorConfig, EdgeNodeConfig, RegistryConfig, SensorConfig, TimingPolicy};
use grid_broker::{BrokerConfig, TrafficTiming};
use grid_network::{NetworkConfig, DEFAULT_SNAPSHOT_LOGS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound on wall milliseconds per timing second
const MAX_TIME_UNIT_MS: u64 = 60_000;
/// Upper bound on any single light phase
const MAX_PHASE_SECS: u32 = 3_600;

/// A named intersection the driver places a node at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntersectionPreset {
    pub name: String,
    pub intersection: String,
}

impl IntersectionPreset {
    fn new(name: &str, intersection: &str) -> Self {
        Self {
            name: name.to_string(),
            intersection: intersection.to_string(),
        }
    }
}

/// Simulator configuration, loaded from JSON. Missing fields take defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Fixed broker latency in milliseconds
    pub broker_latency_ms: u64,
    /// Upper bound of the random latency jitter in milliseconds
    pub broker_jitter_ms: u64,
    /// Entries retained in the event log
    pub log_capacity: usize,
    /// Log entries carried by each snapshot
    pub snapshot_log_limit: usize,
    pub heartbeat_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub global_pass_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub metrics_interval_secs: u64,
    /// Wall milliseconds per timing second; lower values speed the lights up
    pub time_unit_ms: u64,
    pub initial_timing: TrafficTiming,
    pub base_load: f64,
    pub rush_hour_multiplier: f64,
    pub variability: f64,
    /// Seed for the simulated cameras; random per run when absent
    pub seed: Option<u64>,
    pub intersections: Vec<IntersectionPreset>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            broker_latency_ms: 10,
            broker_jitter_ms: 5,
            log_capacity: 200,
            snapshot_log_limit: DEFAULT_SNAPSHOT_LOGS,
            heartbeat_timeout_secs: 15,
            sweep_interval_secs: 5,
            global_pass_interval_secs: 10,
            heartbeat_interval_secs: 5,
            metrics_interval_secs: 10,
            time_unit_ms: 1000,
            initial_timing: TrafficTiming::default(),
            base_load: 20.0,
            rush_hour_multiplier: 2.0,
            variability: 0.3,
            seed: None,
            intersections: vec![
                IntersectionPreset::new("Main & 1st", "Main St & 1st Ave"),
                IntersectionPreset::new("Oak & 5th", "Oak St & 5th Ave"),
                IntersectionPreset::new("Elm & Broadway", "Elm St & Broadway"),
                IntersectionPreset::new("Harbor & 9th", "Harbor Blvd & 9th St"),
            ],
        }
    }
}

impl SimulatorConfig {
    /// Read and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1..=MAX_TIME_UNIT_MS).contains(&self.time_unit_ms),
            "time_unit_ms must be between 1 and {}",
            MAX_TIME_UNIT_MS
        );
        ensure!(
            self.heartbeat_interval_secs > 0
                && self.metrics_interval_secs > 0
                && self.sweep_interval_secs > 0
                && self.global_pass_interval_secs > 0,
            "periodic intervals must be positive"
        );
        self.initial_timing
            .validate()
            .context("Invalid initial_timing")?;
        let TrafficTiming {
            green_secs,
            yellow_secs,
            red_secs,
        } = self.initial_timing;
        ensure!(
            green_secs.max(yellow_secs).max(red_secs) <= MAX_PHASE_SECS,
            "initial_timing phases must not exceed {}s",
            MAX_PHASE_SECS
        );
        Ok(())
    }

    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            broker: BrokerConfig {
                base_latency: Duration::from_millis(self.broker_latency_ms),
                jitter: Duration::from_millis(self.broker_jitter_ms),
                log_capacity: self.log_capacity,
            },
            registry: RegistryConfig {
                heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
                sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            },
            coordinator: CoordinatorConfig {
                global_pass_interval: Duration::from_secs(self.global_pass_interval_secs),
                policy: TimingPolicy::default(),
            },
            node: EdgeNodeConfig {
                heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
                metrics_interval: Duration::from_secs(self.metrics_interval_secs),
                time_unit: Duration::from_millis(self.time_unit_ms),
                initial_timing: self.initial_timing,
                sensor: SensorConfig {
                    base_load: self.base_load,
                    rush_hour_multiplier: self.rush_hour_multiplier,
                    variability: self.variability,
                    seed: self.seed,
                },
                ..Default::default()
            },
            snapshot_log_limit: self.snapshot_log_limit,
        }
    }
}
