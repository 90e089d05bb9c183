//! Local sensor model for edge nodes

use grid_broker::CameraMetrics;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Wait seconds contributed by each observed vehicle
const WAIT_SECS_PER_VEHICLE: f64 = 1.2;
/// Upper bound of the random wait noise in seconds
const WAIT_NOISE_SECS: f64 = 10.0;

/// Produces a fresh capture on each call
pub trait TrafficSensor: Send {
    fn capture(&mut self, rush_hour: bool) -> CameraMetrics;
}

/// Simulated camera configuration
#[derive(Clone, Debug)]
pub struct SensorConfig {
    /// Typical vehicle count outside rush hour
    pub base_load: f64,
    /// Load multiplier while rush hour is active
    pub rush_hour_multiplier: f64,
    /// Relative spread of the random variability factor, in [0, 1]
    pub variability: f64,
    /// Fixed RNG seed for reproducible runs; entropy when unset
    pub seed: Option<u64>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            base_load: 20.0,
            rush_hour_multiplier: 2.0,
            variability: 0.3,
            seed: None,
        }
    }
}

/// Camera that synthesizes plausible traffic around a base load
pub struct SimulatedCamera {
    config: SensorConfig,
    rng: StdRng,
}

impl SimulatedCamera {
    pub fn new(config: SensorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { config, rng }
    }
}

impl TrafficSensor for SimulatedCamera {
    fn capture(&mut self, rush_hour: bool) -> CameraMetrics {
        let multiplier = if rush_hour {
            self.config.rush_hour_multiplier
        } else {
            1.0
        };
        let spread = self.config.variability.clamp(0.0, 1.0);
        let factor = self.rng.gen_range((1.0 - spread)..=(1.0 + spread));

        let vehicles = (self.config.base_load * multiplier * factor).round().max(0.0) as u32;
        let wait = f64::from(vehicles) * WAIT_SECS_PER_VEHICLE
            + self.rng.gen_range(0.0..WAIT_NOISE_SECS);
        let queue = (f64::from(vehicles) * self.rng.gen_range(0.3..0.8)).round() as u32;

        CameraMetrics::new(vehicles, wait, queue)
    }
}
