//! Traffic value types carried inside message payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default green phase in seconds
pub const DEFAULT_GREEN_SECS: u32 = 30;
/// Default yellow phase in seconds
pub const DEFAULT_YELLOW_SECS: u32 = 5;
/// Default red phase in seconds
pub const DEFAULT_RED_SECS: u32 = 30;

/// Congestion score thresholds (score = 0.6 * vehicles + 0.4 * wait)
pub const MEDIUM_SCORE: f64 = 20.0;
pub const HIGH_SCORE: f64 = 40.0;
pub const CRITICAL_SCORE: f64 = 60.0;

/// State of a single traffic light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LightState {
    Green,
    Yellow,
    Red,
}

impl LightState {
    /// Next state in the GREEN -> YELLOW -> RED -> GREEN cycle
    pub fn next(self) -> Self {
        match self {
            LightState::Green => LightState::Yellow,
            LightState::Yellow => LightState::Red,
            LightState::Red => LightState::Green,
        }
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LightState::Green => "GREEN",
            LightState::Yellow => "YELLOW",
            LightState::Red => "RED",
        };
        f.write_str(s)
    }
}

/// Ordered classification of traffic density
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CongestionLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl CongestionLevel {
    /// Classify a weighted congestion score. Boundary values go to the higher band.
    pub fn from_score(score: f64) -> Self {
        if score < MEDIUM_SCORE {
            CongestionLevel::Low
        } else if score < HIGH_SCORE {
            CongestionLevel::Medium
        } else if score < CRITICAL_SCORE {
            CongestionLevel::High
        } else {
            CongestionLevel::Critical
        }
    }

    /// Weighted score used by the edge sensor
    pub fn score(vehicle_count: u32, avg_wait_secs: f64) -> f64 {
        0.6 * f64::from(vehicle_count) + 0.4 * avg_wait_secs
    }

    /// Numeric rank, LOW = 1 through CRITICAL = 4
    pub fn rank(self) -> u8 {
        match self {
            CongestionLevel::Low => 1,
            CongestionLevel::Medium => 2,
            CongestionLevel::High => 3,
            CongestionLevel::Critical => 4,
        }
    }

    /// Round a mean rank back to the nearest label using midpoint thresholds
    pub fn from_mean_rank(mean: f64) -> Self {
        if mean < 1.5 {
            CongestionLevel::Low
        } else if mean < 2.5 {
            CongestionLevel::Medium
        } else if mean < 3.5 {
            CongestionLevel::High
        } else {
            CongestionLevel::Critical
        }
    }
}

impl fmt::Display for CongestionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CongestionLevel::Low => "LOW",
            CongestionLevel::Medium => "MEDIUM",
            CongestionLevel::High => "HIGH",
            CongestionLevel::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// A single camera capture at an intersection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraMetrics {
    /// Vehicles currently observed
    pub vehicle_count: u32,
    /// Average wait in seconds
    pub avg_wait_secs: f64,
    /// Derived congestion classification
    pub congestion: CongestionLevel,
    /// Vehicles queued at the stop line, never more than `vehicle_count`
    pub queue_length: u32,
    /// Capture time
    pub captured_at: DateTime<Utc>,
}

impl CameraMetrics {
    /// Build a capture, classifying congestion and bounding the queue.
    pub fn new(vehicle_count: u32, avg_wait_secs: f64, queue_length: u32) -> Self {
        let avg_wait_secs = avg_wait_secs.max(0.0);
        Self {
            vehicle_count,
            avg_wait_secs,
            congestion: CongestionLevel::from_score(CongestionLevel::score(
                vehicle_count,
                avg_wait_secs,
            )),
            queue_length: queue_length.min(vehicle_count),
            captured_at: Utc::now(),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingError {
    #[error("{0} phase must be positive")]
    NonPositivePhase(LightState),
}

/// Green/yellow/red durations in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrafficTiming {
    pub green_secs: u32,
    pub yellow_secs: u32,
    pub red_secs: u32,
}

impl TrafficTiming {
    /// Create a timing, rejecting zero-length phases
    pub fn new(green_secs: u32, yellow_secs: u32, red_secs: u32) -> Result<Self, TimingError> {
        let timing = Self {
            green_secs,
            yellow_secs,
            red_secs,
        };
        timing.validate()?;
        Ok(timing)
    }

    /// Check every phase is positive
    pub fn validate(&self) -> Result<(), TimingError> {
        for state in [LightState::Green, LightState::Yellow, LightState::Red] {
            if self.secs_for(state) == 0 {
                return Err(TimingError::NonPositivePhase(state));
            }
        }
        Ok(())
    }

    /// Duration of the given phase in seconds
    pub fn secs_for(&self, state: LightState) -> u32 {
        match state {
            LightState::Green => self.green_secs,
            LightState::Yellow => self.yellow_secs,
            LightState::Red => self.red_secs,
        }
    }

    /// Full cycle length in seconds
    pub fn cycle_secs(&self) -> u32 {
        self.green_secs + self.yellow_secs + self.red_secs
    }
}

impl Default for TrafficTiming {
    fn default() -> Self {
        Self {
            green_secs: DEFAULT_GREEN_SECS,
            yellow_secs: DEFAULT_YELLOW_SECS,
            red_secs: DEFAULT_RED_SECS,
        }
    }
}

impl fmt::Display for TrafficTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "G{}s/Y{}s/R{}s",
            self.green_secs, self.yellow_secs, self.red_secs
        )
    }
}

/// Membership status tracked by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Registering,
    Online,
    Offline,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Registering => "REGISTERING",
            NodeStatus::Online => "ONLINE",
            NodeStatus::Offline => "OFFLINE",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_cycle() {
        let mut state = LightState::Green;
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(state);
            state = state.next();
        }
        assert_eq!(
            seen,
            vec![
                LightState::Green,
                LightState::Yellow,
                LightState::Red,
                LightState::Green,
                LightState::Yellow,
                LightState::Red,
            ]
        );
    }

    #[test]
    fn test_congestion_bands() {
        assert_eq!(CongestionLevel::from_score(0.0), CongestionLevel::Low);
        assert_eq!(CongestionLevel::from_score(19.99), CongestionLevel::Low);
        assert_eq!(CongestionLevel::from_score(39.9), CongestionLevel::Medium);
        assert_eq!(CongestionLevel::from_score(59.9), CongestionLevel::High);
        assert_eq!(CongestionLevel::from_score(250.0), CongestionLevel::Critical);
    }

    #[test]
    fn test_congestion_boundaries_resolve_upward() {
        assert_eq!(CongestionLevel::from_score(20.0), CongestionLevel::Medium);
        assert_eq!(CongestionLevel::from_score(40.0), CongestionLevel::High);
        assert_eq!(CongestionLevel::from_score(60.0), CongestionLevel::Critical);
    }

    #[test]
    fn test_congestion_ordering() {
        assert!(CongestionLevel::Low < CongestionLevel::Medium);
        assert!(CongestionLevel::Medium < CongestionLevel::High);
        assert!(CongestionLevel::High < CongestionLevel::Critical);
    }

    #[test]
    fn test_mean_rank_midpoints() {
        assert_eq!(CongestionLevel::from_mean_rank(1.49), CongestionLevel::Low);
        assert_eq!(CongestionLevel::from_mean_rank(1.5), CongestionLevel::Medium);
        assert_eq!(CongestionLevel::from_mean_rank(2.5), CongestionLevel::High);
        assert_eq!(CongestionLevel::from_mean_rank(3.5), CongestionLevel::Critical);
    }

    #[test]
    fn test_metrics_classification_and_queue_bound() {
        // 0.6 * 50 + 0.4 * 70 = 58
        let metrics = CameraMetrics::new(50, 70.0, 80);
        assert_eq!(metrics.congestion, CongestionLevel::High);
        assert_eq!(metrics.queue_length, 50);
    }

    #[test]
    fn test_timing_rejects_zero_phase() {
        assert_eq!(
            TrafficTiming::new(30, 0, 30),
            Err(TimingError::NonPositivePhase(LightState::Yellow))
        );
        let timing = TrafficTiming::new(20, 4, 25).unwrap();
        assert_eq!(timing.cycle_secs(), 49);
        assert_eq!(timing.secs_for(LightState::Red), 25);
    }
}
