//! Timing policy - turns one node's metrics into a candidate timing
//!
//! The candidate depends only on the reported metrics and the node's
//! recorded timing, never on other nodes.

use grid_broker::{CameraMetrics, CongestionLevel, TrafficTiming};

/// Shortest green or red phase the policy will propose
pub const MIN_PHASE_SECS: u32 = 15;
/// Longest green or red phase the policy will propose
pub const MAX_PHASE_SECS: u32 = 60;
/// A change must exceed this on green or red to be dispatched
pub const SIGNIFICANCE_THRESHOLD_SECS: u32 = 3;

/// Average wait above which green is extended
pub const LONG_WAIT_SECS: f64 = 60.0;
/// Average wait below which green is shortened
pub const SHORT_WAIT_SECS: f64 = 15.0;
pub const WAIT_CORRECTION_SECS: i64 = 5;

/// Green/red deltas in seconds for a congestion level
pub fn congestion_adjustment(level: CongestionLevel) -> (i64, i64) {
    match level {
        CongestionLevel::Critical => (15, -10),
        CongestionLevel::High => (10, -5),
        CongestionLevel::Medium => (5, 0),
        CongestionLevel::Low => (-5, 5),
    }
}

/// Green delta in seconds for an average wait
pub fn wait_correction(avg_wait_secs: f64) -> i64 {
    if avg_wait_secs > LONG_WAIT_SECS {
        WAIT_CORRECTION_SECS
    } else if avg_wait_secs < SHORT_WAIT_SECS {
        -WAIT_CORRECTION_SECS
    } else {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingPolicy {
    pub min_phase_secs: u32,
    pub max_phase_secs: u32,
    pub significance_threshold_secs: u32,
}

impl TimingPolicy {
    /// Candidate timing for `metrics`, starting from `current`.
    /// Green and red are clamped; yellow is carried over unchanged.
    pub fn propose(&self, metrics: &CameraMetrics, current: &TrafficTiming) -> TrafficTiming {
        let (green_delta, red_delta) = congestion_adjustment(metrics.congestion);
        let green_delta = green_delta + wait_correction(metrics.avg_wait_secs);

        TrafficTiming {
            green_secs: self.clamp(i64::from(current.green_secs) + green_delta),
            yellow_secs: current.yellow_secs,
            red_secs: self.clamp(i64::from(current.red_secs) + red_delta),
        }
    }

    /// Whether `candidate` differs enough from `current` to be worth sending
    pub fn is_significant(&self, current: &TrafficTiming, candidate: &TrafficTiming) -> bool {
        current.green_secs.abs_diff(candidate.green_secs) > self.significance_threshold_secs
            || current.red_secs.abs_diff(candidate.red_secs) > self.significance_threshold_secs
    }

    fn clamp(&self, secs: i64) -> u32 {
        secs.clamp(i64::from(self.min_phase_secs), i64::from(self.max_phase_secs)) as u32
    }
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            min_phase_secs: MIN_PHASE_SECS,
            max_phase_secs: MAX_PHASE_SECS,
            significance_threshold_secs: SIGNIFICANCE_THRESHOLD_SECS,
        }
    }
}
