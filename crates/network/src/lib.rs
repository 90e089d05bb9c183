//! Grid Network - orchestrator for a simulated traffic-control network
//!
//! Starts and stops the broker, registry and coordinator, manages edge-node
//! membership, and publishes snapshots to presentation layers.

pub mod error;
pub mod orchestrator;
pub mod snapshot;


pub use error::NetworkError;
pub use orchestrator::{NetworkConfig, TrafficNetwork, DEFAULT_SNAPSHOT_LOGS, NETWORK_SOURCE};
pub use snapshot::{NetworkSnapshot, NodeView};
