//! Grid Broker - the simulated network underneath signal-grid
//!
//! - Typed message envelope and payloads exchanged by actors
//! - Traffic value types (timing, light state, camera metrics)
//! - Name-addressed broker with latency, drop-if-unknown and a bounded event log
//! - Synchronous observer sets with unsubscribe handles

pub mod broker;
pub mod event_log;
pub mod message;
pub mod observers;
pub mod traffic;

pub use broker::{Broker, BrokerConfig, MessageHandler, BROKER_SOURCE};
pub use event_log::{EventLog, LogEntry, LogLevel, DEFAULT_LOG_CAPACITY};
pub use message::{
    ActorId, Heartbeat, Message, MessageId, MessageType, MetricsReport, NodeRegistration,
    NodeSummary, Payload, TimingAdjustment, COORDINATOR_ID, REGISTRY_ID,
};
pub use observers::{ListenerHandle, Observers};
pub use traffic::{
    CameraMetrics, CongestionLevel, LightState, NodeStatus, TimingError, TrafficTiming,
};
