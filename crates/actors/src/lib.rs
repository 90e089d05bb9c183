//! Grid Actors - the participants of the traffic network
//!
//! - Registry: membership and heartbeat liveness
//! - Coordinator: per-node timing optimization with hysteresis
//! - Edge nodes: autonomous lights with a local sensor

pub mod coordinator;
pub mod edge_node;
pub mod policy;
pub mod registry;
pub mod sensor;

pub use coordinator::{Coordinator, CoordinatorConfig, GlobalSummary, NodeCoordinationState};
pub use edge_node::{EdgeNode, EdgeNodeConfig, StateTransition};
pub use policy::TimingPolicy;
pub use registry::{NodeRecord, Registry, RegistryConfig};
pub use sensor::{SensorConfig, SimulatedCamera, TrafficSensor};
