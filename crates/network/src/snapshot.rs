//! Point-in-time views of the network for presentation layers

use chrono::{DateTime, Utc};
use grid_actors::EdgeNode;
use grid_broker::{ActorId, CameraMetrics, LightState, LogEntry, NodeStatus, TrafficTiming};
use serde::Serialize;

/// One node as seen from outside
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    pub id: ActorId,
    pub name: String,
    pub intersection: String,
    /// Registry status, or `Registering` while the registry has no record
    pub status: NodeStatus,
    pub light_state: LightState,
    pub timing: TrafficTiming,
    pub last_metrics: Option<CameraMetrics>,
    pub rush_hour: bool,
}

impl NodeView {
    pub(crate) fn of(node: &EdgeNode, status: Option<NodeStatus>) -> Self {
        Self {
            id: node.id().clone(),
            name: node.name().to_string(),
            intersection: node.intersection().to_string(),
            status: status.unwrap_or(NodeStatus::Registering),
            light_state: node.light_state(),
            timing: node.timing(),
            last_metrics: node.last_metrics(),
            rush_hour: node.rush_hour(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSnapshot {
    pub registry_online: bool,
    pub coordinator_online: bool,
    /// Live nodes in the order they were added
    pub nodes: Vec<NodeView>,
    pub total_messages: u64,
    /// Most recent log entries, oldest first
    pub recent_logs: Vec<LogEntry>,
    pub running: bool,
    pub rush_hour_active: bool,
    pub captured_at: DateTime<Utc>,
}

impl NetworkSnapshot {
    pub fn online_nodes(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Online)
            .count()
    }

    pub fn node(&self, id: &ActorId) -> Option<&NodeView> {
        self.nodes.iter().find(|n| &n.id == id)
    }
}
