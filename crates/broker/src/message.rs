//! Message envelope and typed payloads exchanged between actors

use crate::traffic::{CameraMetrics, LightState, NodeStatus, TrafficTiming};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Address of the registry actor
pub const REGISTRY_ID: &str = "registry";
/// Address of the coordinator actor
pub const COORDINATOR_ID: &str = "coordinator";

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Name under which an actor is reachable through the broker
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn registry() -> Self {
        Self::new(REGISTRY_ID)
    }

    pub fn coordinator() -> Self {
        Self::new(COORDINATOR_ID)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Process-unique message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(u64);

impl MessageId {
    /// Mint the next identifier
    pub fn next() -> Self {
        Self(NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

/// Closed set of message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Register,
    Unregister,
    Heartbeat,
    MetricsReport,
    TimingAdjustment,
    DiscoveryRequest,
    DiscoveryResponse,
    Ack,
    Nack,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::Register => "register",
            MessageType::Unregister => "unregister",
            MessageType::Heartbeat => "heartbeat",
            MessageType::MetricsReport => "metrics_report",
            MessageType::TimingAdjustment => "timing_adjustment",
            MessageType::DiscoveryRequest => "discovery_request",
            MessageType::DiscoveryResponse => "discovery_response",
            MessageType::Ack => "ack",
            MessageType::Nack => "nack",
        };
        f.write_str(s)
    }
}

/// Registration details announced by an edge node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub name: String,
    pub intersection: String,
}

/// Liveness ping, with the light state at send time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub light_state: LightState,
}

/// Locally sensed conditions plus the node's current configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub metrics: CameraMetrics,
    pub timing: TrafficTiming,
    pub light_state: LightState,
}

/// New timing pushed by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingAdjustment {
    pub timing: TrafficTiming,
    /// Human-readable justification
    pub reason: String,
}

/// Public view of a registry record, without timestamps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: ActorId,
    pub name: String,
    pub intersection: String,
    pub status: NodeStatus,
}

/// Payload of a message, keyed by message type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Payload {
    Register(NodeRegistration),
    Unregister,
    Heartbeat(Heartbeat),
    MetricsReport(MetricsReport),
    TimingAdjustment(TimingAdjustment),
    DiscoveryRequest,
    DiscoveryResponse(Vec<NodeSummary>),
    Ack(String),
    Nack(String),
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Register(_) => MessageType::Register,
            Payload::Unregister => MessageType::Unregister,
            Payload::Heartbeat(_) => MessageType::Heartbeat,
            Payload::MetricsReport(_) => MessageType::MetricsReport,
            Payload::TimingAdjustment(_) => MessageType::TimingAdjustment,
            Payload::DiscoveryRequest => MessageType::DiscoveryRequest,
            Payload::DiscoveryResponse(_) => MessageType::DiscoveryResponse,
            Payload::Ack(_) => MessageType::Ack,
            Payload::Nack(_) => MessageType::Nack,
        }
    }
}

/// Immutable message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: ActorId,
    pub receiver: ActorId,
    pub timestamp: DateTime<Utc>,
    pub payload: Payload,
}

impl Message {
    /// Create a message with a fresh id and the current time
    pub fn new(sender: ActorId, receiver: ActorId, payload: Payload) -> Self {
        Self {
            id: MessageId::next(),
            sender,
            receiver,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Type of this message, derived from its payload
    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    /// Copy of this message addressed to another receiver, under a fresh id
    pub fn with_receiver(&self, receiver: ActorId) -> Self {
        Self {
            id: MessageId::next(),
            sender: self.sender.clone(),
            receiver,
            timestamp: self.timestamp,
            payload: self.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ids_are_unique() {
        let a = Message::new("a".into(), "b".into(), Payload::Unregister);
        let b = Message::new("a".into(), "b".into(), Payload::Unregister);
        assert_ne!(a.id, b.id);
        assert!(b.id > a.id);
    }

    #[test]
    fn test_type_follows_payload() {
        let msg = Message::new(
            "node-1".into(),
            ActorId::registry(),
            Payload::Heartbeat(Heartbeat {
                light_state: LightState::Red,
            }),
        );
        assert_eq!(msg.message_type(), MessageType::Heartbeat);

        let ack = Message::new(ActorId::registry(), "node-1".into(), Payload::Ack("ok".into()));
        assert_eq!(ack.message_type(), MessageType::Ack);
    }

    #[test]
    fn test_with_receiver_readdresses() {
        let msg = Message::new("node-1".into(), "x".into(), Payload::DiscoveryRequest);
        let copy = msg.with_receiver("y".into());
        assert_eq!(copy.receiver.as_str(), "y");
        assert_eq!(copy.sender, msg.sender);
        assert_eq!(copy.payload, msg.payload);
        assert_ne!(copy.id, msg.id);
    }

    #[test]
    fn test_payload_json_is_tagged() {
        let payload = Payload::Nack("unknown node".into());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "nack");
        assert_eq!(json["body"], "unknown node");
    }
}
