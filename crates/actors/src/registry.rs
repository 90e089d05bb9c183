//! Registry - membership and liveness authority
//!
//! Node lifecycle:
//! - Register  -> ONLINE (record created or overwritten, sender acked)
//! - sweep     -> OFFLINE once the last heartbeat is older than the timeout
//! - Heartbeat -> ONLINE again, no re-registration needed
//! - Unregister -> record removed

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grid_broker::{
    ActorId, Broker, LogLevel, Message, MessageHandler, NodeRegistration, NodeStatus,
    NodeSummary, Payload, REGISTRY_ID,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Heartbeat age after which a node is considered offline
    pub heartbeat_timeout: Duration,
    /// How often the liveness sweep runs
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(15),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// Registry's view of one node
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub id: ActorId,
    pub name: String,
    pub intersection: String,
    pub status: NodeStatus,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: Instant,
}

impl NodeRecord {
    pub fn summary(&self) -> NodeSummary {
        NodeSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            intersection: self.intersection.clone(),
            status: self.status,
        }
    }
}

/// Membership and liveness tracker. Sole writer of node records.
pub struct Registry {
    id: ActorId,
    broker: Broker,
    nodes: RwLock<HashMap<ActorId, NodeRecord>>,
    running: AtomicBool,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
    config: RegistryConfig,
}

impl Registry {
    pub fn new(broker: Broker, config: RegistryConfig) -> Arc<Self> {
        Arc::new(Self {
            id: ActorId::registry(),
            broker,
            nodes: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            sweep_task: Mutex::new(None),
            config,
        })
    }

    pub fn id(&self) -> &ActorId {
        &self.id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Subscribe to the broker and start the liveness sweep
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            self.log(LogLevel::Warn, "Registry already running", None);
            return;
        }

        self.broker
            .subscribe(self.id.clone(), self.clone() as Arc<dyn MessageHandler>);

        let task = tokio::spawn(sweep_loop(Arc::downgrade(self), self.config.sweep_interval));
        *self.sweep_task.lock() = Some(task);

        self.log(
            LogLevel::Info,
            format!(
                "Registry online (timeout {:?}, sweep every {:?})",
                self.config.heartbeat_timeout, self.config.sweep_interval
            ),
            None,
        );
    }

    /// Stop sweeping and leave the broker
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            self.log(LogLevel::Warn, "Registry already stopped", None);
            return;
        }

        if let Some(task) = self.sweep_task.lock().take() {
            task.abort();
        }
        self.broker.unsubscribe(&self.id);
        self.log(LogLevel::Info, "Registry stopped", None);
    }

    /// Run one liveness sweep against the current time
    pub fn sweep(&self) -> Vec<ActorId> {
        self.sweep_at(Instant::now())
    }

    /// Mark every ONLINE node whose heartbeat is older than the timeout as
    /// OFFLINE. Returns the nodes that changed.
    pub fn sweep_at(&self, now: Instant) -> Vec<ActorId> {
        let expired: Vec<(ActorId, Duration)> = {
            let mut nodes = self.nodes.write();
            nodes
                .values_mut()
                .filter_map(|record| {
                    let age = now.saturating_duration_since(record.last_heartbeat);
                    if record.status == NodeStatus::Online && age > self.config.heartbeat_timeout {
                        record.status = NodeStatus::Offline;
                        Some((record.id.clone(), age))
                    } else {
                        None
                    }
                })
                .collect()
        };

        for (id, age) in &expired {
            self.log(
                LogLevel::Warn,
                format!("Node {} went OFFLINE (no heartbeat for {:.1}s)", id, age.as_secs_f64()),
                Some(serde_json::json!({ "node": id, "status": NodeStatus::Offline })),
            );
        }

        expired.into_iter().map(|(id, _)| id).collect()
    }

    /// Copy of a single record
    pub fn node(&self, id: &ActorId) -> Option<NodeRecord> {
        self.nodes.read().get(id).cloned()
    }

    /// Membership snapshot, ordered by id
    pub fn nodes(&self) -> Vec<NodeSummary> {
        let mut summaries: Vec<NodeSummary> =
            self.nodes.read().values().map(NodeRecord::summary).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub fn online_count(&self) -> usize {
        self.nodes
            .read()
            .values()
            .filter(|record| record.status == NodeStatus::Online)
            .count()
    }

    fn register(&self, sender: &ActorId, registration: NodeRegistration) {
        let record = NodeRecord {
            id: sender.clone(),
            name: registration.name,
            intersection: registration.intersection,
            status: NodeStatus::Online,
            registered_at: Utc::now(),
            last_heartbeat: Instant::now(),
        };
        let summary = record.summary();
        let previous = self.nodes.write().insert(sender.clone(), record);

        let verb = if previous.is_some() { "Re-registered" } else { "Registered" };
        self.log(
            LogLevel::Info,
            format!("{} node {} ({} @ {})", verb, sender, summary.name, summary.intersection),
            serde_json::to_value(&summary).ok(),
        );
    }

    /// Returns `false` if the sender is unknown
    fn heartbeat(&self, sender: &ActorId) -> bool {
        let recovered = {
            let mut nodes = self.nodes.write();
            let Some(record) = nodes.get_mut(sender) else {
                return false;
            };
            record.last_heartbeat = Instant::now();
            if record.status == NodeStatus::Offline {
                record.status = NodeStatus::Online;
                true
            } else {
                false
            }
        };

        if recovered {
            self.log(
                LogLevel::Info,
                format!("Node {} is back ONLINE", sender),
                Some(serde_json::json!({ "node": sender, "status": NodeStatus::Online })),
            );
        }
        true
    }

    fn unregister(&self, sender: &ActorId) {
        if self.nodes.write().remove(sender).is_some() {
            self.log(LogLevel::Info, format!("Unregistered node {}", sender), None);
        } else {
            tracing::debug!("Unregister from unknown node {}", sender);
        }
    }

    async fn reply(&self, to: &ActorId, payload: Payload) -> bool {
        self.broker
            .send(Message::new(self.id.clone(), to.clone(), payload))
            .await
    }

    fn log(&self, level: LogLevel, message: impl Into<String>, data: Option<serde_json::Value>) {
        self.broker.log(level, REGISTRY_ID, message, data);
    }
}

#[async_trait]
impl MessageHandler for Registry {
    async fn handle(&self, message: Message) -> anyhow::Result<()> {
        let sender = message.sender;
        match message.payload {
            Payload::Register(registration) => {
                let name = registration.name.clone();
                self.register(&sender, registration);
                self.reply(&sender, Payload::Ack(format!("registered {}", name)))
                    .await;
            }
            Payload::Heartbeat(_) => {
                if !self.heartbeat(&sender) {
                    tracing::debug!("Heartbeat from unknown node {}", sender);
                    self.reply(&sender, Payload::Nack("unknown node".to_string()))
                        .await;
                }
            }
            Payload::Unregister => self.unregister(&sender),
            Payload::DiscoveryRequest => {
                let nodes = self.nodes();
                tracing::debug!("Discovery request from {}: {} nodes", sender, nodes.len());
                self.reply(&sender, Payload::DiscoveryResponse(nodes)).await;
            }
            other => {
                tracing::debug!("Registry ignoring {} from {}", other.message_type(), sender);
            }
        }
        Ok(())
    }
}

async fn sweep_loop(registry: Weak<Registry>, period: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let Some(registry) = registry.upgrade() else {
            break;
        };
        if !registry.is_running() {
            break;
        }
        registry.sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_broker::{BrokerConfig, Heartbeat, LightState};
    use tokio::sync::mpsc;

    struct Recorder {
        tx: mpsc::UnboundedSender<Message>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, message: Message) -> anyhow::Result<()> {
            let _ = self.tx.send(message);
            Ok(())
        }
    }

    fn setup() -> (Broker, Arc<Registry>, mpsc::UnboundedReceiver<Message>) {
        let broker = Broker::new(BrokerConfig {
            base_latency: Duration::from_millis(5),
            jitter: Duration::ZERO,
            ..Default::default()
        });
        let registry = Registry::new(broker.clone(), RegistryConfig::default());
        registry.start();

        let (tx, rx) = mpsc::unbounded_channel();
        broker.subscribe("node-1".into(), Arc::new(Recorder { tx }));
        (broker, registry, rx)
    }

    fn from_node(payload: Payload) -> Message {
        Message::new("node-1".into(), ActorId::registry(), payload)
    }

    fn registration() -> Payload {
        Payload::Register(NodeRegistration {
            name: "N1".into(),
            intersection: "Main&1st".into(),
        })
    }

    fn heartbeat() -> Payload {
        Payload::Heartbeat(Heartbeat {
            light_state: LightState::Green,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_acks_and_discovery_round_trip() {
        let (broker, registry, mut rx) = setup();

        broker.send(from_node(registration())).await;
        let ack = rx.recv().await.unwrap();
        assert_eq!(ack.payload, Payload::Ack("registered N1".into()));
        assert_eq!(ack.sender, ActorId::registry());

        broker.send(from_node(Payload::DiscoveryRequest)).await;
        let response = rx.recv().await.unwrap();
        let nodes = match response.payload {
            Payload::DiscoveryResponse(nodes) => nodes,
            other => panic!("expected discovery response, got {:?}", other),
        };
        assert_eq!(
            nodes,
            vec![NodeSummary {
                id: "node-1".into(),
                name: "N1".into(),
                intersection: "Main&1st".into(),
                status: NodeStatus::Online,
            }]
        );
        assert_eq!(registry.online_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_then_heartbeat_recovers() {
        let (broker, registry, mut rx) = setup();
        broker.send(from_node(registration())).await;
        rx.recv().await.unwrap();

        let id: ActorId = "node-1".into();
        let last = registry.node(&id).unwrap().last_heartbeat;

        // Exactly at the timeout is still online
        assert!(registry.sweep_at(last + Duration::from_secs(15)).is_empty());

        let expired = registry.sweep_at(last + Duration::from_secs(16));
        assert_eq!(expired, vec![id.clone()]);
        assert_eq!(registry.node(&id).unwrap().status, NodeStatus::Offline);

        // Idempotent: a second sweep changes nothing
        assert!(registry.sweep_at(last + Duration::from_secs(30)).is_empty());
        assert_eq!(registry.node(&id).unwrap().status, NodeStatus::Offline);

        broker.send(from_node(heartbeat())).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(registry.node(&id).unwrap().status, NodeStatus::Online);
        assert!(broker
            .recent_logs(20)
            .iter()
            .any(|e| e.message.contains("back ONLINE")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweep_marks_offline() {
        let (broker, registry, mut rx) = setup();
        broker.send(from_node(registration())).await;
        rx.recv().await.unwrap();

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(
            registry.node(&"node-1".into()).unwrap().status,
            NodeStatus::Offline
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_removes_record() {
        let (broker, registry, mut rx) = setup();
        broker.send(from_node(registration())).await;
        rx.recv().await.unwrap();

        broker.send(from_node(Payload::Unregister)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(registry.node(&"node-1".into()).is_none());
        assert!(registry.nodes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_heartbeat_is_nacked() {
        let (broker, registry, mut rx) = setup();
        broker.send(from_node(heartbeat())).await;

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.payload, Payload::Nack("unknown node".into()));
        assert!(registry.nodes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_idempotent() {
        let (broker, registry, _rx) = setup();
        registry.start();
        assert_eq!(broker.subscriber_count(), 2);

        registry.stop();
        registry.stop();
        assert!(!registry.is_running());
        assert!(!broker.is_subscribed(registry.id()));

        let warnings = broker
            .recent_logs(50)
            .into_iter()
            .filter(|e| e.level == LogLevel::Warn && e.source == REGISTRY_ID)
            .count();
        assert_eq!(warnings, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reregister_overwrites_offline_record() {
        let (broker, registry, mut rx) = setup();
        broker.send(from_node(registration())).await;
        rx.recv().await.unwrap();

        let id: ActorId = "node-1".into();
        let expired = registry.sweep_at(Instant::now() + Duration::from_secs(3600));
        assert_eq!(expired, vec![id.clone()]);
        assert_eq!(registry.node(&id).unwrap().status, NodeStatus::Offline);

        broker
            .send(from_node(Payload::Register(NodeRegistration {
                name: "A2".into(),
                intersection: "2nd".into(),
            })))
            .await;
        let ack = rx.recv().await.unwrap();
        assert_eq!(ack.payload, Payload::Ack("registered A2".into()));

        let record = registry.node(&id).unwrap();
        assert_eq!(record.status, NodeStatus::Online);
        assert_eq!(record.name, "A2");
        assert_eq!(record.intersection, "2nd");
        assert_eq!(registry.online_count(), 1);
        assert!(broker
            .recent_logs(20)
            .iter()
            .any(|e| e.message == "Re-registered node node-1 (A2 @ 2nd)"));
    }
}
