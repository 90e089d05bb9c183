//! Traffic network orchestrator
//!
//! Drives the lifecycle of one network: a broker, the registry and the
//! coordinator are built fresh on every start, and edge nodes are added and
//! removed while it runs. Presentation layers either poll [`snapshot`] or
//! register with [`on_change`]; the orchestrator never renders anything.
//!
//! [`snapshot`]: TrafficNetwork::snapshot
//! [`on_change`]: TrafficNetwork::on_change

use crate::error::NetworkError;
use crate::snapshot::{NetworkSnapshot, NodeView};
use chrono::Utc;
use grid_actors::{
    Coordinator, CoordinatorConfig, EdgeNode, EdgeNodeConfig, Registry, RegistryConfig,
    SensorConfig, SimulatedCamera, TrafficSensor,
};
use grid_broker::{ActorId, Broker, BrokerConfig, ListenerHandle, LogEntry, LogLevel, Observers};
use parking_lot::{ReentrantMutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// Source name used for orchestrator log entries
pub const NETWORK_SOURCE: &str = "network";

/// Default number of log entries carried by a snapshot
pub const DEFAULT_SNAPSHOT_LOGS: usize = 50;

#[derive(Clone, Debug)]
pub struct NetworkConfig {
    pub broker: BrokerConfig,
    pub registry: RegistryConfig,
    pub coordinator: CoordinatorConfig,
    /// Template for every node added to the network
    pub node: EdgeNodeConfig,
    /// Log entries included in each snapshot
    pub snapshot_log_limit: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            registry: RegistryConfig::default(),
            coordinator: CoordinatorConfig::default(),
            node: EdgeNodeConfig::default(),
            snapshot_log_limit: DEFAULT_SNAPSHOT_LOGS,
        }
    }
}

/// Components scoped to one start/stop cycle.
/// Kept after stop so the last run's logs stay visible.
struct NetworkRun {
    broker: Broker,
    registry: Arc<Registry>,
    coordinator: Arc<Coordinator>,
    forwarder: Option<JoinHandle<()>>,
}

struct NetworkInner {
    config: NetworkConfig,
    running: AtomicBool,
    run: RwLock<Option<NetworkRun>>,
    /// Live nodes in insertion order
    nodes: RwLock<Vec<EdgeNode>>,
    rush_hour: AtomicBool,
    node_counter: AtomicU64,
    listeners: Observers<NetworkSnapshot>,
    /// Held while a change snapshot is taken and delivered
    notify_lock: ReentrantMutex<()>,
}

/// Handle to a traffic network. Clones drive the same network.
#[derive(Clone)]
pub struct TrafficNetwork {
    inner: Arc<NetworkInner>,
}

impl TrafficNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                config,
                running: AtomicBool::new(false),
                run: RwLock::new(None),
                nodes: RwLock::new(Vec::new()),
                rush_hour: AtomicBool::new(false),
                node_counter: AtomicU64::new(0),
                listeners: Observers::new(),
                notify_lock: ReentrantMutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    pub fn rush_hour_active(&self) -> bool {
        self.inner.rush_hour.load(Ordering::SeqCst)
    }

    /// Broker of the current or most recent run
    pub fn broker(&self) -> Option<Broker> {
        self.inner.broker()
    }

    pub fn registry(&self) -> Option<Arc<Registry>> {
        self.inner.run.read().as_ref().map(|run| run.registry.clone())
    }

    pub fn coordinator(&self) -> Option<Arc<Coordinator>> {
        self.inner.run.read().as_ref().map(|run| run.coordinator.clone())
    }

    pub fn node(&self, id: &ActorId) -> Option<EdgeNode> {
        self.inner.nodes.read().iter().find(|n| n.id() == id).cloned()
    }

    pub fn nodes(&self) -> Vec<EdgeNode> {
        self.inner.nodes.read().clone()
    }

    /// Build a fresh broker, registry and coordinator and bring them online
    pub fn start_network(&self) {
        let inner = &self.inner;
        if inner.running.swap(true, Ordering::SeqCst) {
            inner.log(LogLevel::Warn, "Start requested but network is already running");
            return;
        }

        let broker = Broker::new(inner.config.broker.clone());
        let forwarder = tokio::spawn(forward_logs(Arc::downgrade(inner), broker.subscribe_logs()));

        let registry = Registry::new(broker.clone(), inner.config.registry.clone());
        let coordinator = Coordinator::new(broker.clone(), inner.config.coordinator.clone());
        registry.start();
        coordinator.start();

        *inner.run.write() = Some(NetworkRun {
            broker,
            registry,
            coordinator,
            forwarder: Some(forwarder),
        });

        inner.log(LogLevel::Info, "Network started");
        inner.notify_change();
    }

    /// Shut down every node, then the coordinator and registry
    pub async fn stop_network(&self) {
        let inner = &self.inner;
        if !inner.running.swap(false, Ordering::SeqCst) {
            inner.log(LogLevel::Warn, "Stop requested but network is not running");
            return;
        }

        let nodes = std::mem::take(&mut *inner.nodes.write());
        for node in nodes.iter().filter(|n| n.is_running()) {
            node.stop().await;
        }

        let components = inner
            .run
            .read()
            .as_ref()
            .map(|run| (run.registry.clone(), run.coordinator.clone()));
        if let Some((registry, coordinator)) = components {
            coordinator.stop();
            registry.stop();
        }

        inner.log(
            LogLevel::Info,
            format!("Network stopped ({} nodes shut down)", nodes.len()),
        );

        if let Some(forwarder) = inner.run.write().as_mut().and_then(|run| run.forwarder.take()) {
            forwarder.abort();
        }
        inner.notify_change();
    }

    /// Add and start a node with a simulated camera.
    ///
    /// With a configured sensor seed, node `n` gets `seed + n` so runs are
    /// reproducible without every camera producing the same traffic.
    pub async fn add_node(
        &self,
        name: impl Into<String>,
        intersection: impl Into<String>,
    ) -> Result<EdgeNode, NetworkError> {
        let template = self.inner.config.node.sensor.clone();
        self.add_node_from(name, intersection, move |seq| {
            let config = SensorConfig {
                seed: template.seed.map(|seed| seed.wrapping_add(seq)),
                ..template
            };
            Box::new(SimulatedCamera::new(config))
        })
        .await
    }

    /// Add and start a node around a specific sensor
    pub async fn add_node_with_sensor(
        &self,
        name: impl Into<String>,
        intersection: impl Into<String>,
        sensor: Box<dyn TrafficSensor>,
    ) -> Result<EdgeNode, NetworkError> {
        self.add_node_from(name, intersection, |_| sensor).await
    }

    async fn add_node_from<F>(
        &self,
        name: impl Into<String>,
        intersection: impl Into<String>,
        sensor: F,
    ) -> Result<EdgeNode, NetworkError>
    where
        F: FnOnce(u64) -> Box<dyn TrafficSensor>,
    {
        let inner = &self.inner;
        if !inner.is_running() {
            return Err(NetworkError::NotRunning);
        }
        let broker = inner.broker().ok_or(NetworkError::NotRunning)?;

        let seq = inner.node_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let node = EdgeNode::with_sensor(
            ActorId::new(format!("node-{}", seq)),
            name,
            intersection,
            broker,
            inner.config.node.clone(),
            sensor(seq),
        );
        node.set_rush_hour(inner.rush_hour.load(Ordering::SeqCst));

        inner.nodes.write().push(node.clone());
        node.start().await;

        inner.log(
            LogLevel::Info,
            format!(
                "Added {} ({}) at {}",
                node.name(),
                node.id(),
                node.intersection()
            ),
        );
        inner.notify_change();
        Ok(node)
    }

    /// Stop a node and forget it
    pub async fn remove_node(&self, id: &ActorId) -> Result<(), NetworkError> {
        let inner = &self.inner;
        let node = {
            let mut nodes = inner.nodes.write();
            let position = nodes
                .iter()
                .position(|n| n.id() == id)
                .ok_or_else(|| NetworkError::UnknownNode(id.clone()))?;
            nodes.remove(position)
        };

        if node.is_running() {
            node.stop().await;
        }
        inner.log(
            LogLevel::Info,
            format!("Removed {} ({})", node.name(), node.id()),
        );
        inner.notify_change();
        Ok(())
    }

    /// Toggle rush hour on every live node; later nodes inherit the flag
    pub fn set_rush_hour(&self, enabled: bool) {
        let inner = &self.inner;
        let previous = inner.rush_hour.swap(enabled, Ordering::SeqCst);

        let nodes = inner.nodes.read().clone();
        for node in &nodes {
            node.set_rush_hour(enabled);
        }

        if previous != enabled {
            let message = if enabled {
                format!("Rush hour activated on {} nodes", nodes.len())
            } else {
                "Rush hour ended".to_string()
            };
            inner.log(LogLevel::Info, message);
        }
        inner.notify_change();
    }

    pub fn snapshot(&self) -> NetworkSnapshot {
        self.inner.snapshot()
    }

    /// Register a listener called with a fresh snapshot after every mutating
    /// operation and every log event.
    ///
    /// Notifications are serialized: listeners never run concurrently with
    /// each other and see snapshots in the order they were taken, whether the
    /// change came from a caller or from the log forwarder.
    pub fn on_change<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&NetworkSnapshot) + Send + Sync + 'static,
    {
        self.inner.listeners.register(listener)
    }
}

impl Default for TrafficNetwork {
    fn default() -> Self {
        Self::new(NetworkConfig::default())
    }
}

impl NetworkInner {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn broker(&self) -> Option<Broker> {
        self.run.read().as_ref().map(|run| run.broker.clone())
    }

    fn snapshot(&self) -> NetworkSnapshot {
        let (registry, registry_online, coordinator_online, total_messages, recent_logs) =
            match self.run.read().as_ref() {
                Some(run) => (
                    Some(run.registry.clone()),
                    run.registry.is_running(),
                    run.coordinator.is_running(),
                    run.broker.total_messages(),
                    run.broker.recent_logs(self.config.snapshot_log_limit),
                ),
                None => (None, false, false, 0, Vec::new()),
            };

        let nodes = self.nodes.read().clone();
        let nodes = nodes
            .iter()
            .map(|node| {
                let status = registry
                    .as_ref()
                    .and_then(|r| r.node(node.id()))
                    .map(|record| record.status);
                NodeView::of(node, status)
            })
            .collect();

        NetworkSnapshot {
            registry_online,
            coordinator_online,
            nodes,
            total_messages,
            recent_logs,
            running: self.is_running(),
            rush_hour_active: self.rush_hour.load(Ordering::SeqCst),
            captured_at: Utc::now(),
        }
    }

    fn notify_change(&self) {
        if self.listeners.is_empty() {
            return;
        }
        let _ordered = self.notify_lock.lock();
        let snapshot = self.snapshot();
        self.listeners.notify(&snapshot);
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        if let Some(broker) = self.broker() {
            broker.log(level, NETWORK_SOURCE, message, None);
            return;
        }

        let message = message.into();
        match level {
            LogLevel::Warn | LogLevel::Error => tracing::warn!(source = NETWORK_SOURCE, "{}", message),
            LogLevel::Info => tracing::info!(source = NETWORK_SOURCE, "{}", message),
            LogLevel::Debug => tracing::debug!(source = NETWORK_SOURCE, "{}", message),
        }
    }
}

/// Turn every broker log event into a change notification
async fn forward_logs(network: Weak<NetworkInner>, mut logs: broadcast::Receiver<LogEntry>) {
    loop {
        match logs.recv().await {
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::trace!("Change forwarder skipped {} log entries", skipped);
            }
            Err(RecvError::Closed) => break,
        }

        let Some(network) = network.upgrade() else {
            break;
        };
        network.notify_change();
    }
}
