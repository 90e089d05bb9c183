//! Edge node - one autonomous traffic light
//!
//! Owns its light state machine (GREEN -> YELLOW -> RED -> GREEN) and a local
//! sensor. While running it emits heartbeats to the registry, reports metrics
//! to the coordinator, and advances its light on its own schedule.
//!
//! The dwell time of a state is read from the timing at the moment the state
//! is entered; a timing update mid-state only affects later entries.

use crate::sensor::{SensorConfig, SimulatedCamera, TrafficSensor};
use anyhow::Context;
use async_trait::async_trait;
use grid_broker::{
    ActorId, Broker, CameraMetrics, Heartbeat, LightState, ListenerHandle, LogLevel, Message,
    MessageHandler, MetricsReport, NodeRegistration, NodeSummary, Observers, Payload,
    TimingAdjustment, TrafficTiming,
};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Clone, Debug)]
pub struct EdgeNodeConfig {
    pub heartbeat_interval: Duration,
    pub metrics_interval: Duration,
    /// Wall duration of one timing second
    pub time_unit: Duration,
    pub initial_timing: TrafficTiming,
    pub sensor: SensorConfig,
    pub registry: ActorId,
    pub coordinator: ActorId,
}

impl Default for EdgeNodeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            metrics_interval: Duration::from_secs(10),
            time_unit: Duration::from_secs(1),
            initial_timing: TrafficTiming::default(),
            sensor: SensorConfig::default(),
            registry: ActorId::registry(),
            coordinator: ActorId::coordinator(),
        }
    }
}

/// A light change, delivered to state listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: LightState,
    pub to: LightState,
    /// Seconds the node will stay in `to`
    pub dwell_secs: u32,
}

struct NodeState {
    light: LightState,
    timing: TrafficTiming,
    last_metrics: Option<CameraMetrics>,
    rush_hour: bool,
    peers: Vec<NodeSummary>,
}

struct NodeInner {
    id: ActorId,
    name: String,
    intersection: String,
    broker: Broker,
    config: EdgeNodeConfig,
    state: RwLock<NodeState>,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    listeners: Observers<StateTransition>,
    sensor: Mutex<Box<dyn TrafficSensor>>,
}

/// Handle to an edge node. Clones refer to the same node.
#[derive(Clone)]
pub struct EdgeNode {
    inner: Arc<NodeInner>,
}

impl EdgeNode {
    pub fn new(
        id: ActorId,
        name: impl Into<String>,
        intersection: impl Into<String>,
        broker: Broker,
        config: EdgeNodeConfig,
    ) -> Self {
        let sensor = Box::new(SimulatedCamera::new(config.sensor.clone()));
        Self::with_sensor(id, name, intersection, broker, config, sensor)
    }

    /// Build a node around a specific sensor
    pub fn with_sensor(
        id: ActorId,
        name: impl Into<String>,
        intersection: impl Into<String>,
        broker: Broker,
        config: EdgeNodeConfig,
        sensor: Box<dyn TrafficSensor>,
    ) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                id,
                name: name.into(),
                intersection: intersection.into(),
                broker,
                state: RwLock::new(NodeState {
                    light: LightState::Red,
                    timing: config.initial_timing,
                    last_metrics: None,
                    rush_hour: false,
                    peers: Vec::new(),
                }),
                config,
                running: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
                listeners: Observers::new(),
                sensor: Mutex::new(sensor),
            }),
        }
    }

    pub fn id(&self) -> &ActorId {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn intersection(&self) -> &str {
        &self.inner.intersection
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    pub fn light_state(&self) -> LightState {
        self.inner.state.read().light
    }

    /// Copy of the current timing
    pub fn timing(&self) -> TrafficTiming {
        self.inner.state.read().timing
    }

    pub fn last_metrics(&self) -> Option<CameraMetrics> {
        self.inner.state.read().last_metrics.clone()
    }

    pub fn rush_hour(&self) -> bool {
        self.inner.state.read().rush_hour
    }

    /// Peers from the latest discovery response
    pub fn known_peers(&self) -> Vec<NodeSummary> {
        self.inner.state.read().peers.clone()
    }

    pub fn set_rush_hour(&self, enabled: bool) {
        let changed = {
            let mut state = self.inner.state.write();
            std::mem::replace(&mut state.rush_hour, enabled) != enabled
        };
        if changed {
            let label = if enabled { "started" } else { "ended" };
            self.inner
                .log(LogLevel::Info, format!("Rush hour {}", label), None);
        }
    }

    /// Register a listener called synchronously on every light change
    pub fn on_state_change<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&StateTransition) + Send + Sync + 'static,
    {
        self.inner.listeners.register(listener)
    }

    /// Join the network: subscribe, register, start periodic work
    pub async fn start(&self) {
        let inner = &self.inner;
        if inner.running.swap(true, Ordering::SeqCst) {
            inner.log(LogLevel::Warn, "Start requested but node is already running", None);
            return;
        }

        inner
            .broker
            .subscribe(inner.id.clone(), inner.clone() as Arc<dyn MessageHandler>);

        let registration = Payload::Register(NodeRegistration {
            name: inner.name.clone(),
            intersection: inner.intersection.clone(),
        });
        inner
            .send(inner.config.registry.clone(), registration.clone())
            .await;
        inner
            .send(inner.config.coordinator.clone(), registration)
            .await;

        if !inner.is_running() {
            tracing::debug!("{} stopped during startup", inner.id);
            return;
        }

        let weak = Arc::downgrade(inner);
        let tasks = vec![
            tokio::spawn(every(weak.clone(), inner.config.heartbeat_interval, |node| async move {
                node.send_heartbeat().await;
            })),
            tokio::spawn(every(weak.clone(), inner.config.metrics_interval, |node| async move {
                node.capture_and_report().await;
            })),
            tokio::spawn(light_cycle(weak)),
        ];
        inner.tasks.lock().extend(tasks);

        let timing = self.timing();
        inner.log(
            LogLevel::Info,
            format!(
                "Node {} ready at {} ({})",
                inner.name, inner.intersection, timing
            ),
            None,
        );
    }

    /// Leave the network: unregister, cancel periodic work, unsubscribe
    pub async fn stop(&self) {
        let inner = &self.inner;
        if !inner.running.swap(false, Ordering::SeqCst) {
            inner.log(LogLevel::Warn, "Stop requested but node is not running", None);
            return;
        }

        inner
            .send(inner.config.registry.clone(), Payload::Unregister)
            .await;

        for task in inner.tasks.lock().drain(..) {
            task.abort();
        }
        inner.broker.unsubscribe(&inner.id);
        inner.log(LogLevel::Info, format!("Node {} shut down", inner.name), None);
    }

    /// Take one capture now and, if running, report it to the coordinator
    pub async fn capture_and_report(&self) -> CameraMetrics {
        self.inner.capture_and_report().await
    }

    /// Ask the registry for the current membership
    pub async fn request_discovery(&self) -> bool {
        let registry = self.inner.config.registry.clone();
        self.inner.send(registry, Payload::DiscoveryRequest).await
    }
}

impl fmt::Debug for EdgeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeNode")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("intersection", &self.inner.intersection)
            .field("running", &self.is_running())
            .finish()
    }
}

impl NodeInner {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn send(&self, to: ActorId, payload: Payload) -> bool {
        self.broker
            .send(Message::new(self.id.clone(), to, payload))
            .await
    }

    async fn send_heartbeat(&self) {
        let light_state = self.state.read().light;
        let registry = self.config.registry.clone();
        self.send(registry, Payload::Heartbeat(Heartbeat { light_state }))
            .await;
    }

    async fn capture_and_report(&self) -> CameraMetrics {
        let rush_hour = self.state.read().rush_hour;
        let metrics = self.sensor.lock().capture(rush_hour);

        let (timing, light_state) = {
            let mut state = self.state.write();
            state.last_metrics = Some(metrics.clone());
            (state.timing, state.light)
        };

        tracing::debug!(
            "{} captured {} vehicles, {:.1}s wait, {}",
            self.id,
            metrics.vehicle_count,
            metrics.avg_wait_secs,
            metrics.congestion
        );

        if self.is_running() {
            let coordinator = self.config.coordinator.clone();
            let report = MetricsReport {
                metrics: metrics.clone(),
                timing,
                light_state,
            };
            self.send(coordinator, Payload::MetricsReport(report)).await;
        }
        metrics
    }

    /// Seconds to stay in the current state
    fn current_dwell(&self) -> u32 {
        let state = self.state.read();
        state.timing.secs_for(state.light)
    }

    /// Move to the next light state and notify listeners.
    /// Returns the dwell of the state just entered.
    fn advance_light(&self) -> u32 {
        let transition = {
            let mut state = self.state.write();
            let from = state.light;
            let to = from.next();
            state.light = to;
            StateTransition {
                from,
                to,
                dwell_secs: state.timing.secs_for(to),
            }
        };

        tracing::trace!(
            "{} {} -> {} for {}s",
            self.id,
            transition.from,
            transition.to,
            transition.dwell_secs
        );
        self.listeners.notify(&transition);
        transition.dwell_secs
    }

    fn apply_timing(&self, adjustment: TimingAdjustment) -> anyhow::Result<()> {
        adjustment
            .timing
            .validate()
            .with_context(|| format!("rejected timing {}", adjustment.timing))?;

        let previous = std::mem::replace(&mut self.state.write().timing, adjustment.timing);
        self.log(
            LogLevel::Info,
            format!(
                "Timing updated {} -> {} ({})",
                previous, adjustment.timing, adjustment.reason
            ),
            Some(serde_json::json!({
                "previous": previous,
                "timing": adjustment.timing,
                "reason": adjustment.reason,
            })),
        );
        Ok(())
    }

    fn log(&self, level: LogLevel, message: impl Into<String>, data: Option<serde_json::Value>) {
        self.broker.log(level, self.id.as_str(), message, data);
    }
}

#[async_trait]
impl MessageHandler for NodeInner {
    async fn handle(&self, message: Message) -> anyhow::Result<()> {
        match message.payload {
            Payload::TimingAdjustment(adjustment) => self.apply_timing(adjustment)?,
            Payload::Ack(text) => {
                self.log(LogLevel::Debug, format!("Ack from {}: {}", message.sender, text), None)
            }
            Payload::Nack(text) => {
                self.log(LogLevel::Warn, format!("Nack from {}: {}", message.sender, text), None)
            }
            Payload::DiscoveryResponse(peers) => {
                tracing::debug!("{} discovered {} nodes", self.id, peers.len());
                self.state.write().peers = peers;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Run `tick` every `period` for as long as the node is alive and running
async fn every<F, Fut>(node: Weak<NodeInner>, period: Duration, tick: F)
where
    F: Fn(Arc<NodeInner>) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let Some(node) = node.upgrade() else {
            break;
        };
        if !node.is_running() {
            break;
        }
        tick(node).await;
    }
}

/// Wall time for `secs` timing seconds, saturating instead of overflowing
fn dwell_duration(unit: Duration, secs: u32) -> Duration {
    unit.saturating_mul(secs)
}

async fn light_cycle(node: Weak<NodeInner>) {
    let (mut dwell, unit) = match node.upgrade() {
        Some(node) => (node.current_dwell(), node.config.time_unit),
        None => return,
    };

    loop {
        tokio::time::sleep(dwell_duration(unit, dwell)).await;
        let Some(node) = node.upgrade() else {
            break;
        };
        if !node.is_running() {
            break;
        }
        dwell = node.advance_light();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_broker::{BrokerConfig, CongestionLevel, MessageType};
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

    /// Sensor that always returns the same reading
    struct FixedSensor {
        vehicles: u32,
        wait: f64,
    }

    impl TrafficSensor for FixedSensor {
        fn capture(&mut self, _rush_hour: bool) -> CameraMetrics {
            CameraMetrics::new(self.vehicles, self.wait, self.vehicles / 2)
        }
    }

    fn quiet_broker() -> Broker {
        Broker::new(BrokerConfig {
            base_latency: Duration::from_millis(1),
            jitter: Duration::ZERO,
            ..Default::default()
        })
    }

    fn recorder(broker: &Broker, id: ActorId) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        broker.subscribe(id, Arc::new(Recorder { tx }));
        rx
    }

    fn node(broker: &Broker, timing: TrafficTiming) -> EdgeNode {
        let config = EdgeNodeConfig {
            initial_timing: timing,
            ..Default::default()
        };
        EdgeNode::with_sensor(
            "node-1".into(),
            "N1",
            "Main&1st",
            broker.clone(),
            config,
            Box::new(FixedSensor {
                vehicles: 50,
                wait: 70.0,
            }),
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_registers_with_both() {
        let broker = quiet_broker();
        let mut registry = recorder(&broker, ActorId::registry());
        let mut coordinator = recorder(&broker, ActorId::coordinator());
        let node = node(&broker, TrafficTiming::default());

        node.start().await;
        assert!(node.is_running());
        assert!(broker.is_subscribed(node.id()));

        let r = registry.recv().await.unwrap();
        let c = coordinator.recv().await.unwrap();
        assert_eq!(r.message_type(), MessageType::Register);
        assert_eq!(c.message_type(), MessageType::Register);
        assert_eq!(
            r.payload,
            Payload::Register(NodeRegistration {
                name: "N1".into(),
                intersection: "Main&1st".into(),
            })
        );
        node.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_light_sequence_and_dwell() {
        let broker = quiet_broker();
        let _registry = recorder(&broker, ActorId::registry());
        let _coordinator = recorder(&broker, ActorId::coordinator());
        let node = node(&broker, TrafficTiming::new(20, 3, 10).unwrap());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _handle = node.on_state_change(move |t| {
            sink.lock().push((Instant::now(), *t));
        });

        let started = Instant::now();
        node.start().await;
        tokio::time::sleep(Duration::from_secs(100)).await;
        node.stop().await;

        let seen = seen.lock().clone();
        assert!(seen.len() >= 6);

        let expected = [LightState::Green, LightState::Yellow, LightState::Red];
        for (i, (_, t)) in seen.iter().enumerate() {
            assert_eq!(t.to, expected[i % 3]);
            assert_eq!(t.from.next(), t.to);
        }

        // RED first, dwell 10 (+ the registration sends), then 20 / 3 / 10
        let first = seen[0].0 - started;
        assert!(first >= Duration::from_secs(10) && first < Duration::from_secs(11));
        for pair in seen.windows(2) {
            let (entered, transition) = pair[0];
            let (left, _) = pair[1];
            assert_eq!(left - entered, Duration::from_secs(u64::from(transition.dwell_secs)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_cycle_timing_applies_on_next_entry() {
        let broker = quiet_broker();
        let _registry = recorder(&broker, ActorId::registry());
        let _coordinator = recorder(&broker, ActorId::coordinator());
        let node = node(&broker, TrafficTiming::new(20, 3, 10).unwrap());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _handle = node.on_state_change(move |t| sink.lock().push((Instant::now(), *t)));

        node.start().await;
        // Into GREEN (20s) at ~10s
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(node.light_state(), LightState::Green);

        let adjust = Message::new(
            ActorId::coordinator(),
            node.id().clone(),
            Payload::TimingAdjustment(TimingAdjustment {
                timing: TrafficTiming::new(40, 3, 10).unwrap(),
                reason: "test".into(),
            }),
        );
        broker.send(adjust).await;
        tokio::time::sleep(Duration::from_secs(70)).await;
        node.stop().await;

        let seen = seen.lock().clone();
        // Current GREEN keeps its 20s; the next GREEN gets 40s
        assert_eq!(seen[0].1.to, LightState::Green);
        assert_eq!(seen[0].1.dwell_secs, 20);
        assert_eq!(seen[1].0 - seen[0].0, Duration::from_secs(20));
        assert_eq!(seen[3].1.to, LightState::Green);
        assert_eq!(seen[3].1.dwell_secs, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_and_metrics_flow() {
        let broker = quiet_broker();
        let mut registry = recorder(&broker, ActorId::registry());
        let mut coordinator = recorder(&broker, ActorId::coordinator());
        let node = node(&broker, TrafficTiming::default());

        node.start().await;
        tokio::time::sleep(Duration::from_secs(21)).await;

        let heartbeats = drain(&mut registry)
            .into_iter()
            .filter(|m| m.message_type() == MessageType::Heartbeat)
            .count();
        assert_eq!(heartbeats, 4);

        let reports: Vec<_> = drain(&mut coordinator)
            .into_iter()
            .filter_map(|m| match m.payload {
                Payload::MetricsReport(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].metrics.congestion, CongestionLevel::High);
        assert_eq!(node.last_metrics().unwrap().vehicle_count, 50);
        node.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_unregisters_and_cancels() {
        let broker = quiet_broker();
        let mut registry = recorder(&broker, ActorId::registry());
        let _coordinator = recorder(&broker, ActorId::coordinator());
        let node = node(&broker, TrafficTiming::default());

        node.start().await;
        node.stop().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!node.is_running());
        assert!(!broker.is_subscribed(node.id()));

        let types: Vec<_> = drain(&mut registry).iter().map(Message::message_type).collect();
        assert_eq!(types, vec![MessageType::Register, MessageType::Unregister]);

        // No periodic activity after stop
        let light = node.light_state();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(drain(&mut registry).is_empty());
        assert_eq!(node.light_state(), light);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_start_and_stop_are_noops() {
        let broker = quiet_broker();
        let mut registry = recorder(&broker, ActorId::registry());
        let _coordinator = recorder(&broker, ActorId::coordinator());
        let node = node(&broker, TrafficTiming::default());

        node.start().await;
        node.start().await;
        node.stop().await;
        node.stop().await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let types: Vec<_> = drain(&mut registry).iter().map(Message::message_type).collect();
        assert_eq!(types, vec![MessageType::Register, MessageType::Unregister]);

        let warnings: Vec<_> = broker
            .recent_logs(50)
            .into_iter()
            .filter(|e| e.level == LogLevel::Warn && e.source == "node-1")
            .collect();
        assert_eq!(warnings.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timing_copy_and_wholesale_replace() {
        let broker = quiet_broker();
        let node = node(&broker, TrafficTiming::default());
        node.start().await;

        let mut copy = node.timing();
        copy.green_secs = 1;
        assert_eq!(node.timing(), TrafficTiming::default());

        let new_timing = TrafficTiming::new(45, 4, 25).unwrap();
        broker
            .send(Message::new(
                ActorId::coordinator(),
                node.id().clone(),
                Payload::TimingAdjustment(TimingAdjustment {
                    timing: new_timing,
                    reason: "HIGH congestion".into(),
                }),
            ))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(node.timing(), new_timing);

        // Invalid timing is rejected and surfaces as a handler error
        broker
            .send(Message::new(
                ActorId::coordinator(),
                node.id().clone(),
                Payload::TimingAdjustment(TimingAdjustment {
                    timing: TrafficTiming {
                        green_secs: 0,
                        yellow_secs: 4,
                        red_secs: 25,
                    },
                    reason: "bad".into(),
                }),
            ))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(node.timing(), new_timing);
        assert!(broker
            .recent_logs(50)
            .iter()
            .any(|e| e.level == LogLevel::Error && e.message.contains("rejected timing")));
        node.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_unsubscribe() {
        let broker = quiet_broker();
        let node = node(&broker, TrafficTiming::new(2, 2, 2).unwrap());
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let c = count.clone();
        let handle = node.on_state_change(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        node.start().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        let before = count.load(Ordering::SeqCst);
        assert!(before >= 1);

        assert!(handle.unsubscribe());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), before);
        node.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_response_stored() {
        let broker = quiet_broker();
        let mut registry = recorder(&broker, ActorId::registry());
        let node = node(&broker, TrafficTiming::default());
        node.start().await;

        assert!(node.request_discovery().await);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let types: Vec<_> = drain(&mut registry).iter().map(Message::message_type).collect();
        assert!(types.contains(&MessageType::DiscoveryRequest));

        let peers = vec![NodeSummary {
            id: "node-2".into(),
            name: "N2".into(),
            intersection: "Oak&5th".into(),
            status: grid_broker::NodeStatus::Online,
        }];
        broker
            .send(Message::new(
                ActorId::registry(),
                node.id().clone(),
                Payload::DiscoveryResponse(peers.clone()),
            ))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(node.known_peers(), peers);
        node.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_logged_and_unhandled_payloads_ignored() {
        let broker = quiet_broker();
        let _registry = recorder(&broker, ActorId::registry());
        let _coordinator = recorder(&broker, ActorId::coordinator());
        let node = node(&broker, TrafficTiming::default());
        node.start().await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        broker
            .send(Message::new(
                ActorId::registry(),
                node.id().clone(),
                Payload::Ack("registered N1".into()),
            ))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let acks: Vec<_> = broker
            .recent_logs(200)
            .into_iter()
            .filter(|e| e.source == "node-1" && e.message.starts_with("Ack from"))
            .collect();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].level, LogLevel::Debug);
        assert_eq!(acks[0].message, "Ack from registry: registered N1");

        let logged = broker.recent_logs(200).len();
        let (light, timing, peers, metrics) = (
            node.light_state(),
            node.timing(),
            node.known_peers(),
            node.last_metrics(),
        );

        broker
            .send(Message::new(
                ActorId::registry(),
                node.id().clone(),
                Payload::Heartbeat(Heartbeat {
                    light_state: LightState::Green,
                }),
            ))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(broker.recent_logs(200).len(), logged);
        assert_eq!(node.light_state(), light);
        assert_eq!(node.timing(), timing);
        assert_eq!(node.known_peers(), peers);
        assert_eq!(node.last_metrics(), metrics);
        node.stop().await;
    }

    #[test]
    fn test_dwell_duration_saturates() {
        assert_eq!(dwell_duration(Duration::from_secs(1), 30), Duration::from_secs(30));
        assert_eq!(dwell_duration(Duration::MAX, 2), Duration::MAX);
        assert_eq!(
            dwell_duration(Duration::from_secs(u64::MAX / 2), u32::MAX),
            Duration::MAX
        );
    }
}
