//! Coordinator - global timing optimization
//!
//! Consumes metrics reports, proposes per-node timing through the
//! [`TimingPolicy`], and pushes adjustments back through the broker when the
//! change is significant. A periodic global pass aggregates congestion across
//! every known node for observability only.
//!
//! Per-node state is never pruned: entries for removed nodes stay and keep
//! contributing their last metrics to the global pass.

use crate::policy::TimingPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grid_broker::{
    ActorId, Broker, CameraMetrics, CongestionLevel, LightState, LogLevel, Message,
    MessageHandler, MetricsReport, Payload, TimingAdjustment, TrafficTiming, COORDINATOR_ID,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// How often the global pass runs
    pub global_pass_interval: Duration,
    pub policy: TimingPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            global_pass_interval: Duration::from_secs(10),
            policy: TimingPolicy::default(),
        }
    }
}

/// Coordinator's mirror of one node
#[derive(Debug, Clone, Serialize)]
pub struct NodeCoordinationState {
    pub node_id: ActorId,
    pub last_metrics: Option<CameraMetrics>,
    /// Timing the coordinator believes the node runs; informs future proposals
    pub timing: TrafficTiming,
    pub light_state: LightState,
    pub last_update: DateTime<Utc>,
}

impl NodeCoordinationState {
    fn new(node_id: ActorId) -> Self {
        Self {
            node_id,
            last_metrics: None,
            timing: TrafficTiming::default(),
            light_state: LightState::Red,
            last_update: Utc::now(),
        }
    }
}

/// Result of a global pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalSummary {
    /// Nodes with at least one metrics report
    pub reporting_nodes: usize,
    pub total_vehicles: u64,
    pub mean_congestion_rank: f64,
    pub average_congestion: CongestionLevel,
}

pub struct Coordinator {
    id: ActorId,
    broker: Broker,
    nodes: RwLock<HashMap<ActorId, NodeCoordinationState>>,
    running: AtomicBool,
    pass_task: Mutex<Option<JoinHandle<()>>>,
    adjustments_sent: AtomicU64,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(broker: Broker, config: CoordinatorConfig) -> Arc<Self> {
        Arc::new(Self {
            id: ActorId::coordinator(),
            broker,
            nodes: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            pass_task: Mutex::new(None),
            adjustments_sent: AtomicU64::new(0),
            config,
        })
    }

    pub fn id(&self) -> &ActorId {
        &self.id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Subscribe to the broker and start the global pass
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            self.log(LogLevel::Warn, "Coordinator already running", None);
            return;
        }

        self.broker
            .subscribe(self.id.clone(), self.clone() as Arc<dyn MessageHandler>);

        let task = tokio::spawn(global_pass_loop(
            Arc::downgrade(self),
            self.config.global_pass_interval,
        ));
        *self.pass_task.lock() = Some(task);

        self.log(
            LogLevel::Info,
            format!(
                "Coordinator online (global pass every {:?})",
                self.config.global_pass_interval
            ),
            None,
        );
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            self.log(LogLevel::Warn, "Coordinator already stopped", None);
            return;
        }

        if let Some(task) = self.pass_task.lock().take() {
            task.abort();
        }
        self.broker.unsubscribe(&self.id);
        self.log(LogLevel::Info, "Coordinator stopped", None);
    }

    pub fn node_state(&self, id: &ActorId) -> Option<NodeCoordinationState> {
        self.nodes.read().get(id).cloned()
    }

    /// Number of nodes ever seen, including removed ones
    pub fn known_nodes(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn adjustments_sent(&self) -> u64 {
        self.adjustments_sent.load(Ordering::SeqCst)
    }

    /// Aggregate over every node that has reported metrics
    pub fn global_summary(&self) -> Option<GlobalSummary> {
        let nodes = self.nodes.read();
        let (count, vehicles, rank_sum) = nodes
            .values()
            .filter_map(|state| state.last_metrics.as_ref())
            .fold((0usize, 0u64, 0u64), |(n, v, r), m| {
                (
                    n + 1,
                    v + u64::from(m.vehicle_count),
                    r + u64::from(m.congestion.rank()),
                )
            });

        if count == 0 {
            return None;
        }

        let mean = rank_sum as f64 / count as f64;
        Some(GlobalSummary {
            reporting_nodes: count,
            total_vehicles: vehicles,
            mean_congestion_rank: mean,
            average_congestion: CongestionLevel::from_mean_rank(mean),
        })
    }

    /// Compute and log the global summary. Changes no state.
    pub fn run_global_pass(&self) -> Option<GlobalSummary> {
        let summary = self.global_summary();
        match &summary {
            Some(s) => self.log(
                LogLevel::Info,
                format!(
                    "Global pass: {} vehicles across {} nodes, average congestion {}",
                    s.total_vehicles, s.reporting_nodes, s.average_congestion
                ),
                serde_json::to_value(s).ok(),
            ),
            None => tracing::debug!("Global pass: no metrics reported yet"),
        }
        summary
    }

    fn note_registration(&self, node: &ActorId) {
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(node) {
            nodes.insert(node.clone(), NodeCoordinationState::new(node.clone()));
            tracing::debug!("Coordinator tracking {}", node);
        }
    }

    /// Record a report and decide whether to adjust. Returns the previous
    /// and new timing when an adjustment should be sent.
    fn evaluate(
        &self,
        node: &ActorId,
        report: MetricsReport,
    ) -> Option<(TrafficTiming, TrafficTiming, CameraMetrics)> {
        let mut nodes = self.nodes.write();
        let state = nodes
            .entry(node.clone())
            .or_insert_with(|| NodeCoordinationState::new(node.clone()));

        state.timing = report.timing;
        state.light_state = report.light_state;
        state.last_update = Utc::now();
        state.last_metrics = Some(report.metrics.clone());

        let policy = &self.config.policy;
        let candidate = policy.propose(&report.metrics, &state.timing);
        if !policy.is_significant(&state.timing, &candidate) {
            return None;
        }

        let previous = state.timing;
        state.timing = candidate;
        Some((previous, candidate, report.metrics))
    }

    async fn dispatch(
        &self,
        node: &ActorId,
        previous: TrafficTiming,
        timing: TrafficTiming,
        metrics: &CameraMetrics,
    ) {
        let reason = format!(
            "{} congestion: {} vehicles, {:.0}s average wait",
            metrics.congestion, metrics.vehicle_count, metrics.avg_wait_secs
        );
        self.log(
            LogLevel::Info,
            format!("Adjusting {} from {} to {} ({})", node, previous, timing, reason),
            Some(serde_json::json!({
                "node": node,
                "previous": previous,
                "timing": timing,
                "congestion": metrics.congestion,
            })),
        );

        let message = Message::new(
            self.id.clone(),
            node.clone(),
            Payload::TimingAdjustment(TimingAdjustment { timing, reason }),
        );
        self.adjustments_sent.fetch_add(1, Ordering::SeqCst);
        if !self.broker.send(message).await {
            tracing::debug!("Adjustment for {} was not delivered", node);
        }
    }

    fn log(&self, level: LogLevel, message: impl Into<String>, data: Option<serde_json::Value>) {
        self.broker.log(level, COORDINATOR_ID, message, data);
    }
}

#[async_trait]
impl MessageHandler for Coordinator {
    async fn handle(&self, message: Message) -> anyhow::Result<()> {
        let sender = message.sender;
        match message.payload {
            Payload::Register(_) => self.note_registration(&sender),
            Payload::MetricsReport(report) => {
                tracing::debug!(
                    "Metrics from {}: {} vehicles, {}",
                    sender,
                    report.metrics.vehicle_count,
                    report.metrics.congestion
                );
                if let Some((previous, timing, metrics)) = self.evaluate(&sender, report) {
                    self.dispatch(&sender, previous, timing, &metrics).await;
                }
            }
            other => {
                tracing::debug!("Coordinator ignoring {} from {}", other.message_type(), sender);
            }
        }
        Ok(())
    }
}

async fn global_pass_loop(coordinator: Weak<Coordinator>, period: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        if !coordinator.is_running() {
            break;
        }
        coordinator.run_global_pass();
    }
}
