//! Message broker - the simulated network
//!
//! Name-addressed, delayed, best-effort delivery between actors. Every
//! subscriber gets a mailbox drained by its own task, so a receiver's handler
//! runs to completion before its next message is handled, in arrival order.
//!
//! Delivery is at-most-once: unknown receivers drop the message, handler
//! failures are logged and never reported back to the sender.

use crate::event_log::{EventLog, LogEntry, LogLevel, DEFAULT_LOG_CAPACITY};
use crate::message::{ActorId, Message};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use rand::Rng;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Source name used for broker log entries
pub const BROKER_SOURCE: &str = "broker";

/// Receives messages delivered by the broker
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> anyhow::Result<()>;
}

/// Broker configuration
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Fixed part of the simulated latency
    pub base_latency: Duration,
    /// Upper bound of the uniform random jitter added on top
    pub jitter: Duration,
    /// Entries retained in the event log
    pub log_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_latency: Duration::from_millis(10),
            jitter: Duration::from_millis(5),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

struct BrokerInner {
    subscribers: DashMap<ActorId, mpsc::UnboundedSender<Message>>,
    log: Arc<EventLog>,
    total_messages: AtomicU64,
    config: BrokerConfig,
}

/// In-process stand-in for the network. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                subscribers: DashMap::new(),
                log: Arc::new(EventLog::new(config.log_capacity)),
                total_messages: AtomicU64::new(0),
                config,
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Attach `handler` under `actor`. Must be called within a Tokio runtime.
    ///
    /// Re-subscribing replaces the previous handler; messages already queued
    /// for the old one are still handled by it.
    pub fn subscribe(&self, actor: ActorId, handler: Arc<dyn MessageHandler>) {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain_mailbox(
            actor.clone(),
            handler,
            rx,
            self.inner.log.clone(),
        ));

        if self.inner.subscribers.insert(actor.clone(), tx).is_some() {
            tracing::debug!("Replaced subscription for {}", actor);
        }
        self.log(
            LogLevel::Debug,
            BROKER_SOURCE,
            format!("{} subscribed", actor),
            None,
        );
    }

    /// Detach `actor`. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, actor: &ActorId) -> bool {
        let removed = self.inner.subscribers.remove(actor).is_some();
        if removed {
            self.log(
                LogLevel::Debug,
                BROKER_SOURCE,
                format!("{} unsubscribed", actor),
                None,
            );
        }
        removed
    }

    pub fn is_subscribed(&self, actor: &ActorId) -> bool {
        self.inner.subscribers.contains_key(actor)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Deliver `message` after the simulated latency.
    ///
    /// Returns whether the message reached a subscribed receiver. Never fails.
    pub async fn send(&self, message: Message) -> bool {
        self.inner.total_messages.fetch_add(1, Ordering::SeqCst);

        let delay = self.sample_latency();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mailbox = self
            .inner
            .subscribers
            .get(&message.receiver)
            .map(|entry| entry.value().clone());

        let Some(mailbox) = mailbox else {
            self.drop_undeliverable(&message, "unknown receiver");
            return false;
        };

        tracing::trace!(
            "{} {} {} -> {}",
            message.id,
            message.message_type(),
            message.sender,
            message.receiver
        );

        match mailbox.send(message) {
            Ok(()) => true,
            Err(mpsc::error::SendError(message)) => {
                self.drop_undeliverable(&message, "mailbox closed");
                false
            }
        }
    }

    /// Send a copy of `message` to every subscriber, one after another.
    ///
    /// Returns the number of copies delivered.
    pub async fn broadcast(&self, message: Message, exclude_sender: bool) -> usize {
        let mut receivers: Vec<ActorId> = self
            .inner
            .subscribers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        receivers.sort();

        let mut delivered = 0;
        for receiver in receivers {
            if exclude_sender && receiver == message.sender {
                continue;
            }
            if self.send(message.with_receiver(receiver)).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Record an entry in the network event log
    pub fn log(
        &self,
        level: LogLevel,
        source: &str,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) {
        self.inner.log.record(level, source, message, data);
    }

    /// Subscribe to log entries recorded from now on
    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEntry> {
        self.inner.log.subscribe()
    }

    /// Up to `limit` most recent log entries, oldest first
    pub fn recent_logs(&self, limit: usize) -> Vec<LogEntry> {
        self.inner.log.recent(limit)
    }

    /// Messages ever handed to `send`, delivered or not
    pub fn total_messages(&self) -> u64 {
        self.inner.total_messages.load(Ordering::SeqCst)
    }

    fn sample_latency(&self) -> Duration {
        let BrokerConfig {
            base_latency,
            jitter,
            ..
        } = self.inner.config;
        if jitter.is_zero() {
            return base_latency;
        }
        let jitter_us = rand::thread_rng().gen_range(0..=jitter.as_micros() as u64);
        base_latency + Duration::from_micros(jitter_us)
    }

    fn drop_undeliverable(&self, message: &Message, why: &str) {
        self.log(
            LogLevel::Warn,
            BROKER_SOURCE,
            format!(
                "Dropped {} {} from {} to {}: {}",
                message.message_type(),
                message.id,
                message.sender,
                message.receiver,
                why
            ),
            Some(serde_json::json!({
                "id": message.id.value(),
                "type": message.message_type(),
                "sender": message.sender,
                "receiver": message.receiver,
            })),
        );
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

async fn drain_mailbox(
    receiver: ActorId,
    handler: Arc<dyn MessageHandler>,
    mut mailbox: mpsc::UnboundedReceiver<Message>,
    log: Arc<EventLog>,
) {
    while let Some(message) = mailbox.recv().await {
        let kind = message.message_type();
        let sender = message.sender.clone();

        match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log.record(
                LogLevel::Error,
                BROKER_SOURCE,
                format!("Handler for {} failed on {} from {}: {:#}", receiver, kind, sender, e),
                None,
            ),
            Err(_) => log.record(
                LogLevel::Error,
                BROKER_SOURCE,
                format!("Handler for {} panicked on {} from {}", receiver, kind, sender),
                None,
            ),
        }
    }
    tracing::trace!("Mailbox for {} closed", receiver);
}
