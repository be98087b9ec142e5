//! In-process message bus
//!
//! `MessageBus` routes envelopes to handlers by topic string. Each
//! subscription owns an unbounded mailbox drained by its own task, so a
//! publisher never waits on a slow handler and every handler sees the
//! envelopes of a topic in publish order. A handler that errors or panics
//! is logged and counted; delivery to the other subscriptions continues.

use crate::error::{AgentBusError, Result};
use crate::types::Envelope;
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Receives envelopes for a subscribed topic
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one envelope. Errors are logged by the bus and never propagated.
    async fn handle(&self, envelope: Envelope) -> Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, envelope: Envelope) -> Result<()> {
        (self.0)(envelope).await
    }
}

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Mailbox {
    id: SubscriptionId,
    sender: mpsc::UnboundedSender<Envelope>,
}

#[derive(Default)]
struct BusCounters {
    published: AtomicU64,
    unrouted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Bus status information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusInfo {
    /// Topics with at least one subscriber
    pub topics: usize,
    /// Active subscriptions across all topics
    pub subscriptions: usize,
    /// Envelopes passed to `publish`
    pub published: u64,
    /// Envelopes published to a topic nobody listened on
    pub unrouted: u64,
    /// Handler invocations that returned Ok
    pub delivered: u64,
    /// Handler invocations that errored or panicked
    pub failed: u64,
}

/// Topic-keyed publish/subscribe router
pub struct MessageBus {
    /// topic → mailboxes in subscription order
    topics: RwLock<HashMap<String, Vec<Mailbox>>>,
    next_id: AtomicU64,
    counters: Arc<BusCounters>,
}

impl MessageBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            counters: Arc::new(BusCounters::default()),
        }
    }

    /// Register a handler for all future envelopes on `topic`
    ///
    /// Envelopes published before this call are not replayed. Must be
    /// called from within a Tokio runtime; the handler's mailbox is drained
    /// by a spawned task.
    pub fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            AgentBusError::Subscribe {
                topic: topic.to_string(),
                reason: format!("no async runtime: {}", e),
            }
        })?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();

        runtime.spawn(drain_mailbox(
            topic.to_string(),
            id,
            receiver,
            handler,
            self.counters.clone(),
        ));

        let mut topics = self.topics.write().map_err(|e| AgentBusError::Subscribe {
            topic: topic.to_string(),
            reason: format!("topic table lock poisoned: {}", e),
        })?;
        topics
            .entry(topic.to_string())
            .or_default()
            .push(Mailbox { id, sender });

        tracing::debug!(topic = %topic, subscription = %id, "Subscribed");
        Ok(id)
    }

    /// Remove a subscription; returns whether it existed
    ///
    /// Envelopes already queued for the subscription are still handled.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Ok(mut topics) = self.topics.write() else {
            return false;
        };

        let mut removed = false;
        topics.retain(|_, mailboxes| {
            let before = mailboxes.len();
            mailboxes.retain(|m| m.id != id);
            removed |= mailboxes.len() != before;
            !mailboxes.is_empty()
        });

        if removed {
            tracing::debug!(subscription = %id, "Unsubscribed");
        }
        removed
    }

    /// Publish an envelope to every subscriber of its topic
    ///
    /// Returns the number of subscriptions the envelope was queued for.
    /// Publishing to a topic without subscribers is a silent no-op.
    pub fn publish(&self, envelope: Envelope) -> usize {
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        let topics = match self.topics.read() {
            Ok(topics) => topics,
            Err(e) => {
                tracing::error!(envelope_id = %envelope.id, error = %e, "Topic table lock poisoned");
                return 0;
            }
        };

        let Some(mailboxes) = topics.get(envelope.topic()) else {
            self.counters.unrouted.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                envelope_id = %envelope.id,
                topic = %envelope.topic(),
                "No subscribers for topic"
            );
            return 0;
        };

        let mut queued = 0;
        for mailbox in mailboxes {
            if mailbox.sender.send(envelope.clone()).is_ok() {
                queued += 1;
            } else {
                tracing::warn!(
                    subscription = %mailbox.id,
                    topic = %envelope.topic(),
                    "Subscription mailbox closed"
                );
            }
        }

        tracing::debug!(
            envelope_id = %envelope.id,
            topic = %envelope.topic(),
            sender = %envelope.sender_id,
            queued,
            "Envelope published"
        );
        queued
    }

    /// Topics that currently have subscribers
    pub fn topics(&self) -> Vec<String> {
        self.topics
            .read()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of subscriptions on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .map(|t| t.get(topic).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Bus statistics
    pub fn info(&self) -> BusInfo {
        let (topics, subscriptions) = self
            .topics
            .read()
            .map(|t| (t.len(), t.values().map(Vec::len).sum::<usize>()))
            .unwrap_or_default();

        BusInfo {
            topics,
            subscriptions,
            published: self.counters.published.load(Ordering::Relaxed),
            unrouted: self.counters.unrouted.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn drain_mailbox(
    topic: String,
    id: SubscriptionId,
    mut receiver: mpsc::UnboundedReceiver<Envelope>,
    handler: Arc<dyn MessageHandler>,
    counters: Arc<BusCounters>,
) {
    while let Some(envelope) = receiver.recv().await {
        let envelope_id = envelope.id.clone();
        match AssertUnwindSafe(handler.handle(envelope)).catch_unwind().await {
            Ok(Ok(())) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    topic = %topic,
                    subscription = %id,
                    envelope_id = %envelope_id,
                    error = %e,
                    "Handler failed"
                );
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    topic = %topic,
                    subscription = %id,
                    envelope_id = %envelope_id,
                    "Handler panicked"
                );
            }
        }
    }
    tracing::trace!(topic = %topic, subscription = %id, "Mailbox closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, TaskRequest};
    use std::time::Duration;

    fn envelope(task_id: &str) -> Envelope {
        Envelope::new(
            "tester",
            Message::ExecuteTask(TaskRequest::new(task_id, "check balance")),
        )
    }

    fn collector() -> (Arc<dyn MessageHandler>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = handler_fn(move |env: Envelope| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(env.message.task_id().unwrap_or_default().to_string());
                Ok(())
            }
        });
        (handler, rx)
    }

    struct PanickingHandler;

    #[async_trait]
    impl MessageHandler for PanickingHandler {
        async fn handle(&self, _envelope: Envelope) -> Result<()> {
            panic!("handler bug");
        }
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delivery timed out")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = MessageBus::new();
        assert_eq!(bus.publish(envelope("t-1")), 0);
        assert!(bus.topics().is_empty());

        let info = bus.info();
        assert_eq!(info.published, 1);
        assert_eq!(info.unrouted, 1);
    }

    #[tokio::test]
    async fn test_delivery_preserves_publish_order() {
        let bus = MessageBus::new();
        let (handler, mut rx) = collector();
        bus.subscribe("execute_task", handler).unwrap();

        for i in 0..10 {
            assert_eq!(bus.publish(envelope(&format!("t-{}", i))), 1);
        }
        for i in 0..10 {
            assert_eq!(recv(&mut rx).await, format!("t-{}", i));
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let bus = MessageBus::new();
        let (h1, mut rx1) = collector();
        let (h2, mut rx2) = collector();
        bus.subscribe("execute_task", h1).unwrap();
        bus.subscribe("execute_task", h2).unwrap();

        assert_eq!(bus.publish(envelope("t-1")), 2);
        assert_eq!(recv(&mut rx1).await, "t-1");
        assert_eq!(recv(&mut rx2).await, "t-1");
    }

    #[tokio::test]
    async fn test_failing_handler_is_isolated() {
        let bus = MessageBus::new();
        bus.subscribe(
            "execute_task",
            handler_fn(|_env| async { Err(AgentBusError::provider("boom")) }),
        )
        .unwrap();
        bus.subscribe("execute_task", Arc::new(PanickingHandler)).unwrap();
        let (good, mut rx) = collector();
        bus.subscribe("execute_task", good).unwrap();

        bus.publish(envelope("t-1"));
        bus.publish(envelope("t-2"));
        assert_eq!(recv(&mut rx).await, "t-1");
        assert_eq!(recv(&mut rx).await, "t-2");

        tokio::time::sleep(Duration::from_millis(50)).await;
        let info = bus.info();
        assert_eq!(info.failed, 4);
        assert_eq!(info.delivered, 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_topic() {
        let bus = MessageBus::new();
        let (handler, _rx) = collector();
        let id = bus.subscribe("execute_task", handler).unwrap();
        assert_eq!(bus.subscriber_count("execute_task"), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count("execute_task"), 0);
        assert!(bus.topics().is_empty());
        assert_eq!(bus.publish(envelope("t-1")), 0);
    }

    #[test]
    fn test_subscribe_outside_runtime_fails() {
        let bus = MessageBus::new();
        let (handler, _rx) = collector();
        let err = bus.subscribe("execute_task", handler).unwrap_err();
        assert!(matches!(err, AgentBusError::Subscribe { .. }));
    }

    #[test]
    fn test_subscription_id_display() {
        assert_eq!(SubscriptionId(7).to_string(), "sub-7");
    }
}
