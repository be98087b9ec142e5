//! Agent base contract
//!
//! An agent is a named worker that subscribes to bus topics, keeps a private
//! key/value state map, and answers envelopes with envelopes. `initialize`
//! wires an agent onto the bus through a wrapper that publishes responses and
//! turns a panicking handler into an `error_response`.

use crate::bus::{MessageBus, MessageHandler, SubscriptionId};
use crate::error::Result;
use crate::types::{now_millis, Envelope, Message};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

pub mod executor;

pub use executor::ExecutionAgent;

/// Identity, bus handle, and private state shared by every agent
pub struct AgentContext {
    id: String,
    bus: Arc<MessageBus>,
    state: RwLock<HashMap<String, Value>>,
    last_activity: AtomicU64,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl AgentContext {
    pub fn new(id: impl Into<String>, bus: Arc<MessageBus>) -> Self {
        Self {
            id: id.into(),
            bus,
            state: RwLock::new(HashMap::new()),
            last_activity: AtomicU64::new(now_millis()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Unix milliseconds of the last send or log
    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.last_activity.fetch_max(now_millis(), Ordering::Relaxed);
    }

    /// Wrap `message` in a new envelope from this agent and publish it
    pub fn send_message(&self, message: Message, target: Option<&str>) -> usize {
        let mut envelope = Envelope::new(self.id.clone(), message);
        if let Some(target) = target {
            envelope = envelope.with_target(target);
        }
        self.publish(envelope)
    }

    /// Publish a prepared envelope, stamping sender and send time
    pub fn publish(&self, mut envelope: Envelope) -> usize {
        envelope.sender_id = self.id.clone();
        envelope.timestamp = now_millis();
        self.touch();
        self.bus.publish(envelope)
    }

    pub fn set_state(&self, key: impl Into<String>, value: Value) {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value);
    }

    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Log on behalf of the agent
    pub fn log(&self, message: &str) {
        self.touch();
        tracing::info!(agent = %self.id, "{}", message);
    }

    fn record_subscription(&self, id: SubscriptionId) {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(id);
    }

    /// Drop every bus subscription this agent holds
    pub fn unsubscribe_all(&self) -> usize {
        let ids: Vec<_> = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        ids.into_iter().filter(|id| self.bus.unsubscribe(*id)).count()
    }
}

/// A named worker on the bus
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    fn context(&self) -> &AgentContext;

    /// Topics this agent subscribes to
    fn topics(&self) -> Vec<String>;

    /// Declared capability tags; advisory only
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether `envelope` may be handled off the mailbox task
    ///
    /// Concurrent envelopes are dispatched to their own task and their replies
    /// are published in completion order. The rest are handled in mailbox
    /// order.
    fn runs_concurrently(&self, _envelope: &Envelope) -> bool {
        false
    }

    /// Answer an envelope, or `None` when its kind is not handled
    async fn handle_message(&self, envelope: Envelope) -> Option<Envelope>;

    /// Advisory cleanup; the default unsubscribes from the bus
    async fn shutdown(&self) {
        let removed = self.context().unsubscribe_all();
        tracing::info!(agent = %self.id(), subscriptions = removed, "Agent shut down");
    }

    fn id(&self) -> &str {
        self.context().id()
    }
}

/// Subscribe `agent` to its topics
///
/// Call once, right after construction.
pub fn initialize<A: Agent>(agent: &Arc<A>) -> Result<Vec<SubscriptionId>> {
    let context = agent.context();
    let handler: Arc<dyn MessageHandler> = Arc::new(AgentHandler {
        agent: agent.clone(),
    });

    let mut ids = Vec::new();
    for topic in agent.topics() {
        let id = context.bus().subscribe(&topic, handler.clone())?;
        context.record_subscription(id);
        ids.push(id);
    }

    tracing::info!(
        agent = %context.id(),
        topics = ?agent.topics(),
        capabilities = ?agent.capabilities(),
        "Agent initialized"
    );
    Ok(ids)
}

/// Bus handler publishing whatever the agent answers
struct AgentHandler<A> {
    agent: Arc<A>,
}

#[async_trait]
impl<A: Agent> MessageHandler for AgentHandler<A> {
    async fn handle(&self, envelope: Envelope) -> Result<()> {
        if self.agent.runs_concurrently(&envelope) {
            tokio::spawn(dispatch(self.agent.clone(), envelope));
        } else {
            dispatch(self.agent.clone(), envelope).await;
        }
        Ok(())
    }
}

async fn dispatch<A: Agent>(agent: Arc<A>, envelope: Envelope) {
    let context = agent.context();
    let outcome = AssertUnwindSafe(agent.handle_message(envelope.clone()))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Some(response)) => {
            context.publish(response);
        }
        Ok(None) => {}
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            tracing::error!(
                agent = %context.id(),
                envelope_id = %envelope.id,
                topic = %envelope.topic(),
                "Agent panicked while handling message: {}",
                reason
            );
            let reply = envelope.error_reply(
                context.id(),
                format!("Agent {} failed to handle message: {}", context.id(), reason),
            );
            context.publish(reply);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Registry of running agents by id
#[derive(Default)]
pub struct AgentDirectory {
    agents: RwLock<HashMap<String, Arc<dyn Agent>>>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent, returning any agent previously under the same id
    pub fn register(&self, agent: Arc<dyn Agent>) -> Option<Arc<dyn Agent>> {
        let id = agent.id().to_string();
        tracing::debug!(agent = %id, "Agent registered");
        self.agents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, agent)
    }

    pub fn remove(&self, id: &str) -> Option<Arc<dyn Agent>> {
        self.agents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Agent>> {
        self.agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Agent ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Agents declaring `capability`
    pub fn with_capability(&self, capability: &str) -> Vec<Arc<dyn Agent>> {
        let mut found: Vec<_> = self
            .agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|agent| agent.capabilities().iter().any(|c| c == capability))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id().cmp(b.id()));
        found
    }

    pub fn len(&self) -> usize {
        self.agents.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shut down and deregister every agent
    pub async fn shutdown_all(&self) {
        let agents: Vec<_> = self
            .agents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, agent)| agent)
            .collect();
        for agent in agents {
            agent.shutdown().await;
        }
    }
}
