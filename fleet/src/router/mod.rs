//! The central broker: owns the authoritative message log, the channel registry, the
//! agent registry, and a FIFO outbound mailbox per known agent.
//!
//! [`Router`] is transport-agnostic; [`server`] wraps it with a TCP accept loop and the
//! [`fleet_wire`] frame codec.

pub mod server;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use fleet_wire::{AgentId, Channel, Envelope};
use serde_json::Value;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{info, warn};

use crate::status::{AgentStatus, AgentStatusRecord};

/// A FIFO mailbox for one agent. Outlives any single TCP connection: messages enqueued
/// while an agent is disconnected simply accumulate here and are drained in order the
/// next time that agent's connection polls `recv`.
pub struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    notify: Notify,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    async fn push(&self, envelope: Envelope) {
        self.queue.lock().await.push_back(envelope);
        self.notify.notify_one();
    }

    /// Waits until at least one envelope is available, then pops and returns it in FIFO
    /// order. Cancel-safe: if the returned future is dropped before completion, no
    /// envelope is lost.
    pub async fn recv(&self) -> Envelope {
        loop {
            if let Some(envelope) = self.queue.lock().await.pop_front() {
                return envelope;
            }
            self.notify.notified().await;
        }
    }

    pub async fn try_recv(&self) -> Option<Envelope> {
        self.queue.lock().await.pop_front()
    }
}

struct AgentEndpoint {
    mailbox: Arc<Mailbox>,
    status: AgentStatusRecord,
    team_id: Option<AgentId>,
    /// Most recent state snapshot pushed by this agent's client, if any. Best-effort: the
    /// runner's checkpoint machinery reads this, but nothing in the router depends on it.
    last_state: Option<Value>,
}

/// Transport-agnostic message broker. Cheaply cloneable; every clone shares the same
/// underlying log, registries, and mailboxes.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    log: RwLock<Vec<Envelope>>,
    channels: RwLock<HashMap<String, Channel>>,
    endpoints: RwLock<HashMap<AgentId, AgentEndpoint>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RouterInner {
                log: RwLock::new(Vec::new()),
                channels: RwLock::new(HashMap::new()),
                endpoints: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Registers `agent_id` as live and returns a handle to its mailbox. Any backlog
    /// accumulated while the agent was unregistered or disconnected is already sitting in
    /// the mailbox and is the first thing a subsequent `recv` returns.
    ///
    /// Fails with the given id if it is already registered with a live (non-disconnected)
    /// heartbeat — a second connection cannot claim an id that's actively held.
    pub async fn register(&self, agent_id: AgentId) -> Result<Arc<Mailbox>, AgentId> {
        let mut endpoints = self.inner.endpoints.write().await;
        if let Some(existing) = endpoints.get(&agent_id) {
            if existing.status.status != AgentStatus::Disconnected {
                return Err(agent_id);
            }
            let mailbox = existing.mailbox.clone();
            let team_id = existing.team_id.clone();
            let last_state = existing.last_state.clone();
            endpoints.insert(
                agent_id.clone(),
                AgentEndpoint {
                    mailbox: mailbox.clone(),
                    status: AgentStatusRecord::new(AgentStatus::Idle, now()),
                    team_id,
                    last_state,
                },
            );
            info!(agent = %agent_id, "agent re-registered, resuming backlog");
            return Ok(mailbox);
        }
        let mailbox = Arc::new(Mailbox::new());
        endpoints.insert(
            agent_id.clone(),
            AgentEndpoint {
                mailbox: mailbox.clone(),
                status: AgentStatusRecord::new(AgentStatus::Idle, now()),
                team_id: None,
                last_state: None,
            },
        );
        info!(agent = %agent_id, "agent registered");
        Ok(mailbox)
    }

    pub async fn set_team(&self, agent_id: &AgentId, team_id: AgentId) {
        if let Some(endpoint) = self.inner.endpoints.write().await.get_mut(agent_id) {
            endpoint.team_id = Some(team_id);
        }
    }

    pub async fn team_of(&self, agent_id: &AgentId) -> Option<AgentId> {
        self.inner.endpoints.read().await.get(agent_id).and_then(|e| e.team_id.clone())
    }

    pub async fn create_channel(&self, channel: Channel) {
        self.inner.channels.write().await.insert(channel.name.clone(), channel);
    }

    pub async fn join_channel(&self, channel_name: &str, agent_id: AgentId) {
        let mut channels = self.inner.channels.write().await;
        channels
            .entry(channel_name.to_string())
            .or_insert_with(|| Channel::new(channel_name))
            .add_member(agent_id);
    }

    pub async fn set_status(&self, agent_id: &AgentId, status: AgentStatus) {
        if let Some(endpoint) = self.inner.endpoints.write().await.get_mut(agent_id) {
            endpoint.status = AgentStatusRecord::new(status, now());
        }
    }

    pub async fn status_of(&self, agent_id: &AgentId) -> Option<AgentStatusRecord> {
        self.inner.endpoints.read().await.get(agent_id).map(|e| e.status)
    }

    /// Records a best-effort state snapshot pushed by an agent's client, consumed by the
    /// runner's checkpoint machinery. Silently ignored for an agent that isn't registered.
    pub async fn record_state(&self, agent_id: &AgentId, value: Value) {
        if let Some(endpoint) = self.inner.endpoints.write().await.get_mut(agent_id) {
            endpoint.last_state = Some(value);
        }
    }

    pub async fn state_of(&self, agent_id: &AgentId) -> Option<Value> {
        self.inner.endpoints.read().await.get(agent_id).and_then(|e| e.last_state.clone())
    }

    pub async fn mark_disconnected(&self, agent_id: &AgentId) {
        self.set_status(agent_id, AgentStatus::Disconnected).await;
        warn!(agent = %agent_id, "agent marked disconnected");
    }

    pub async fn registered_agents(&self) -> Vec<AgentId> {
        self.inner.endpoints.read().await.keys().cloned().collect()
    }

    pub async fn all_idle_since(&self) -> Option<u64> {
        let endpoints = self.inner.endpoints.read().await;
        if endpoints.is_empty() {
            return None;
        }
        let all_idle = endpoints
            .values()
            .all(|e| matches!(e.status.status, AgentStatus::Idle | AgentStatus::Disabled));
        if !all_idle {
            return None;
        }
        endpoints.values().map(|e| e.status.last_active_timestamp).max()
    }

    pub async fn log_snapshot(&self) -> Vec<Envelope> {
        self.inner.log.read().await.clone()
    }

    /// Best-effort, non-blocking peek at one agent's mailbox; used by the in-process
    /// [`crate::client::AgentClient`] test doubles. Prefer `recv` via a mailbox handle for
    /// real delivery.
    pub async fn try_recv(&self, agent_id: &AgentId) -> Option<Envelope> {
        let mailbox = self.inner.endpoints.read().await.get(agent_id).map(|e| e.mailbox.clone())?;
        mailbox.try_recv().await
    }

    /// Core routing algorithm (see module docs): stamps the envelope, appends it to the
    /// log, computes the recipient set, and enqueues to each recipient's mailbox.
    /// Recipients that are not yet registered still get a (lazily created) mailbox so
    /// their backlog is waiting for them on eventual registration.
    pub async fn send(&self, mut envelope: Envelope) {
        envelope.ensure_stamped();

        self.inner.log.write().await.push(envelope.clone());

        let recipients = self.recipients_for(&envelope).await;
        if recipients.is_empty() {
            warn!(message_id = ?envelope.message_id, "dropping message with no resolvable recipients");
            return;
        }

        for recipient in recipients {
            self.mailbox_for(&recipient).await.push(envelope.clone()).await;
        }
    }

    async fn recipients_for(&self, envelope: &Envelope) -> Vec<AgentId> {
        if let Some(channel_name) = &envelope.channel {
            let channels = self.inner.channels.read().await;
            let mut recipients: Vec<AgentId> = channels
                .get(channel_name)
                .map(|c| c.members.iter().cloned().collect())
                .unwrap_or_default();
            if let Some(src) = &envelope.source {
                recipients.retain(|m| m != src);
            }
            if let Some(dst) = &envelope.destination {
                let is_member = channels.get(channel_name).map(|c| c.contains(dst)).unwrap_or(false);
                if is_member && !recipients.contains(dst) {
                    recipients.push(dst.clone());
                }
            }
            recipients
        } else if let Some(dst) = &envelope.destination {
            vec![dst.clone()]
        } else {
            Vec::new()
        }
    }

    async fn mailbox_for(&self, agent_id: &AgentId) -> Arc<Mailbox> {
        let mut endpoints = self.inner.endpoints.write().await;
        endpoints
            .entry(agent_id.clone())
            .or_insert_with(|| AgentEndpoint {
                mailbox: Arc::new(Mailbox::new()),
                status: AgentStatusRecord::new(AgentStatus::Disconnected, now()),
                team_id: None,
                last_state: None,
            })
            .mailbox
            .clone()
    }
}

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
