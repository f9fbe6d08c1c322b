//! Per-agent transport handle: registers with the router over TCP, maintains a local
//! ordered view of everything this agent has observed, and exposes the blocking
//! `wait_for_response` primitive on top of that view.

use std::sync::Arc;
use std::time::Duration;

use fleet_wire::codec::{read_frame, write_frame};
use fleet_wire::{AgentId, Envelope, Frame, MsgType};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::warn;

use crate::error::{FleetError, FleetResult};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The per-process transport handle a hosted agent's `respond` logic is built on top of.
pub struct AgentClient {
    agent_id: AgentId,
    write_half: Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>,
    view: Arc<Mutex<Vec<Envelope>>>,
    receiver_task: tokio::task::JoinHandle<()>,
}

impl AgentClient {
    /// Connects to the router at `addr`, sends REGISTER, and waits for REGISTER_ACK.
    /// Spawns a background task that appends every subsequently-received envelope to the
    /// local view under `view`'s mutex.
    pub async fn connect(addr: impl tokio::net::ToSocketAddrs, agent_id: AgentId) -> FleetResult<Self> {
        let stream = TcpStream::connect(addr).await.map_err(FleetError::Io)?;
        let (mut read_half, mut write_half) = stream.into_split();

        write_frame(&mut write_half, &Frame::register(agent_id.clone())).await?;
        let ack = read_frame(&mut read_half).await?;
        if ack.msg_type != MsgType::RegisterAck {
            return Err(FleetError::protocol("expected RegisterAck as first frame"));
        }

        let view = Arc::new(Mutex::new(Vec::new()));
        let write_half = Arc::new(Mutex::new(write_half));
        let receiver_task = {
            let view = view.clone();
            let write_half = write_half.clone();
            let agent_id = agent_id.clone();
            tokio::spawn(async move {
                loop {
                    match read_frame(&mut read_half).await {
                        Ok(frame) if frame.msg_type == MsgType::RouterMessage => {
                            match serde_json::from_value::<Envelope>(frame.payload) {
                                Ok(envelope) => view.lock().await.push(envelope),
                                Err(e) => warn!(error = %e, "dropping malformed router message"),
                            }
                        }
                        Ok(frame) if frame.msg_type == MsgType::Heartbeat => {
                            let ack = Frame::heartbeat_ack(agent_id.clone());
                            if write_frame(&mut *write_half.lock().await, &ack).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(_) => break,
                    }
                }
            })
        };

        Ok(Self {
            agent_id,
            write_half,
            view,
            receiver_task,
        })
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Fire-and-forget send; the router assigns id/timestamp if the envelope lacks them.
    pub async fn send_message(&self, mut envelope: Envelope) -> FleetResult<()> {
        envelope.ensure_stamped();
        let payload = serde_json::to_value(&envelope)?;
        let frame = Frame::new(MsgType::AgentMessage, self.agent_id.clone(), payload);
        write_frame(&mut *self.write_half.lock().await, &frame).await?;
        Ok(())
    }

    /// Pushes a best-effort serialized snapshot of the hosted agent's state to the router,
    /// for later retrieval by the runner's checkpoint machinery. Fire-and-forget, same as
    /// `send_message`.
    pub async fn push_state(&self, state: &impl serde::Serialize) -> FleetResult<()> {
        let payload = serde_json::to_value(state)?;
        let frame = Frame::new(MsgType::StateUpdate, self.agent_id.clone(), payload);
        write_frame(&mut *self.write_half.lock().await, &frame).await?;
        Ok(())
    }

    /// A stable, ordered snapshot of every envelope this client has observed so far.
    pub async fn fetch_all_messages(&self) -> Vec<Envelope> {
        self.view.lock().await.clone()
    }

    pub async fn filter_messages(
        &self,
        source: Option<&AgentId>,
        destination: Option<&AgentId>,
        channel: Option<&str>,
    ) -> Vec<Envelope> {
        self.fetch_all_messages()
            .await
            .into_iter()
            .filter(|m| {
                source.map_or(true, |s| m.source.as_ref() == Some(s))
                    && destination.map_or(true, |d| m.destination.as_ref() == Some(d))
                    && channel.map_or(true, |c| m.channel.as_deref() == Some(c))
            })
            .collect()
    }

    /// Blocks until an envelope matching the filter arrives that was not already present
    /// at call time, or `timeout` elapses (returning `None`).
    ///
    /// The baseline is snapshotted before the first poll so a reply that arrives between
    /// snapshot and the first poll iteration is never missed.
    pub async fn wait_for_response(
        &self,
        source: Option<&AgentId>,
        destination: Option<&AgentId>,
        channel: Option<&str>,
        timeout: Duration,
    ) -> Option<Envelope> {
        let baseline: std::collections::HashSet<_> = self
            .filter_messages(source, destination, channel)
            .await
            .into_iter()
            .filter_map(|m| m.message_id)
            .collect();

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let matches = self.filter_messages(source, destination, channel).await;
            if let Some(fresh) = matches
                .into_iter()
                .find(|m| m.message_id.as_ref().map_or(true, |id| !baseline.contains(id)))
            {
                return Some(fresh);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(tokio::time::Instant::now()))).await;
        }
    }
}

impl Drop for AgentClient {
    fn drop(&mut self) {
        self.receiver_task.abort();
    }
}
