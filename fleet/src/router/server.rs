//! TCP front-end for [`super::Router`]: binds a listener, speaks the [`fleet_wire`] frame
//! protocol on each accepted connection, and forwards control frames into the router core.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fleet_wire::codec::{read_frame, write_frame};
use fleet_wire::{AgentId, Envelope, Frame, MsgType, WireError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::status::AgentStatus;

use super::Router;

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Default TCP port the router listens on. If occupied, [`RouterServer::bind`] falls back
/// to the next free port, exactly as a single-machine dev tool should.
pub const DEFAULT_PORT: u16 = 5555;

/// Number of consecutive missed heartbeats before an agent is marked disconnected.
pub const MAX_MISSED_HEARTBEATS: u32 = 3;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

pub struct RouterServer {
    router: Router,
    listener: TcpListener,
}

impl RouterServer {
    /// Binds to `preferred_port`, falling back to an OS-assigned free port if it's taken.
    pub async fn bind(router: Router, preferred_port: u16) -> std::io::Result<Self> {
        let listener = match TcpListener::bind(("127.0.0.1", preferred_port)).await {
            Ok(l) => l,
            Err(_) => {
                warn!(port = preferred_port, "preferred port unavailable, falling back");
                TcpListener::bind(("127.0.0.1", 0)).await?
            }
        };
        Ok(Self { router, listener })
    }

    pub fn local_port(&self) -> std::io::Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Accepts connections forever, spawning one handler task per connection. Returns only
    /// on a listener error.
    pub async fn serve(self) -> std::io::Result<()> {
        info!(port = self.local_port().unwrap_or_default(), "router listening");
        loop {
            let (socket, peer) = self.listener.accept().await?;
            debug!(%peer, "accepted connection");
            let router = self.router.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(router, socket).await {
                    debug!(error = %e, %peer, "connection closed");
                }
            });
        }
    }
}

async fn handle_connection(router: Router, mut socket: TcpStream) -> Result<(), WireError> {
    // The first frame on a fresh connection must be a registration.
    let first = read_frame(&mut socket).await?;
    if first.msg_type != MsgType::Register {
        return Err(WireError::malformed("first frame on a connection must be Register"));
    }
    let agent_id = first.agent_id.clone();

    let mailbox = match router.register(agent_id.clone()).await {
        Ok(mailbox) => mailbox,
        Err(id) => {
            warn!(agent = %id, "rejecting duplicate registration");
            let nack = Frame::new(MsgType::RegisterAck, id, serde_json::json!({"ok": false}));
            write_frame(&mut socket, &nack).await?;
            return Ok(());
        }
    };
    write_frame(&mut socket, &Frame::register_ack(agent_id.clone())).await?;
    info!(agent = %agent_id, "agent connected");

    if let Some(team_id) = router.team_of(&agent_id).await {
        let payload = serde_json::json!({ "team_id": team_id.as_str() });
        write_frame(&mut socket, &Frame::new(MsgType::TeamInfo, agent_id.clone(), payload)).await?;
    }

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(256);
    let (read_half, write_half) = socket.into_split();

    let writer_task = {
        let mut write_half = write_half;
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if write_frame(&mut write_half, &frame).await.is_err() {
                    break;
                }
            }
        })
    };

    let pump_task = {
        let outbound_tx = outbound_tx.clone();
        let mailbox = mailbox.clone();
        let agent_id = agent_id.clone();
        tokio::spawn(async move {
            loop {
                let envelope = mailbox.recv().await;
                let payload = match serde_json::to_value(&envelope) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                let frame = Frame::new(MsgType::RouterMessage, agent_id.clone(), payload);
                if outbound_tx.send(frame).await.is_err() {
                    break;
                }
            }
        })
    };

    // Tracks the last time any frame was observed from this agent; a missing heartbeat
    // ack for `MAX_MISSED_HEARTBEATS` consecutive pings marks it disconnected, per the
    // router's liveness contract. Any inbound frame counts as proof of life, not just an
    // explicit heartbeat ack, since a busy agent still reading/writing is plainly alive.
    let last_activity = Arc::new(AtomicU64::new(now_unix()));

    let heartbeat_task = {
        let outbound_tx = outbound_tx.clone();
        let last_activity = last_activity.clone();
        let router = router.clone();
        let agent_id = agent_id.clone();
        tokio::spawn(async move {
            let mut missed = 0u32;
            loop {
                tokio::time::sleep(HEARTBEAT_INTERVAL).await;
                if outbound_tx.send(Frame::heartbeat(agent_id.clone())).await.is_err() {
                    return;
                }
                let elapsed = now_unix().saturating_sub(last_activity.load(Ordering::Relaxed));
                if elapsed >= HEARTBEAT_INTERVAL.as_secs() {
                    missed += 1;
                } else {
                    missed = 0;
                }
                if missed >= MAX_MISSED_HEARTBEATS {
                    router.mark_disconnected(&agent_id).await;
                    return;
                }
            }
        })
    };

    let result = read_loop(&router, &agent_id, read_half, outbound_tx, last_activity).await;

    heartbeat_task.abort();
    pump_task.abort();
    writer_task.abort();
    router.mark_disconnected(&agent_id).await;
    result
}

async fn read_loop(
    router: &Router,
    agent_id: &AgentId,
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    outbound_tx: mpsc::Sender<Frame>,
    last_activity: Arc<AtomicU64>,
) -> Result<(), WireError> {
    loop {
        let frame = match read_frame(&mut read_half).await {
            Ok(f) => f,
            Err(WireError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };
        last_activity.store(now_unix(), Ordering::Relaxed);

        match frame.msg_type {
            MsgType::AgentMessage => {
                let envelope: Envelope = serde_json::from_value(frame.payload)?;
                router.send(envelope).await;
            }
            MsgType::Heartbeat => {
                let ack = Frame::heartbeat_ack(agent_id.clone());
                if outbound_tx.send(ack).await.is_err() {
                    return Ok(());
                }
            }
            MsgType::StatusUpdate => {
                if let Ok(status) = serde_json::from_value::<AgentStatus>(frame.payload) {
                    router.set_status(agent_id, status).await;
                }
            }
            MsgType::StateUpdate => {
                router.record_state(agent_id, frame.payload).await;
            }
            MsgType::DumpState => {
                // Requested on demand by the runner; nothing to do on the receive path.
            }
            MsgType::Stop => {
                let ack = Frame::stop_ack(agent_id.clone());
                let _ = outbound_tx.send(ack).await;
                return Ok(());
            }
            MsgType::StopAck | MsgType::Register | MsgType::RegisterAck | MsgType::HeartbeatAck | MsgType::TeamInfo => {
                // Not expected inbound from an agent; ignore rather than tear down the
                // connection over a protocol quirk.
            }
            MsgType::GetState | MsgType::RouterMessage => {}
        }
    }
}
