use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::AgentId;

/// The fixed set of control frame kinds that travel over the router/agent TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgType {
    Register,
    RegisterAck,
    GetState,
    StateUpdate,
    DumpState,
    AgentMessage,
    RouterMessage,
    TeamInfo,
    StatusUpdate,
    Stop,
    StopAck,
    Heartbeat,
    HeartbeatAck,
}

/// A single wire frame. `payload` is interpreted according to `msg_type`: an [`AgentMessage`]
/// or [`RouterMessage`] payload is a serialized [`crate::envelope::Envelope`]; others carry
/// whatever shape that frame kind needs (state blobs, team info, status strings, ...).
///
/// [`AgentMessage`]: MsgType::AgentMessage
/// [`RouterMessage`]: MsgType::RouterMessage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub msg_type: MsgType,
    pub agent_id: AgentId,
    #[serde(default)]
    pub payload: Value,
    pub msg_id: String,
}

impl Frame {
    pub fn new(msg_type: MsgType, agent_id: AgentId, payload: Value) -> Self {
        Self {
            msg_type,
            agent_id,
            payload,
            msg_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn register(agent_id: AgentId) -> Self {
        Self::new(MsgType::Register, agent_id, Value::Null)
    }

    pub fn register_ack(agent_id: AgentId) -> Self {
        Self::new(MsgType::RegisterAck, agent_id, Value::Null)
    }

    pub fn heartbeat(agent_id: AgentId) -> Self {
        Self::new(MsgType::Heartbeat, agent_id, Value::Null)
    }

    pub fn heartbeat_ack(agent_id: AgentId) -> Self {
        Self::new(MsgType::HeartbeatAck, agent_id, Value::Null)
    }

    pub fn stop(agent_id: AgentId) -> Self {
        Self::new(MsgType::Stop, agent_id, Value::Null)
    }

    pub fn stop_ack(agent_id: AgentId) -> Self {
        Self::new(MsgType::StopAck, agent_id, Value::Null)
    }
}
