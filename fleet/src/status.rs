use serde::{Deserialize, Serialize};

/// Lifecycle status of a registered agent, as tracked by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Error,
    Disabled,
    Disconnected,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Idle
    }
}

/// An [`AgentStatus`] paired with the time it was last observed, used by the router's
/// heartbeat monitor and by stop conditions such as the no-activity detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatusRecord {
    pub status: AgentStatus,
    pub last_active_timestamp: u64,
}

impl AgentStatusRecord {
    pub fn new(status: AgentStatus, last_active_timestamp: u64) -> Self {
        Self {
            status,
            last_active_timestamp,
        }
    }
}
