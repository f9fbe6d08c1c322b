use std::collections::HashMap;

use fleet_wire::AgentId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::view::{GlobalMessageViewSelector, MessageViewSelector};

/// Correlates a later, unsolicited async observation back to the action that triggered it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncExecutionRecord {
    pub original_source: AgentId,
    pub original_channel: Option<String>,
    pub tool_use_id: String,
}

/// Information about the team an agent belongs to, broadcast once at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamInfo {
    pub team_id: AgentId,
    pub member_ids: Vec<AgentId>,
}

/// Per-agent configuration and collaborators threaded through `respond`. Unlike
/// [`crate::state::AgentState`], the context is not expected to change across iterations
/// (aside from the async execution cache, which is explicitly a scratch area).
pub struct AgentContext {
    pub agent_id: AgentId,
    pub team_info: Option<TeamInfo>,
    pub instruction: Option<String>,
    pub tools: Vec<String>,
    pub resources: HashMap<String, Value>,
    pub view_selector: Box<dyn MessageViewSelector>,
    async_execution_cache: HashMap<String, AsyncExecutionRecord>,
}

impl AgentContext {
    pub fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            team_info: None,
            instruction: None,
            tools: Vec::new(),
            resources: HashMap::new(),
            view_selector: Box::new(GlobalMessageViewSelector::default()),
            async_execution_cache: HashMap::new(),
        }
    }

    pub fn with_team_info(mut self, team_info: TeamInfo) -> Self {
        self.team_info = Some(team_info);
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn with_view_selector(mut self, selector: Box<dyn MessageViewSelector>) -> Self {
        self.view_selector = selector;
        self
    }

    pub fn record_async_execution(&mut self, async_execution_id: impl Into<String>, record: AsyncExecutionRecord) {
        self.async_execution_cache.insert(async_execution_id.into(), record);
    }

    /// Removes and returns the record for `async_execution_id`, if any. Consuming a
    /// record is always a removal: once the matching observation has been folded back
    /// into the agent's view, the correlation entry has served its purpose.
    pub fn take_async_execution(&mut self, async_execution_id: &str) -> Option<AsyncExecutionRecord> {
        self.async_execution_cache.remove(async_execution_id)
    }

    pub fn pending_async_executions(&self) -> usize {
        self.async_execution_cache.len()
    }
}
