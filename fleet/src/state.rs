use std::collections::HashSet;

use fleet_wire::{Envelope, MessageId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::AgentStatus;

/// Mutable per-agent data threaded through each call to `respond`.
///
/// `processed` guards the passive loop's at-most-once guarantee (invariant 2 of the
/// testable properties): a message id is added to it the moment it is picked up, before
/// `respond` is invoked, so a crash mid-`respond` can at worst cause a message to be
/// skipped on restart, never replayed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    pub processed: HashSet<MessageId>,
    /// Events the agent wants in its own history but never broadcasts, e.g. internal
    /// tool action/observation pairs. Merged with external messages by the view selector.
    pub internal_events: Vec<Envelope>,
    pub status: AgentStatus,
    /// Free-form state owned entirely by the hosted agent implementation.
    #[serde(default)]
    pub custom: Value,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_processed(&mut self, id: MessageId) -> bool {
        self.processed.insert(id)
    }

    pub fn is_processed(&self, id: &MessageId) -> bool {
        self.processed.contains(id)
    }

    pub fn push_internal_event(&mut self, envelope: Envelope) {
        self.internal_events.push(envelope);
    }
}

/// Per-team state: the shared collaboration data store plus one data store per team
/// service, keyed by service name. Kept separate from `AgentState` because a team's
/// "respond" never processes on behalf of a single user-code agent — it always dispatches
/// into the collaboration strategy or a team service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamState {
    pub agent_state: AgentState,
    /// Keyed by service or strategy name, e.g. "collaboration", "voting", "scratchpad".
    #[serde(default)]
    pub data_stores: std::collections::HashMap<String, Value>,
}

impl TeamState {
    pub fn store(&mut self, key: &str) -> &mut Value {
        self.data_stores
            .entry(key.to_string())
            .or_insert(Value::Object(Default::default()))
    }

    pub fn store_ref(&self, key: &str) -> Option<&Value> {
        self.data_stores.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_processed_is_idempotent() {
        let mut state = AgentState::new();
        let id = MessageId::generate();
        assert!(state.mark_processed(id.clone()));
        assert!(!state.mark_processed(id.clone()));
        assert!(state.is_processed(&id));
    }

    #[test]
    fn team_state_store_creates_on_first_access() {
        let mut state = TeamState::default();
        assert!(state.store_ref("voting").is_none());
        *state.store("voting") = serde_json::json!({"proposals": {}});
        assert!(state.store_ref("voting").is_some());
    }
}
