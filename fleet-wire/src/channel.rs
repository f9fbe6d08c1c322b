use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ids::AgentId;

/// A named membership set used for multicast delivery. A channel carries no history of its
/// own; messages sent on it simply fan out to whoever is a member at delivery time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    #[serde(default)]
    pub members: HashSet<AgentId>,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: HashSet::new(),
        }
    }

    pub fn with_members(name: impl Into<String>, members: impl IntoIterator<Item = AgentId>) -> Self {
        Self {
            name: name.into(),
            members: members.into_iter().collect(),
        }
    }

    pub fn add_member(&mut self, agent_id: AgentId) -> bool {
        self.members.insert(agent_id)
    }

    pub fn remove_member(&mut self, agent_id: &AgentId) -> bool {
        self.members.remove(agent_id)
    }

    pub fn contains(&self, agent_id: &AgentId) -> bool {
        self.members.contains(agent_id)
    }
}
