//! The toolbox service: forwards `team_service` calls to tools registered in team scope
//! (as opposed to per-agent tools, which are invoked directly by agent implementations).
//! Tools register the same way agent classes do — an explicit name-to-callable table, no
//! reflection — matching the redesign in `SPEC_FULL.md` §9.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fleet_wire::{AgentId, Envelope, EventType, Observation};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::FleetResult;
use crate::state::TeamState;
use crate::team::services::single_action;
use crate::team::TeamService;

/// A team-scoped tool implementation: takes the action parameters, returns the
/// observation payload (or an error string surfaced as `{"error": ...}`).
pub type ToolFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Toolbox {
    tools: Arc<RwLock<HashMap<String, ToolFn>>>,
}

impl Toolbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, action_name: impl Into<String>, tool: ToolFn) {
        self.tools.write().await.insert(action_name.into(), tool);
    }
}

#[async_trait]
impl TeamService for Toolbox {
    fn name(&self) -> &str {
        "toolbox"
    }

    async fn handle(&self, _state: &mut TeamState, incoming: &Envelope) -> FleetResult<Option<Vec<Envelope>>> {
        let Some(action) = single_action(incoming) else {
            return Ok(None);
        };
        if action.tool_name != "toolbox" {
            return Ok(None);
        }
        let requester = incoming.source.clone().unwrap_or_else(|| AgentId::new("unknown"));

        let tools = self.tools.read().await;
        let Some(tool) = tools.get(&action.action_name) else {
            return Ok(Some(vec![Envelope::new(EventType::TeamService)
                .with_destination(requester)
                .with_observations(vec![Observation::error(
                    format!("no such team tool '{}'", action.action_name),
                    action.tool_use_id.clone(),
                )])]));
        };

        let observation = match tool(action.parameters.clone()) {
            Ok(data) => match &action.async_execution_id {
                Some(async_id) => Observation::async_result(data, action.tool_use_id.clone(), async_id.clone()),
                None => Observation::new(data, action.tool_use_id.clone()),
            },
            Err(reason) => Observation::error(reason, action.tool_use_id.clone()),
        };

        Ok(Some(vec![Envelope::new(EventType::TeamService)
            .with_destination(requester)
            .with_observations(vec![observation])]))
    }
}
