//! A shared, line-addressable scratchpad: named documents that team members can append to
//! or edit a range of lines within.

use std::collections::HashMap;

use async_trait::async_trait;
use fleet_wire::{AgentId, Envelope, EventType, Observation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FleetResult;
use crate::state::TeamState;
use crate::team::services::{now, single_action};
use crate::team::TeamService;

const STORE_KEY: &str = "scratchpad";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Line {
    content: String,
    last_modified_by: AgentId,
    timestamp: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ScratchpadData {
    documents: HashMap<String, Vec<Line>>,
}

fn load(state: &TeamState) -> ScratchpadData {
    state
        .store_ref(STORE_KEY)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

fn save(state: &mut TeamState, data: &ScratchpadData) {
    *state.store(STORE_KEY) = serde_json::to_value(data).expect("ScratchpadData always serializes");
}

#[derive(Default)]
pub struct Scratchpad;

impl Scratchpad {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TeamService for Scratchpad {
    fn name(&self) -> &str {
        "scratchpad"
    }

    async fn handle(&self, state: &mut TeamState, incoming: &Envelope) -> FleetResult<Option<Vec<Envelope>>> {
        let Some(action) = single_action(incoming) else {
            return Ok(None);
        };
        if action.tool_name != "scratchpad" {
            return Ok(None);
        }
        let editor = incoming.source.clone().unwrap_or_else(|| AgentId::new("unknown"));
        let mut data = load(state);

        let observation = match action.action_name.as_str() {
            "write" => {
                let doc_id = action.parameters.get("id").and_then(Value::as_str).unwrap_or("default").to_string();
                let content = action.parameters.get("content").and_then(Value::as_str).unwrap_or_default();
                let lines = data.documents.entry(doc_id).or_default();
                for line in content.lines() {
                    lines.push(Line {
                        content: line.to_string(),
                        last_modified_by: editor.clone(),
                        timestamp: now(),
                    });
                }
                Observation::new(serde_json::json!({"line_count": lines.len()}), action.tool_use_id.clone())
            }
            "edit_lines" => {
                let doc_id = action.parameters.get("id").and_then(Value::as_str).unwrap_or("default");
                let start = action.parameters.get("start").and_then(Value::as_u64).unwrap_or(0) as usize;
                let end = action.parameters.get("end").and_then(Value::as_u64).unwrap_or(0) as usize;
                let new_content = action.parameters.get("new_content").and_then(Value::as_str).unwrap_or_default();
                match data.documents.get_mut(doc_id) {
                    Some(lines) if start < lines.len() && end < lines.len() && start <= end => {
                        let replacement: Vec<Line> = new_content
                            .lines()
                            .map(|l| Line {
                                content: l.to_string(),
                                last_modified_by: editor.clone(),
                                timestamp: now(),
                            })
                            .collect();
                        lines.splice(start..=end, replacement);
                        Observation::new(serde_json::json!({"line_count": lines.len()}), action.tool_use_id.clone())
                    }
                    _ => Observation::error(format!("invalid line range [{start}, {end}] for '{doc_id}'"), action.tool_use_id.clone()),
                }
            }
            "read" => {
                let doc_id = action.parameters.get("id").and_then(Value::as_str).unwrap_or("default");
                let content = data
                    .documents
                    .get(doc_id)
                    .map(|lines| lines.iter().map(|l| l.content.clone()).collect::<Vec<_>>().join("\n"))
                    .unwrap_or_default();
                Observation::new(serde_json::json!({"content": content}), action.tool_use_id.clone())
            }
            _ => return Ok(None),
        };

        save(state, &data);
        Ok(Some(vec![Envelope::new(EventType::TeamService)
            .with_destination(editor)
            .with_observations(vec![observation])]))
    }
}
