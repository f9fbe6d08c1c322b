//! Shared file storage rooted under a per-team temporary directory. Files live only for
//! the lifetime of the owning `Storage` value (and therefore, in practice, the team
//! process); nothing here is meant to outlive a run.

use std::path::PathBuf;

use async_trait::async_trait;
use fleet_wire::{AgentId, Envelope, EventType, Observation};
use serde_json::Value;
use tempfile::TempDir;

use crate::error::FleetResult;
use crate::state::TeamState;
use crate::team::services::single_action;
use crate::team::TeamService;

pub struct Storage {
    _root: TempDir,
    root_path: PathBuf,
}

impl Storage {
    pub fn new() -> std::io::Result<Self> {
        let root = TempDir::new()?;
        let root_path = root.path().to_path_buf();
        Ok(Self { _root: root, root_path })
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        // Reject any path component that would escape the team's storage root.
        if name.contains("..") || name.starts_with('/') {
            return None;
        }
        Some(self.root_path.join(name))
    }
}

#[async_trait]
impl TeamService for Storage {
    fn name(&self) -> &str {
        "storage"
    }

    async fn handle(&self, _state: &mut TeamState, incoming: &Envelope) -> FleetResult<Option<Vec<Envelope>>> {
        let Some(action) = single_action(incoming) else {
            return Ok(None);
        };
        if action.tool_name != "storage" {
            return Ok(None);
        }
        let requester = incoming.source.clone().unwrap_or_else(|| AgentId::new("unknown"));

        let observation = match action.action_name.as_str() {
            "write" => {
                let name = action.parameters.get("name").and_then(Value::as_str).unwrap_or_default();
                let content = action.parameters.get("content").and_then(Value::as_str).unwrap_or_default();
                match self.resolve(name) {
                    Some(path) => match std::fs::write(&path, content) {
                        Ok(()) => Observation::new(serde_json::json!({"written": true}), action.tool_use_id.clone()),
                        Err(e) => Observation::error(e.to_string(), action.tool_use_id.clone()),
                    },
                    None => Observation::error("invalid file name", action.tool_use_id.clone()),
                }
            }
            "read" => {
                let name = action.parameters.get("name").and_then(Value::as_str).unwrap_or_default();
                match self.resolve(name) {
                    Some(path) => match std::fs::read_to_string(&path) {
                        Ok(content) => Observation::new(serde_json::json!({"content": content}), action.tool_use_id.clone()),
                        Err(e) => Observation::error(e.to_string(), action.tool_use_id.clone()),
                    },
                    None => Observation::error("invalid file name", action.tool_use_id.clone()),
                }
            }
            "delete" => {
                let name = action.parameters.get("name").and_then(Value::as_str).unwrap_or_default();
                match self.resolve(name) {
                    Some(path) => match std::fs::remove_file(&path) {
                        Ok(()) => Observation::new(serde_json::json!({"deleted": true}), action.tool_use_id.clone()),
                        Err(e) => Observation::error(e.to_string(), action.tool_use_id.clone()),
                    },
                    None => Observation::error("invalid file name", action.tool_use_id.clone()),
                }
            }
            "list" => {
                let names: Vec<String> = std::fs::read_dir(&self.root_path)
                    .map(|entries| {
                        entries
                            .filter_map(|e| e.ok())
                            .filter_map(|e| e.file_name().into_string().ok())
                            .collect()
                    })
                    .unwrap_or_default();
                Observation::new(serde_json::json!({"files": names}), action.tool_use_id.clone())
            }
            _ => return Ok(None),
        };

        Ok(Some(vec![Envelope::new(EventType::TeamService)
            .with_destination(requester)
            .with_observations(vec![observation])]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(name: &str, params: Value) -> fleet_wire::Action {
        fleet_wire::Action::new("storage", name, params, "t1")
    }

    #[tokio::test]
    async fn write_read_list_delete_round_trip() {
        let storage = Storage::new().unwrap();
        let mut state = TeamState::default();

        storage
            .handle(
                &mut state,
                &Envelope::new(EventType::TeamService)
                    .with_source("alice")
                    .with_actions(vec![action("write", serde_json::json!({"name": "notes.txt", "content": "hi"}))]),
            )
            .await
            .unwrap();

        let read = storage
            .handle(
                &mut state,
                &Envelope::new(EventType::TeamService)
                    .with_source("alice")
                    .with_actions(vec![action("read", serde_json::json!({"name": "notes.txt"}))]),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read[0].observations[0].data.get("content").and_then(Value::as_str), Some("hi"));

        let listed = storage
            .handle(
                &mut state,
                &Envelope::new(EventType::TeamService).with_source("alice").with_actions(vec![action("list", Value::Null)]),
            )
            .await
            .unwrap()
            .unwrap();
        let files = listed[0].observations[0].data.get("files").and_then(Value::as_array).unwrap();
        assert_eq!(files.len(), 1);

        storage
            .handle(
                &mut state,
                &Envelope::new(EventType::TeamService)
                    .with_source("alice")
                    .with_actions(vec![action("delete", serde_json::json!({"name": "notes.txt"}))]),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let storage = Storage::new().unwrap();
        let mut state = TeamState::default();
        let replies = storage
            .handle(
                &mut state,
                &Envelope::new(EventType::TeamService)
                    .with_source("alice")
                    .with_actions(vec![action("write", serde_json::json!({"name": "../escape.txt", "content": "x"}))]),
            )
            .await
            .unwrap()
            .unwrap();
        assert!(replies[0].observations[0].data.get("error").is_some());
    }
}
