//! Centralized collaboration: a single designated coordinator agent serves one task at a
//! time; everyone else's requests are queued and forwarded in arrival order, with the
//! original requester hidden from the coordinator (replies are rewritten to come from the
//! team, not relayed raw).

use async_trait::async_trait;
use fleet_wire::{AgentId, Envelope, EventType};
use serde::{Deserialize, Serialize};

use crate::error::FleetResult;
use crate::state::TeamState;
use crate::team::Collaboration;

const STORE_KEY: &str = "centralized_collaboration";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TaskInfo {
    envelope: Envelope,
    requester: AgentId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CentralizedData {
    current_task: Option<TaskInfo>,
    queue: Vec<TaskInfo>,
}

fn load(state: &TeamState) -> CentralizedData {
    state
        .store_ref(STORE_KEY)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

fn save(state: &mut TeamState, data: &CentralizedData) {
    *state.store(STORE_KEY) = serde_json::to_value(data).expect("CentralizedData always serializes");
}

/// Requires `coordinator` to be one of the team's members; that is not re-checked here
/// since [`crate::config`] validates it at workspace-load time.
pub struct CentralizedCollaboration {
    pub coordinator: AgentId,
}

impl CentralizedCollaboration {
    pub fn new(coordinator: AgentId) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl Collaboration for CentralizedCollaboration {
    async fn process_message(
        &self,
        team_id: &AgentId,
        _members: &[AgentId],
        state: &mut TeamState,
        incoming: &Envelope,
    ) -> FleetResult<Vec<Envelope>> {
        let mut data = load(state);
        let mut outbound = Vec::new();

        if incoming.source.as_ref() == Some(&self.coordinator) {
            let Some(finished) = data.current_task.take() else {
                return Ok(Vec::new());
            };
            outbound.push(
                incoming
                    .clone()
                    .with_source(team_id.clone())
                    .with_destination(finished.requester),
            );

            if !data.queue.is_empty() {
                let next = data.queue.remove(0);
                outbound.push(
                    next.envelope
                        .clone()
                        .with_source(team_id.clone())
                        .with_destination(self.coordinator.clone()),
                );
                data.current_task = Some(next);
            }
        } else if data.current_task.is_none() {
            data.current_task = Some(TaskInfo {
                envelope: incoming.clone(),
                requester: incoming.source.clone().unwrap_or_else(|| AgentId::new("unknown")),
            });
            outbound.push(
                incoming
                    .clone()
                    .with_source(team_id.clone())
                    .with_destination(self.coordinator.clone()),
            );
        } else {
            let position = data.queue.len() + 1;
            let requester = incoming.source.clone().unwrap_or_else(|| AgentId::new("unknown"));
            data.queue.push(TaskInfo {
                envelope: incoming.clone(),
                requester: requester.clone(),
            });
            outbound.push(
                Envelope::new(EventType::Notification)
                    .with_source(team_id.clone())
                    .with_destination(requester)
                    .with_content(format!("queued, position={position}")),
            );
        }

        save(state, &data);
        Ok(outbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(source: &str, content: &str) -> Envelope {
        Envelope::message(content).with_source(source)
    }

    #[tokio::test]
    async fn first_request_is_forwarded_to_coordinator() {
        let collab = CentralizedCollaboration::new(AgentId::new("coordinator"));
        let mut state = TeamState::default();
        let replies = collab
            .process_message(&AgentId::team("eng"), &[], &mut state, &msg("alice", "do x"))
            .await
            .unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].destination.as_ref().unwrap().as_str(), "coordinator");
    }

    #[tokio::test]
    async fn second_request_while_busy_is_queued() {
        let collab = CentralizedCollaboration::new(AgentId::new("coordinator"));
        let mut state = TeamState::default();
        collab
            .process_message(&AgentId::team("eng"), &[], &mut state, &msg("alice", "do x"))
            .await
            .unwrap();
        let replies = collab
            .process_message(&AgentId::team("eng"), &[], &mut state, &msg("bob", "do y"))
            .await
            .unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].destination.as_ref().unwrap().as_str(), "bob");
        assert!(replies[0].content.as_ref().unwrap().contains("position=1"));
    }

    #[tokio::test]
    async fn coordinator_reply_forwards_to_requester_and_dequeues_next() {
        let collab = CentralizedCollaboration::new(AgentId::new("coordinator"));
        let mut state = TeamState::default();
        collab
            .process_message(&AgentId::team("eng"), &[], &mut state, &msg("alice", "do x"))
            .await
            .unwrap();
        collab
            .process_message(&AgentId::team("eng"), &[], &mut state, &msg("bob", "do y"))
            .await
            .unwrap();

        let replies = collab
            .process_message(
                &AgentId::team("eng"),
                &[],
                &mut state,
                &msg("coordinator", "x is done"),
            )
            .await
            .unwrap();

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].destination.as_ref().unwrap().as_str(), "alice");
        assert_eq!(replies[1].destination.as_ref().unwrap().as_str(), "coordinator");

        let data = load(&state);
        assert!(data.current_task.is_some());
        assert!(data.queue.is_empty());
    }

    #[tokio::test]
    async fn coordinator_reply_forwards_actions_and_structured_content_untouched() {
        let collab = CentralizedCollaboration::new(AgentId::new("coordinator"));
        let mut state = TeamState::default();
        collab
            .process_message(&AgentId::team("eng"), &[], &mut state, &msg("alice", "do x"))
            .await
            .unwrap();

        let mut reply = Envelope::message("x is done")
            .with_source("coordinator")
            .with_observations(vec![fleet_wire::Observation::new(serde_json::json!({"result": 1}), "t1")]);
        reply.structured_content = Some(serde_json::json!({"status": "ok"}));
        let replies = collab.process_message(&AgentId::team("eng"), &[], &mut state, &reply).await.unwrap();

        assert_eq!(replies[0].destination.as_ref().unwrap().as_str(), "alice");
        assert_eq!(replies[0].source.as_ref().unwrap().as_str(), "eng");
        assert_eq!(replies[0].observations.len(), 1);
        assert_eq!(replies[0].structured_content, Some(serde_json::json!({"status": "ok"})));
    }

    #[tokio::test]
    async fn at_most_one_task_is_ever_in_flight() {
        let collab = CentralizedCollaboration::new(AgentId::new("coordinator"));
        let mut state = TeamState::default();
        for agent in ["alice", "bob", "carol"] {
            collab
                .process_message(&AgentId::team("eng"), &[], &mut state, &msg(agent, "work"))
                .await
                .unwrap();
        }
        let data = load(&state);
        assert!(data.current_task.is_some());
        assert_eq!(data.queue.len(), 2);
    }
}
