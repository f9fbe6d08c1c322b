//! Decentralized collaboration: the team has no single coordinator. Instead, an inbound
//! request becomes a task broadcast to every member (or a configured subset of "initiative
//! takers"), and the attached voting service is polled on every iterate until either a
//! decision is reached or the task's time limit elapses.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use fleet_wire::{AgentId, Envelope, EventType};
use serde::{Deserialize, Serialize};

use crate::error::FleetResult;
use crate::state::TeamState;
use crate::team::services::voting::{DecisionStrategy, TeamVoting};
use crate::team::Collaboration;

const STORE_KEY: &str = "decentralized_collaboration";

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueuedTask {
    envelope: Envelope,
    requester: AgentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CurrentTask {
    envelope: Envelope,
    requester: AgentId,
    started_at: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DecentralizedData {
    current_task: Option<CurrentTask>,
    last_check_time: u64,
    queue: Vec<QueuedTask>,
}

fn load(state: &TeamState) -> DecentralizedData {
    state
        .store_ref(STORE_KEY)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

fn save(state: &mut TeamState, data: &DecentralizedData) {
    *state.store(STORE_KEY) = serde_json::to_value(data).expect("DecentralizedData always serializes");
}

/// Coordinates a team with no single coordinator: a task is broadcast to every member (or
/// the configured `initiative_takers`), and `iterate` polls the voting service until it
/// resolves a decision or the per-task `time_limit` expires.
pub struct DecentralizedCollaboration {
    pub time_limit_seconds: u64,
    pub initiative_takers: Option<Vec<AgentId>>,
    voting: TeamVoting,
}

impl DecentralizedCollaboration {
    pub fn new(strategy: DecisionStrategy, team_size: usize, time_limit_seconds: u64) -> Self {
        Self {
            time_limit_seconds,
            initiative_takers: None,
            voting: TeamVoting::new(strategy, team_size),
        }
    }

    pub fn with_initiative_takers(mut self, takers: Vec<AgentId>) -> Self {
        self.initiative_takers = Some(takers);
        self
    }

    fn broadcast_targets<'a>(&'a self, members: &'a [AgentId]) -> &'a [AgentId] {
        self.initiative_takers.as_deref().unwrap_or(members)
    }

    /// Dequeues the next task (if any), making it current and broadcasting it; notifies
    /// the remaining queue of their updated positions.
    fn start_next(&self, team_id: &AgentId, members: &[AgentId], data: &mut DecentralizedData, outbound: &mut Vec<Envelope>) {
        if data.queue.is_empty() {
            return;
        }
        let next = data.queue.remove(0);
        for target in self.broadcast_targets(members) {
            outbound.push(
                next.envelope
                    .clone()
                    .with_source(team_id.clone())
                    .with_destination(target.clone()),
            );
        }
        data.current_task = Some(CurrentTask {
            envelope: next.envelope,
            requester: next.requester,
            started_at: now(),
        });
        for (position, queued) in data.queue.iter().enumerate() {
            outbound.push(
                Envelope::new(EventType::Notification)
                    .with_source(team_id.clone())
                    .with_destination(queued.requester.clone())
                    .with_content(format!("queued, position={}", position + 1)),
            );
        }
    }
}

#[async_trait]
impl Collaboration for DecentralizedCollaboration {
    async fn process_message(
        &self,
        team_id: &AgentId,
        members: &[AgentId],
        state: &mut TeamState,
        incoming: &Envelope,
    ) -> FleetResult<Vec<Envelope>> {
        let mut data = load(state);
        let mut outbound = Vec::new();
        let requester = incoming.source.clone().unwrap_or_else(|| AgentId::new("unknown"));

        if data.current_task.is_none() {
            let t = now();
            for target in self.broadcast_targets(members) {
                outbound.push(
                    incoming
                        .clone()
                        .with_source(team_id.clone())
                        .with_destination(target.clone()),
                );
            }
            data.current_task = Some(CurrentTask {
                envelope: incoming.clone(),
                requester,
                started_at: t,
            });
            data.last_check_time = t;
        } else {
            let position = data.queue.len() + 1;
            data.queue.push(QueuedTask {
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

    async fn iterate(&self, team_id: &AgentId, members: &[AgentId], state: &mut TeamState) -> FleetResult<Vec<Envelope>> {
        let mut data = load(state);
        let Some(current) = data.current_task.clone() else {
            return Ok(Vec::new());
        };

        let mut outbound = Vec::new();
        data.last_check_time = now();

        if now().saturating_sub(current.started_at) >= self.time_limit_seconds {
            outbound.push(
                Envelope::message("no decision within time limit")
                    .with_source(team_id.clone())
                    .with_destination(current.requester.clone()),
            );
            for member in members {
                outbound.push(
                    Envelope::new(EventType::Notification)
                        .with_source(team_id.clone())
                        .with_destination(member.clone())
                        .with_content("collaboration ended"),
                );
            }
            data.current_task = None;
            self.start_next(team_id, members, &mut data, &mut outbound);
            save(state, &data);
            return Ok(outbound);
        }

        if let Some(decision) = self.voting.decide(state) {
            outbound.push(
                Envelope::message(decision.content.clone())
                    .with_source(team_id.clone())
                    .with_destination(current.requester.clone()),
            );
            for member in members {
                outbound.push(
                    Envelope::new(EventType::Notification)
                        .with_source(team_id.clone())
                        .with_destination(member.clone())
                        .with_content(format!("decision reached: {}", decision.content)),
                );
            }
            data.current_task = None;
            self.start_next(team_id, members, &mut data, &mut outbound);
        }

        save(state, &data);
        Ok(outbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::team::services::voting::TeamVoting as Voting;
    use crate::team::TeamService;

    fn members() -> Vec<AgentId> {
        vec![AgentId::new("alice"), AgentId::new("bob"), AgentId::new("carol")]
    }

    #[tokio::test]
    async fn first_request_starts_task_and_broadcasts_to_all_members() {
        let collab = DecentralizedCollaboration::new(DecisionStrategy::MajorityVote, 3, 60);
        let mut state = TeamState::default();
        let replies = collab
            .process_message(&AgentId::team("eng"), &members(), &mut state, &Envelope::message("decide x").with_source("dave"))
            .await
            .unwrap();
        assert_eq!(replies.len(), 3);
    }

    #[tokio::test]
    async fn second_request_while_busy_is_queued() {
        let collab = DecentralizedCollaboration::new(DecisionStrategy::MajorityVote, 3, 60);
        let mut state = TeamState::default();
        collab
            .process_message(&AgentId::team("eng"), &members(), &mut state, &Envelope::message("decide x").with_source("dave"))
            .await
            .unwrap();
        let replies = collab
            .process_message(&AgentId::team("eng"), &members(), &mut state, &Envelope::message("decide y").with_source("erin"))
            .await
            .unwrap();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].content.as_ref().unwrap().contains("position=1"));
    }

    #[tokio::test]
    async fn iterate_resolves_once_voting_reaches_majority() {
        let collab = DecentralizedCollaboration::new(DecisionStrategy::MajorityVote, 3, 60);
        let mut state = TeamState::default();
        collab
            .process_message(&AgentId::team("eng"), &members(), &mut state, &Envelope::message("decide x").with_source("dave"))
            .await
            .unwrap();

        // Not yet decided: nothing cast.
        let replies = collab.iterate(&AgentId::team("eng"), &members(), &mut state).await.unwrap();
        assert!(replies.is_empty());

        let voting = Voting::new(DecisionStrategy::MajorityVote, 3);
        let propose = fleet_wire::Action::new("team_voting", "propose", serde_json::json!({"content": "plan A"}), "t1");
        let handled = voting
            .handle(&mut state, &Envelope::new(EventType::TeamService).with_source("alice").with_actions(vec![propose]))
            .await
            .unwrap()
            .unwrap();
        let proposal_id = handled[0].observations[0].data.get("id").and_then(|v| v.as_str()).unwrap().to_string();
        let vote = fleet_wire::Action::new("team_voting", "vote", serde_json::json!({"proposal_id": proposal_id, "in_favor": true}), "t2");
        voting
            .handle(&mut state, &Envelope::new(EventType::TeamService).with_source("bob").with_actions(vec![vote]))
            .await
            .unwrap();

        let replies = collab.iterate(&AgentId::team("eng"), &members(), &mut state).await.unwrap();
        assert!(replies.iter().any(|e| e.content.as_deref() == Some("plan A")));
        assert!(replies.iter().any(|e| e.content.as_deref().unwrap_or_default().contains("decision reached")));
    }

    #[tokio::test]
    async fn iterate_times_out_and_notifies_members() {
        let collab = DecentralizedCollaboration::new(DecisionStrategy::MajorityVote, 3, 0);
        let mut state = TeamState::default();
        collab
            .process_message(&AgentId::team("eng"), &members(), &mut state, &Envelope::message("decide x").with_source("dave"))
            .await
            .unwrap();

        let replies = collab.iterate(&AgentId::team("eng"), &members(), &mut state).await.unwrap();
        assert!(replies[0].content.as_deref().unwrap().contains("no decision within time limit"));
        assert!(replies.iter().any(|e| e.content.as_deref() == Some("collaboration ended")));
    }
}
