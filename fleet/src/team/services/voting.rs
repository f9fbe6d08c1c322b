//! The voting team service: agents propose options and cast votes; [`get_decision`]
//! implements the three decision strategies exactly as the upstream proposal/vote model
//! defines them.

use std::collections::HashMap;

use async_trait::async_trait;
use fleet_wire::{AgentId, Envelope, EventType, Observation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FleetResult;
use crate::state::TeamState;
use crate::team::services::{now, single_action};
use crate::team::TeamService;

const STORE_KEY: &str = "voting";

/// Mirrors the upstream `DecisionMakingStrategy` enum; `None` means the team never
/// resolves a decision through voting (the decentralized collaboration strategy would
/// then need a different mechanism, out of scope here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStrategy {
    None,
    FirstComeFirstServe,
    MajorityVote,
    PluralityVote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ProposalStatus {
    Active,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub content: String,
    pub reasoning: Option<String>,
    pub proposer: AgentId,
    pub created_at: u64,
    pub expires_at: u64,
    status: ProposalStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct VotingData {
    proposals: HashMap<String, Proposal>,
    /// proposal_id -> (voter -> in_favor)
    votes: HashMap<String, HashMap<AgentId, bool>>,
}

fn load(state: &TeamState) -> VotingData {
    state
        .store_ref(STORE_KEY)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

fn save(state: &mut TeamState, data: &VotingData) {
    *state.store(STORE_KEY) = serde_json::to_value(data).expect("VotingData always serializes");
}

fn expire_stale(data: &mut VotingData) {
    let t = now();
    for proposal in data.proposals.values_mut() {
        if proposal.status == ProposalStatus::Active && proposal.expires_at <= t {
            proposal.status = ProposalStatus::Expired;
        }
    }
}

pub struct TeamVoting {
    pub strategy: DecisionStrategy,
    pub proposal_ttl_seconds: u64,
    pub team_size: usize,
}

impl TeamVoting {
    pub fn new(strategy: DecisionStrategy, team_size: usize) -> Self {
        Self {
            strategy,
            proposal_ttl_seconds: 300,
            team_size,
        }
    }

    fn create_proposal(&self, data: &mut VotingData, proposer: AgentId, content: String, reasoning: Option<String>) -> Proposal {
        let id = uuid::Uuid::new_v4().to_string();
        let t = now();
        let proposal = Proposal {
            id: id.clone(),
            content,
            reasoning,
            proposer: proposer.clone(),
            created_at: t,
            expires_at: t + self.proposal_ttl_seconds,
            status: ProposalStatus::Active,
        };

        let is_first_under_fcfs = self.strategy == DecisionStrategy::FirstComeFirstServe && data.proposals.is_empty();
        let auto_vote = !matches!(self.strategy, DecisionStrategy::FirstComeFirstServe) || is_first_under_fcfs;

        data.proposals.insert(id.clone(), proposal.clone());
        if auto_vote {
            data.votes.entry(id.clone()).or_default().insert(proposer, true);
        }
        proposal
    }

    /// A voter has at most one standing vote across all active proposals under the
    /// majority/plurality strategies; casting a new one clears every prior vote by that
    /// voter first. First-come-first-serve disallows explicit voting entirely — its only
    /// vote is the automatic one recorded when the first proposal was created.
    fn cast_vote(&self, data: &mut VotingData, proposal_id: &str, voter: AgentId, in_favor: bool) -> Result<(), String> {
        if self.strategy == DecisionStrategy::FirstComeFirstServe {
            return Err("voting is not accepted under first-come-first-serve".to_string());
        }
        let Some(proposal) = data.proposals.get(proposal_id) else {
            return Err(format!("no such proposal '{proposal_id}'"));
        };
        if proposal.status != ProposalStatus::Active {
            return Err(format!("proposal '{proposal_id}' is not active"));
        }

        for votes in data.votes.values_mut() {
            votes.remove(&voter);
        }
        data.votes.entry(proposal_id.to_string()).or_default().insert(voter, in_favor);
        Ok(())
    }

    fn vote_counts(&self, data: &VotingData) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = data
            .proposals
            .values()
            .filter(|p| p.status == ProposalStatus::Active)
            .map(|p| {
                let in_favor = data
                    .votes
                    .get(&p.id)
                    .map(|v| v.values().filter(|&&ok| ok).count())
                    .unwrap_or(0);
                (p.id.clone(), in_favor)
            })
            .collect();
        counts.sort_by(|a, b| {
            b.1.cmp(&a.1).then_with(|| {
                let ca = data.proposals.get(&a.0).map(|p| p.created_at).unwrap_or(0);
                let cb = data.proposals.get(&b.0).map(|p| p.created_at).unwrap_or(0);
                ca.cmp(&cb)
            })
        });
        counts
    }

    /// Resolves a winning proposal, if the current vote state is conclusive under this
    /// team's strategy.
    pub fn decide(&self, state: &TeamState) -> Option<Proposal> {
        let mut data = load(state);
        expire_stale(&mut data);

        match self.strategy {
            DecisionStrategy::None => None,
            DecisionStrategy::FirstComeFirstServe => {
                let mut active: Vec<&Proposal> = data.proposals.values().filter(|p| p.status == ProposalStatus::Active).collect();
                active.sort_by_key(|p| p.created_at);
                active.first().map(|p| (*p).clone())
            }
            DecisionStrategy::MajorityVote => {
                let threshold = self.team_size / 2;
                data.proposals
                    .values()
                    .filter(|p| p.status == ProposalStatus::Active)
                    .find(|p| {
                        let in_favor = data
                            .votes
                            .get(&p.id)
                            .map(|v| v.values().filter(|&&ok| ok).count())
                            .unwrap_or(0);
                        in_favor > threshold
                    })
                    .cloned()
            }
            DecisionStrategy::PluralityVote => {
                let counts = self.vote_counts(&data);
                let cast_votes: usize = data.votes.values().map(|v| v.len()).sum();
                let remaining_votes = self.team_size.saturating_sub(cast_votes);

                match counts.as_slice() {
                    [] => None,
                    // A single active proposal has no runner-up to be overtaken by, so it
                    // wins outright regardless of remaining votes.
                    [only] => data.proposals.get(&only.0).cloned(),
                    [leader, runner_up, ..] => {
                        let lead = leader.1.saturating_sub(runner_up.1);
                        if remaining_votes == 0 || lead > remaining_votes {
                            data.proposals.get(&leader.0).cloned()
                        } else {
                            None
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl TeamService for TeamVoting {
    fn name(&self) -> &str {
        "voting"
    }

    async fn handle(&self, state: &mut TeamState, incoming: &Envelope) -> FleetResult<Option<Vec<Envelope>>> {
        let Some(action) = single_action(incoming) else {
            return Ok(None);
        };
        if action.tool_name != "team_voting" {
            return Ok(None);
        }
        let source = incoming.source.clone().unwrap_or_else(|| AgentId::new("unknown"));
        let mut data = load(state);
        expire_stale(&mut data);

        let observation = match action.action_name.as_str() {
            "propose" => {
                let content = action.parameters.get("content").and_then(Value::as_str).unwrap_or_default().to_string();
                let reasoning = action.parameters.get("reasoning").and_then(Value::as_str).map(str::to_string);
                let proposal = self.create_proposal(&mut data, source, content, reasoning);
                Observation::new(serde_json::to_value(&proposal)?, action.tool_use_id.clone())
            }
            "vote" => {
                let proposal_id = action.parameters.get("proposal_id").and_then(Value::as_str).unwrap_or_default();
                let in_favor = action.parameters.get("in_favor").and_then(Value::as_bool).unwrap_or(true);
                match self.cast_vote(&mut data, proposal_id, source, in_favor) {
                    Ok(()) => Observation::new(serde_json::json!({"accepted": true}), action.tool_use_id.clone()),
                    Err(reason) => Observation::error(reason, action.tool_use_id.clone()),
                }
            }
            "get_proposal" => {
                let proposal_id = action.parameters.get("proposal_id").and_then(Value::as_str).unwrap_or_default();
                let value = data
                    .proposals
                    .get(proposal_id)
                    .map(|p| serde_json::to_value(p).unwrap_or(Value::Null))
                    .unwrap_or(Value::Null);
                Observation::new(value, action.tool_use_id.clone())
            }
            "list_active_proposals" => {
                let active: Vec<&Proposal> = data.proposals.values().filter(|p| p.status == ProposalStatus::Active).collect();
                Observation::new(serde_json::to_value(active)?, action.tool_use_id.clone())
            }
            _ => return Ok(None),
        };

        save(state, &data);

        Ok(Some(vec![Envelope::new(EventType::TeamService)
            .with_destination(incoming.source.clone().unwrap_or_else(|| AgentId::new("unknown")))
            .with_observations(vec![observation])]))
    }
}
