//! Team coordination: a team is an agent (`team:<name>`) whose `respond` dispatches either
//! into a registered team service (`event_type == team_service`) or into a pluggable
//! [`Collaboration`] strategy.

pub mod centralized;
pub mod decentralized;
pub mod services;

use async_trait::async_trait;
use fleet_wire::{AgentId, Envelope, EventType};
use serde_json::Value;

use crate::agent::Agent;
use crate::context::AgentContext;
use crate::error::FleetResult;
use crate::state::{AgentState, TeamState};

/// A team's coordination policy: how inbound requests from members (or outsiders) become
/// dispatches to the rest of the team, and what happens on each scheduler tick.
#[async_trait]
pub trait Collaboration: Send + Sync {
    async fn process_message(
        &self,
        team_id: &AgentId,
        members: &[AgentId],
        state: &mut TeamState,
        incoming: &Envelope,
    ) -> FleetResult<Vec<Envelope>>;

    /// Called on every team iterate, independent of whether a message arrived. Used by
    /// time-boxed strategies (e.g. decentralized voting) to poll for a decision or expire
    /// a stale task.
    async fn iterate(
        &self,
        _team_id: &AgentId,
        _members: &[AgentId],
        _state: &mut TeamState,
    ) -> FleetResult<Vec<Envelope>> {
        Ok(Vec::new())
    }
}

/// An in-team auxiliary actor (voting, scratchpad, storage, toolbox) addressed by
/// `team_service` envelopes. Each service owns one slice of [`TeamState::data_stores`],
/// keyed by [`TeamService::name`].
#[async_trait]
pub trait TeamService: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `Ok(Some(replies))` if this service handled the envelope (matched one of
    /// its own action names), `Ok(None)` if it's not this service's concern so the
    /// coordinator should try the next one.
    async fn handle(&self, state: &mut TeamState, incoming: &Envelope) -> FleetResult<Option<Vec<Envelope>>>;
}

/// The team-level agent implementation: wires a [`Collaboration`] strategy and a list of
/// [`TeamService`]s together behind the ordinary [`Agent`] interface, so a team is spawned
/// and hosted exactly like any other agent.
pub struct Team {
    pub team_id: AgentId,
    pub members: Vec<AgentId>,
    collaboration: Box<dyn Collaboration>,
    services: Vec<Box<dyn TeamService>>,
}

impl Team {
    pub fn new(team_id: AgentId, members: Vec<AgentId>, collaboration: Box<dyn Collaboration>) -> Self {
        Self {
            team_id,
            members,
            collaboration,
            services: Vec::new(),
        }
    }

    pub fn with_service(mut self, service: Box<dyn TeamService>) -> Self {
        self.services.push(service);
        self
    }

    pub async fn iterate_tick(&self, state: &mut TeamState) -> FleetResult<Vec<Envelope>> {
        self.collaboration.iterate(&self.team_id, &self.members, state).await
    }

    pub async fn respond_team(&self, state: &mut TeamState, incoming: &Envelope) -> FleetResult<Vec<Envelope>> {
        if matches!(incoming.event_type, EventType::TeamService) {
            for service in &self.services {
                if let Some(replies) = service.handle(state, incoming).await? {
                    return Ok(replies);
                }
            }
            return Ok(Vec::new());
        }
        self.collaboration
            .process_message(&self.team_id, &self.members, state, incoming)
            .await
    }

    /// `Team` is hosted like any other agent, but its coordination data (task queue,
    /// votes, scratchpads, ...) is a [`TeamState`], not the plain [`AgentState`] the
    /// uniform [`Agent`] interface threads through the worker loop. `AgentState::custom`
    /// is the one free-form slot that interface reserves for the hosted implementation,
    /// so a team round-trips its `data_stores` through it rather than losing them between
    /// calls — without this, every `respond`/`tick` would start the team from a blank
    /// collaboration state.
    fn load_team_state(&self, state: &AgentState) -> TeamState {
        let data_stores = match &state.custom {
            Value::Null => Default::default(),
            other => serde_json::from_value(other.clone()).unwrap_or_default(),
        };
        TeamState {
            agent_state: state.clone(),
            data_stores,
        }
    }

    fn save_team_state(&self, state: &mut AgentState, team_state: TeamState) {
        let data_stores_json = serde_json::to_value(&team_state.data_stores).unwrap_or(Value::Null);
        *state = team_state.agent_state;
        state.custom = data_stores_json;
    }
}

#[async_trait]
impl Agent for Team {
    async fn respond(
        &self,
        _context: &mut AgentContext,
        state: &mut AgentState,
        incoming: &Envelope,
        _view: &[Envelope],
    ) -> FleetResult<Vec<Envelope>> {
        let mut team_state = self.load_team_state(state);
        let replies = self.respond_team(&mut team_state, incoming).await?;
        self.save_team_state(state, team_state);
        Ok(replies)
    }

    /// Drives the collaboration strategy's time-boxed polling (spec §4.6.2) once per
    /// worker-loop tick, independent of whether a message just arrived.
    async fn tick(&self, state: &mut AgentState) -> FleetResult<Vec<Envelope>> {
        let mut team_state = self.load_team_state(state);
        let replies = self.iterate_tick(&mut team_state).await?;
        self.save_team_state(state, team_state);
        Ok(replies)
    }

    fn name(&self) -> &str {
        self.team_id.as_str()
    }
}
