//! Workspace configuration: TOML description of which agent classes to instantiate, how
//! teams are wired together, channel membership, and the stop condition that ends a run.
//!
//! Follows the same two-layer shape as the teacher's `Config::from_file`: raw `*ConfigFile`
//! structs mirror the TOML exactly and carry no invariants, then `to_workspace_config`
//! converts and validates them into the runtime-facing types the rest of the crate uses.
//! A team with zero members, a centralized team missing (or misnaming) its coordinator, or
//! an unrecognized service name all fail conversion with a [`ConfigConversionError`] rather
//! than panicking deep inside the runner.

use std::fs;
use std::path::Path;

use fleet_wire::AgentId;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::error::{FleetError, FleetResult};
use crate::team::services::voting::DecisionStrategy;

const KNOWN_SERVICES: &[&str] = &["voting", "scratchpad", "storage", "toolbox"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigConversionError {
    #[error("team '{team}' has no members")]
    EmptyTeam { team: String },

    #[error("team '{team}' collaboration '{collaboration}' is missing required field '{field}'")]
    MissingField {
        team: String,
        collaboration: &'static str,
        field: &'static str,
    },

    #[error("team '{team}' coordinator '{coordinator}' is not one of its own members")]
    CoordinatorNotAMember { team: String, coordinator: String },

    #[error("team '{team}' names unknown service '{service}'")]
    UnknownService { team: String, service: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationKind {
    Centralized,
    Decentralized,
}

/// Raw deserialization target for a workspace's `config.toml`. No validation happens here;
/// that's `to_workspace_config`'s job, same division of labor as the teacher's `Config`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkspaceConfigFile {
    #[serde(default)]
    pub agents: Vec<AgentConfigFile>,
    #[serde(default)]
    pub teams: Vec<TeamConfigFile>,
    #[serde(default)]
    pub channels: Vec<ChannelConfigFile>,
    #[serde(default)]
    pub stop_condition: Option<StopConditionConfigFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfigFile {
    pub instance_name: String,
    pub class: String,
    #[serde(default)]
    pub init_args: Value,
    #[serde(default)]
    pub initial_state: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamConfigFile {
    pub name: String,
    pub members: Vec<String>,
    pub collaboration: CollaborationKind,
    #[serde(default)]
    pub coordinator: Option<String>,
    #[serde(default)]
    pub decision_strategy: Option<DecisionStrategy>,
    #[serde(default)]
    pub time_limit_seconds: Option<u64>,
    #[serde(default)]
    pub initiative_takers: Option<Vec<String>>,
    #[serde(default)]
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfigFile {
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StopConditionConfigFile {
    #[serde(default)]
    pub no_activity_seconds: Option<u64>,
    #[serde(default)]
    pub message_match: Option<MessageMatchConfigFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageMatchConfigFile {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
}

impl WorkspaceConfigFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> FleetResult<Self> {
        let raw = fs::read_to_string(path).map_err(FleetError::Io)?;
        Ok(toml::from_str(&raw)?)
    }
}

/// A single agent to instantiate, as the runner sees it: `class` is looked up in the
/// shared [`crate::registry::AgentRegistry`], `instance_name` becomes the agent's
/// [`AgentId`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub instance_name: String,
    pub class: String,
    pub init_args: Value,
    pub initial_state: Option<Value>,
}

impl From<&AgentConfigFile> for AgentConfig {
    fn from(file: &AgentConfigFile) -> Self {
        Self {
            instance_name: file.instance_name.clone(),
            class: file.class.clone(),
            init_args: file.init_args.clone(),
            initial_state: file.initial_state.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CollaborationConfig {
    Centralized {
        coordinator: AgentId,
    },
    Decentralized {
        decision_strategy: DecisionStrategy,
        time_limit_seconds: u64,
        initiative_takers: Option<Vec<AgentId>>,
    },
}

#[derive(Debug, Clone)]
pub struct TeamConfig {
    pub team_id: AgentId,
    pub members: Vec<AgentId>,
    pub collaboration: CollaborationConfig,
    pub services: Vec<String>,
}

impl TeamConfigFile {
    fn to_team_config(&self) -> Result<TeamConfig, ConfigConversionError> {
        if self.members.is_empty() {
            return Err(ConfigConversionError::EmptyTeam { team: self.name.clone() });
        }
        let members: Vec<AgentId> = self.members.iter().map(AgentId::new).collect();

        let collaboration = match self.collaboration {
            CollaborationKind::Centralized => {
                let coordinator = self.coordinator.clone().ok_or_else(|| ConfigConversionError::MissingField {
                    team: self.name.clone(),
                    collaboration: "centralized",
                    field: "coordinator",
                })?;
                let coordinator = AgentId::new(coordinator);
                if !members.contains(&coordinator) {
                    return Err(ConfigConversionError::CoordinatorNotAMember {
                        team: self.name.clone(),
                        coordinator: coordinator.as_str().to_string(),
                    });
                }
                CollaborationConfig::Centralized { coordinator }
            }
            CollaborationKind::Decentralized => CollaborationConfig::Decentralized {
                decision_strategy: self.decision_strategy.unwrap_or(DecisionStrategy::MajorityVote),
                time_limit_seconds: self.time_limit_seconds.unwrap_or(60),
                initiative_takers: self
                    .initiative_takers
                    .as_ref()
                    .map(|takers| takers.iter().map(AgentId::new).collect()),
            },
        };

        for service in &self.services {
            if !KNOWN_SERVICES.contains(&service.as_str()) {
                return Err(ConfigConversionError::UnknownService {
                    team: self.name.clone(),
                    service: service.clone(),
                });
            }
        }

        Ok(TeamConfig {
            team_id: AgentId::team(&self.name),
            members,
            collaboration,
            services: self.services.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub name: String,
    pub members: Vec<AgentId>,
}

impl From<&ChannelConfigFile> for ChannelConfig {
    fn from(file: &ChannelConfigFile) -> Self {
        Self {
            name: file.name.clone(),
            members: file.members.iter().map(AgentId::new).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageMatchConfig {
    pub source: Option<AgentId>,
    pub destination: Option<AgentId>,
    pub channel: Option<String>,
}

impl From<&MessageMatchConfigFile> for MessageMatchConfig {
    fn from(file: &MessageMatchConfigFile) -> Self {
        Self {
            source: file.source.clone().map(AgentId::new),
            destination: file.destination.clone().map(AgentId::new),
            channel: file.channel.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StopCondition {
    pub no_activity_seconds: Option<u64>,
    pub message_match: Option<MessageMatchConfig>,
}

impl From<&StopConditionConfigFile> for StopCondition {
    fn from(file: &StopConditionConfigFile) -> Self {
        Self {
            no_activity_seconds: file.no_activity_seconds,
            message_match: file.message_match.as_ref().map(MessageMatchConfig::from),
        }
    }
}

/// The validated, runtime-facing counterpart of [`WorkspaceConfigFile`].
#[derive(Debug, Clone, Default)]
pub struct WorkspaceConfig {
    pub agents: Vec<AgentConfig>,
    pub teams: Vec<TeamConfig>,
    pub channels: Vec<ChannelConfig>,
    pub stop_condition: StopCondition,
}

impl WorkspaceConfigFile {
    pub fn to_workspace_config(&self) -> Result<WorkspaceConfig, ConfigConversionError> {
        let teams = self.teams.iter().map(TeamConfigFile::to_team_config).collect::<Result<Vec<_>, _>>()?;
        Ok(WorkspaceConfig {
            agents: self.agents.iter().map(AgentConfig::from).collect(),
            teams,
            channels: self.channels.iter().map(ChannelConfig::from).collect(),
            stop_condition: self.stop_condition.as_ref().map(StopCondition::from).unwrap_or_default(),
        })
    }
}

impl WorkspaceConfig {
    /// Reads and validates a workspace's `config.toml` in one step.
    pub fn load<P: AsRef<Path>>(path: P) -> FleetResult<Self> {
        let file = WorkspaceConfigFile::from_file(path)?;
        file.to_workspace_config().map_err(|e| FleetError::configuration(e.to_string()))
    }
}
