//! Top-level lifecycle: spawns one OS process per configured agent (and one per team,
//! teams being agents like any other), waits for them all to register, watches for crashes
//! and respawns them, evaluates stop conditions, and can snapshot every agent's last-seen
//! state into a checkpoint file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fleet_wire::AgentId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::{CollaborationConfig, StopCondition, WorkspaceConfig};
use crate::error::{FleetError, FleetResult};
use crate::process_host::{WorkerBootstrap, WorkerHandle};
use crate::registry::AgentRegistry;
use crate::router::Router;
use crate::team::centralized::CentralizedCollaboration;
use crate::team::decentralized::DecentralizedCollaboration;
use crate::team::services::{DecisionStrategy, Scratchpad, Storage, TeamVoting, Toolbox};
use crate::team::{Collaboration, Team, TeamService};

const RUN_TICK_INTERVAL: Duration = Duration::from_secs(1);
const START_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// The synthetic agent-class name a team is registered under, so a team is spawned and
/// reconstructed by a worker process exactly like any user-defined agent class.
pub fn team_class_name(team_name: &str) -> String {
    format!("__team__:{team_name}")
}

fn build_team(config: &WorkspaceConfig, team_name: &str) -> FleetResult<Team> {
    let team_config = config
        .teams
        .iter()
        .find(|t| t.team_id == AgentId::team(team_name))
        .ok_or_else(|| FleetError::configuration(format!("no such team '{team_name}'")))?;

    let collaboration: Box<dyn Collaboration> = match &team_config.collaboration {
        CollaborationConfig::Centralized { coordinator } => Box::new(CentralizedCollaboration::new(coordinator.clone())),
        CollaborationConfig::Decentralized {
            decision_strategy,
            time_limit_seconds,
            initiative_takers,
        } => {
            let mut collab = DecentralizedCollaboration::new(*decision_strategy, team_config.members.len(), *time_limit_seconds);
            if let Some(takers) = initiative_takers.clone() {
                collab = collab.with_initiative_takers(takers);
            }
            Box::new(collab)
        }
    };

    let mut team = Team::new(team_config.team_id.clone(), team_config.members.clone(), collaboration);
    for service_name in &team_config.services {
        let service: Box<dyn TeamService> = match service_name.as_str() {
            "voting" => {
                let strategy = match &team_config.collaboration {
                    CollaborationConfig::Decentralized { decision_strategy, .. } => *decision_strategy,
                    CollaborationConfig::Centralized { .. } => DecisionStrategy::MajorityVote,
                };
                Box::new(TeamVoting::new(strategy, team_config.members.len()))
            }
            "scratchpad" => Box::new(Scratchpad),
            "storage" => Box::new(Storage::new().map_err(FleetError::Io)?),
            "toolbox" => Box::new(Toolbox::new()),
            // Validated against the known-service list at config-load time.
            other => return Err(FleetError::configuration(format!("unknown team service '{other}'"))),
        };
        team = team.with_service(service);
    }
    Ok(team)
}

/// Registers a synthetic agent class for every configured team so that `class_identifier ==
/// team_class_name(name)` reconstructs that team's collaboration strategy and services
/// fresh in whichever process builds it. Must be called with an identically-configured
/// `WorkspaceConfig` in both the parent process (for bookkeeping) and every worker process
/// (to actually build the agent) — see `main.rs`.
pub async fn register_team_classes(registry: &AgentRegistry, config: &WorkspaceConfig) {
    for team_config in &config.teams {
        let team_name = team_config.team_id.as_str().trim_start_matches("team:").to_string();
        let class_name = team_class_name(&team_name);
        let config = config.clone();
        registry
            .register(
                class_name,
                std::sync::Arc::new(move |_init_args: Value| {
                    build_team(&config, &team_name).map(|team| std::sync::Arc::new(team) as std::sync::Arc<dyn crate::agent::Agent>)
                }),
            )
            .await;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointedAgent {
    pub class_identifier: String,
    pub instance_name: String,
    pub id: String,
    pub init_args: Value,
    pub init_kwargs: Value,
    pub state_snapshot: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub agents: Vec<CheckpointedAgent>,
}

impl Checkpoint {
    pub fn load(path: impl AsRef<Path>) -> FleetResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(FleetError::Io)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, path: impl AsRef<Path>) -> FleetResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json).map_err(FleetError::Io)
    }
}

/// Owns every spawned worker process and the router they all connect to. `agents` and
/// `teams` in the configuration are both spawned the same way — a team is just an agent
/// whose class happens to be a synthetic one built by [`register_team_classes`].
pub struct Runner {
    router: Router,
    router_port: u16,
    config: WorkspaceConfig,
    workspace_dir: PathBuf,
    workers: HashMap<AgentId, WorkerHandle>,
}

impl Runner {
    pub fn new(router: Router, router_port: u16, config: WorkspaceConfig, workspace_dir: PathBuf) -> Self {
        Self {
            router,
            router_port,
            config,
            workspace_dir,
            workers: HashMap::new(),
        }
    }

    fn expected_agent_ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.config.agents.iter().map(|a| AgentId::new(a.instance_name.clone())).collect();
        ids.extend(self.config.teams.iter().map(|t| t.team_id.clone()));
        ids
    }

    fn bootstrap_for_agent(&self, instance_name: &str, class: &str, init_args: Value, initial_state: Option<Value>) -> WorkerBootstrap {
        WorkerBootstrap {
            class_identifier: class.to_string(),
            instance_name: instance_name.to_string(),
            init_args,
            initial_state,
            router_port: self.router_port,
        }
    }

    /// Registers every configured channel's membership set with the router, so
    /// channel-addressed messages have somewhere to fan out to before any agent connects.
    async fn register_channels(&self) {
        for channel_config in &self.config.channels {
            self.router
                .create_channel(fleet_wire::Channel::with_members(channel_config.name.clone(), channel_config.members.clone()))
                .await;
        }
    }

    /// Spawns every configured agent and team as a worker process, then polls the router
    /// until every expected id has registered or `timeout` elapses.
    pub async fn start(&mut self, timeout: Duration) -> FleetResult<()> {
        self.register_channels().await;

        for agent_config in self.config.agents.clone() {
            let bootstrap = self.bootstrap_for_agent(
                &agent_config.instance_name,
                &agent_config.class,
                agent_config.init_args.clone(),
                agent_config.initial_state.clone(),
            );
            let handle = WorkerHandle::spawn(bootstrap)?;
            self.workers.insert(AgentId::new(agent_config.instance_name.clone()), handle);
        }
        for team_config in self.config.teams.clone() {
            let team_name = team_config.team_id.as_str().trim_start_matches("team:").to_string();
            let bootstrap = self.bootstrap_for_agent(&team_config.team_id.as_str().to_string(), &team_class_name(&team_name), Value::Null, None);
            let handle = WorkerHandle::spawn(bootstrap)?;
            self.workers.insert(team_config.team_id.clone(), handle);
        }

        let expected = self.expected_agent_ids();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let registered = self.router.registered_agents().await;
            if expected.iter().all(|id| registered.contains(id)) {
                info!(count = expected.len(), "all agents registered");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(FleetError::Timeout);
            }
            sleep(START_POLL_INTERVAL).await;
        }
    }

    /// Blocks until a configured stop condition fires, respawning any worker that exits
    /// unexpectedly along the way. Returns once `stop()` has been called on every worker.
    pub async fn run(&mut self) -> FleetResult<()> {
        loop {
            self.respawn_crashed().await?;

            if self.stop_condition_met(&self.config.stop_condition.clone()).await {
                info!("stop condition reached");
                break;
            }

            sleep(RUN_TICK_INTERVAL).await;
        }
        self.stop().await
    }

    /// Checks every worker for an unexpected exit and respawns it from its original
    /// bootstrap. Called once per [`run`](Self::run) tick; exposed directly so tests can
    /// drive a single respawn cycle deterministically instead of racing the tick interval.
    pub async fn respawn_crashed(&mut self) -> FleetResult<()> {
        let crashed: Vec<AgentId> = self
            .workers
            .iter_mut()
            .filter_map(|(id, handle)| match handle.try_wait() {
                Ok(Some(_status)) => Some(id.clone()),
                _ => None,
            })
            .collect();

        for id in crashed {
            let bootstrap = self.workers[&id].bootstrap.clone();
            warn!(agent = %id, "worker exited unexpectedly, respawning");
            let handle = WorkerHandle::spawn(bootstrap)?;
            self.workers.insert(id, handle);
        }
        Ok(())
    }

    async fn stop_condition_met(&self, condition: &StopCondition) -> bool {
        if let Some(n) = condition.no_activity_seconds {
            if let Some(last_active) = self.router.all_idle_since().await {
                if last_active + n < now() {
                    return true;
                }
            }
        }
        if let Some(filter) = &condition.message_match {
            let log = self.router.log_snapshot().await;
            let found = log.iter().any(|m| {
                filter.source.as_ref().map_or(true, |s| m.source.as_ref() == Some(s))
                    && filter.destination.as_ref().map_or(true, |d| m.destination.as_ref() == Some(d))
                    && filter.channel.as_ref().map_or(true, |c| m.channel.as_deref() == Some(c.as_str()))
            });
            if found {
                return true;
            }
        }
        false
    }

    /// Signals every worker process and waits for an orderly exit (or force-kills after the
    /// grace period); see [`WorkerHandle::stop`].
    pub async fn stop(&mut self) -> FleetResult<()> {
        for (id, handle) in self.workers.iter_mut() {
            info!(agent = %id, "stopping worker");
            handle.stop().await?;
        }
        Ok(())
    }

    /// Snapshots every agent's construction parameters and last-seen state (as pushed via
    /// `AgentClient::push_state`) into a single file under the workspace directory.
    pub async fn save_checkpoint(&self) -> FleetResult<PathBuf> {
        let mut agents = Vec::new();

        for agent_config in &self.config.agents {
            let id = AgentId::new(agent_config.instance_name.clone());
            agents.push(CheckpointedAgent {
                class_identifier: agent_config.class.clone(),
                instance_name: agent_config.instance_name.clone(),
                id: id.as_str().to_string(),
                init_args: agent_config.init_args.clone(),
                init_kwargs: Value::Null,
                state_snapshot: self.router.state_of(&id).await,
            });
        }
        for team_config in &self.config.teams {
            let team_name = team_config.team_id.as_str().trim_start_matches("team:").to_string();
            agents.push(CheckpointedAgent {
                class_identifier: team_class_name(&team_name),
                instance_name: team_config.team_id.as_str().to_string(),
                id: team_config.team_id.as_str().to_string(),
                init_args: Value::Null,
                init_kwargs: Value::Null,
                state_snapshot: self.router.state_of(&team_config.team_id).await,
            });
        }

        let checkpoint = Checkpoint { agents };
        let path = self.workspace_dir.join("checkpoint.json");
        checkpoint.save(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    fn sample_config() -> WorkspaceConfig {
        WorkspaceConfig {
            agents: vec![AgentConfig {
                instance_name: "writer".into(),
                class: "echo".into(),
                init_args: serde_json::json!({"greeting": "hi"}),
                initial_state: None,
            }],
            teams: Vec::new(),
            channels: Vec::new(),
            stop_condition: StopCondition::default(),
        }
    }

    #[tokio::test]
    async fn checkpoint_round_trips_through_a_file() {
        let router = Router::new();
        router.register(AgentId::new("writer")).await.unwrap();
        router.record_state(&AgentId::new("writer"), serde_json::json!({"processed": 2})).await;

        let dir = tempfile::tempdir().unwrap();
        let runner = Runner::new(router, 0, sample_config(), dir.path().to_path_buf());

        let path = runner.save_checkpoint().await.unwrap();
        let checkpoint = Checkpoint::load(&path).unwrap();
        assert_eq!(checkpoint.agents.len(), 1);
        assert_eq!(checkpoint.agents[0].instance_name, "writer");
        assert_eq!(checkpoint.agents[0].state_snapshot.as_ref().unwrap()["processed"], 2);
    }

    #[tokio::test]
    async fn no_activity_stop_condition_fires_once_all_agents_are_idle_past_the_window() {
        let router = Router::new();
        router.register(AgentId::new("writer")).await.unwrap();

        let mut config = sample_config();
        config.stop_condition = StopCondition {
            no_activity_seconds: Some(0),
            message_match: None,
        };
        let dir = tempfile::tempdir().unwrap();
        let runner = Runner::new(router, 0, config.clone(), dir.path().to_path_buf());

        assert!(runner.stop_condition_met(&config.stop_condition).await);
    }

    #[tokio::test]
    async fn start_registers_configured_channels_before_agents_connect() {
        let router = Router::new();
        let mut config = sample_config();
        config.channels = vec![crate::config::ChannelConfig {
            name: "general".into(),
            members: vec![AgentId::new("alice"), AgentId::new("bob")],
        }];
        let dir = tempfile::tempdir().unwrap();
        let runner = Runner::new(router.clone(), 0, config, dir.path().to_path_buf());

        runner.register_channels().await;

        let alice_mailbox = router.register(AgentId::new("alice")).await.unwrap();
        router.register(AgentId::new("bob")).await.unwrap();
        router
            .send(fleet_wire::Envelope::message("hi").with_source("bob").with_channel("general"))
            .await;

        let received = alice_mailbox.recv().await;
        assert_eq!(received.content.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn message_match_stop_condition_requires_a_logged_message() {
        let router = Router::new();
        router.register(AgentId::new("writer")).await.unwrap();

        let mut config = sample_config();
        config.stop_condition = StopCondition {
            no_activity_seconds: None,
            message_match: Some(crate::config::MessageMatchConfig {
                source: Some(AgentId::new("writer")),
                destination: None,
                channel: None,
            }),
        };
        let dir = tempfile::tempdir().unwrap();
        let runner = Runner::new(router.clone(), 0, config.clone(), dir.path().to_path_buf());

        assert!(!runner.stop_condition_met(&config.stop_condition).await);

        router
            .send(fleet_wire::Envelope::message("hi").with_source("writer").with_destination("nobody"))
            .await;
        assert!(runner.stop_condition_met(&config.stop_condition).await);
    }
}
