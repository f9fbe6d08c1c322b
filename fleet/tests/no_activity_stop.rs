//! Spec §8 scenario 5: a runner with a no-activity stop condition returns on its own,
//! without anything crashing, once its registered agents sit idle past the threshold.

use std::time::Duration;

use fleet::config::{AgentConfig, WorkspaceConfig};
use fleet::router::Router;
use fleet::runner::Runner;
use fleet_wire::AgentId;

#[tokio::test]
async fn run_returns_on_its_own_once_the_idle_window_elapses() {
    let router = Router::new();
    router.register(AgentId::new("writer")).await.unwrap();

    let config = WorkspaceConfig {
        agents: vec![AgentConfig {
            instance_name: "writer".into(),
            class: "echo".into(),
            init_args: serde_json::json!({}),
            initial_state: None,
        }],
        teams: Vec::new(),
        channels: Vec::new(),
        stop_condition: fleet::config::StopCondition {
            no_activity_seconds: Some(2),
            message_match: None,
        },
    };

    let dir = tempfile::tempdir().unwrap();
    let mut runner = Runner::new(router, 0, config, dir.path().to_path_buf());

    let result = tokio::time::timeout(Duration::from_secs(10), runner.run()).await;
    assert!(result.is_ok(), "run() must return once the no-activity window elapses, not hang");
    result.unwrap().unwrap();
}
