//! Small built-in agent classes available to every workspace without custom Rust code.
//!
//! `echo` mirrors its incoming content back to whoever sent it — the class the `fleet
//! create` scaffold template configures by default. `crash_probe` deliberately panics on
//! its Nth invocation; it exists purely as the fixture spec.md §8's crash+respawn scenario
//! describes ("Agent whose `respond` raises on its 3rd invocation"), so that scenario can be
//! exercised against a real spawned OS process rather than only asserted about in the
//! abstract.

use std::sync::Arc;

use async_trait::async_trait;
use fleet_wire::Envelope;
use serde_json::Value;

use crate::agent::Agent;
use crate::context::AgentContext;
use crate::error::FleetResult;
use crate::registry::AgentRegistry;
use crate::state::AgentState;

pub struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    async fn respond(
        &self,
        _context: &mut AgentContext,
        _state: &mut AgentState,
        incoming: &Envelope,
        _view: &[Envelope],
    ) -> FleetResult<Vec<Envelope>> {
        let reply = Envelope::message(incoming.content.clone().unwrap_or_default())
            .with_destination(incoming.source.clone().unwrap_or_else(|| "unknown".into()));
        Ok(vec![reply])
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// Panics on its `crash_on`th invocation (default the 3rd); a respawned process starts a
/// fresh counter in `state.custom`, so it crashes again only after `crash_on` more messages.
/// `init_args`: `{"crash_on": <u64>}`.
pub struct CrashProbeAgent {
    crash_on: u64,
}

impl CrashProbeAgent {
    pub fn new(crash_on: u64) -> Self {
        Self { crash_on }
    }

    fn from_init_args(init_args: &Value) -> Self {
        let crash_on = init_args.get("crash_on").and_then(Value::as_u64).unwrap_or(3);
        Self::new(crash_on)
    }
}

#[async_trait]
impl Agent for CrashProbeAgent {
    async fn respond(
        &self,
        _context: &mut AgentContext,
        state: &mut AgentState,
        incoming: &Envelope,
        _view: &[Envelope],
    ) -> FleetResult<Vec<Envelope>> {
        let count = state.custom.get("count").and_then(Value::as_u64).unwrap_or(0) + 1;
        state.custom = serde_json::json!({"count": count});
        if count == self.crash_on {
            panic!("crash_probe: deliberate crash on invocation {count}");
        }
        let reply = Envelope::message(format!("ack-{count}"))
            .with_destination(incoming.source.clone().unwrap_or_else(|| "unknown".into()));
        Ok(vec![reply])
    }

    fn name(&self) -> &str {
        "crash_probe"
    }
}

/// Registers every built-in class with `registry`. Called alongside
/// [`crate::runner::register_team_classes`] in both the parent process and every worker
/// process, since each reconstructs an identically-populated registry from scratch.
pub async fn register_builtin_classes(registry: &AgentRegistry) {
    registry
        .register("echo", Arc::new(|_init_args| Ok(Arc::new(EchoAgent) as Arc<dyn Agent>)))
        .await;
    registry
        .register(
            "crash_probe",
            Arc::new(|init_args| Ok(Arc::new(CrashProbeAgent::from_init_args(&init_args)) as Arc<dyn Agent>)),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_wire::{AgentId, EventType};

    #[tokio::test]
    async fn echo_agent_mirrors_content_back_to_sender() {
        let registry = AgentRegistry::new();
        register_builtin_classes(&registry).await;
        let agent = registry.build("echo", Value::Null).await.unwrap();

        let mut context = AgentContext::new(AgentId::new("echo"));
        let mut state = AgentState::new();
        let incoming = Envelope::new(EventType::Message).with_source("alice").with_content("hi");
        let replies = agent.respond(&mut context, &mut state, &incoming, &[]).await.unwrap();

        assert_eq!(replies[0].destination.as_ref().unwrap().as_str(), "alice");
        assert_eq!(replies[0].content.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn crash_probe_counts_invocations_and_replies_until_the_crash_threshold() {
        let probe = CrashProbeAgent::new(3);
        let mut context = AgentContext::new(AgentId::new("probe"));
        let mut state = AgentState::new();

        for i in 1..3 {
            let incoming = Envelope::new(EventType::Message).with_source("alice").with_content("go");
            let replies = probe.respond(&mut context, &mut state, &incoming, &[]).await.unwrap();
            assert_eq!(replies[0].content.as_deref(), Some(format!("ack-{i}").as_str()));
        }
        assert_eq!(state.custom["count"], 2);
    }

    #[tokio::test]
    #[should_panic(expected = "deliberate crash on invocation 3")]
    async fn crash_probe_panics_on_its_configured_invocation() {
        let probe = CrashProbeAgent::new(3);
        let mut context = AgentContext::new(AgentId::new("probe"));
        let mut state = AgentState::new();
        for _ in 0..3 {
            let incoming = Envelope::new(EventType::Message).with_source("alice").with_content("go");
            let _ = probe.respond(&mut context, &mut state, &incoming, &[]).await;
        }
    }
}
