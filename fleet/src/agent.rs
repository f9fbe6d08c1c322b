use async_trait::async_trait;
use fleet_wire::Envelope;

use crate::context::AgentContext;
use crate::error::FleetResult;
use crate::state::AgentState;

/// User-implemented agent behavior.
///
/// `respond` is invoked by the passive loop (see [`crate::passive_loop`]) at most once per
/// unprocessed inbound message. `view` is the already-selected, already-merged history
/// (§4.5): external messages and the agent's own internal events, run through
/// `context.view_selector` and truncated at `incoming`. It returns the envelopes the agent
/// wishes to emit; the caller is responsible for sending them through the
/// [`crate::client::AgentClient`].
#[async_trait]
pub trait Agent: Send + Sync {
    async fn respond(
        &self,
        context: &mut AgentContext,
        state: &mut AgentState,
        incoming: &Envelope,
        view: &[Envelope],
    ) -> FleetResult<Vec<Envelope>>;

    /// Called once per worker-loop tick, independent of whether a message was just
    /// processed. Most agents have nothing to do here; [`crate::team::Team`] uses it to
    /// drive a [`crate::team::Collaboration`]'s time-boxed polling (e.g. decentralized
    /// voting's "no decision within time limit" check).
    async fn tick(&self, _state: &mut AgentState) -> FleetResult<Vec<Envelope>> {
        Ok(Vec::new())
    }

    /// A short human-readable name, used in logs and checkpoints. Defaults to a generic
    /// label; override when a friendlier name is wanted.
    fn name(&self) -> &str {
        "agent"
    }
}
