//! Team services: in-team auxiliary actors addressed via `team_service` envelopes.

pub mod scratchpad;
pub mod storage;
pub mod toolbox;
pub mod voting;

pub use scratchpad::Scratchpad;
pub use storage::Storage;
pub use toolbox::Toolbox;
pub use voting::{DecisionStrategy, TeamVoting};

use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Extracts the single action this service cares about from an envelope, if any. Team
/// service calls are modeled as one action per envelope; a future revision could batch
/// several, but nothing in the base specification requires it.
pub(crate) fn single_action(incoming: &fleet_wire::Envelope) -> Option<&fleet_wire::Action> {
    incoming.actions.first()
}
