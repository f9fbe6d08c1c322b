//! Seams the core hands off to external collaborators: a language-model client, a tool
//! executor, and a prompt formatter. None of these are implemented here — agent business
//! logic, the model backend, and the tool-execution engine are all out of scope for this
//! crate (see `SPEC_FULL.md` §6.5) — but the traits are how an `Agent` implementation built
//! on top of this runtime would plug them in.

use async_trait::async_trait;
use fleet_wire::{Action, Envelope, Observation};

use crate::error::FleetResult;

/// A text-completion backend. Implementations typically wrap an HTTP client to a hosted
/// model or a local inference process; neither is provided by this crate.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> FleetResult<String>;
}

/// Executes a single tool invocation requested by an agent's own reasoning, as opposed to
/// the in-team [`crate::team::TeamService`] actions dispatched by the team coordinator.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, action: &Action) -> FleetResult<Observation>;
}

/// Translates between an agent's conversation view and the textual prompt/completion round
/// trip a [`LanguageModel`] speaks.
pub trait PromptFormatter: Send + Sync {
    /// Renders a view of envelopes (already selected and merged per §4.5) into a prompt.
    fn format(&self, view: &[Envelope]) -> String;

    /// Parses a completion back into the envelopes an agent wishes to emit.
    fn parse(&self, completion: &str) -> Vec<Envelope>;
}
