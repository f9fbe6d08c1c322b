//! Fleet: a router, agent-process host, and team-coordination runtime.
//!
//! Agents are independent, long-lived processes that exchange messages only through a
//! central [`router`]. Each agent process holds a [`client::AgentClient`] that registers
//! with the router, maintains an ordered local view of everything it has observed, and
//! drives the default [`passive_loop`] (find the next unprocessed message, hand it to the
//! agent's own [`agent::Agent::respond`]). Teams are themselves agents — `team:<name>` —
//! whose `respond` dispatches into a pluggable [`team::Collaboration`] strategy or one of a
//! fixed set of [`team::TeamService`]s (voting, scratchpad, storage, toolbox).
//!
//! [`runner::Runner`] ties it together: it spawns one OS process per configured agent (via
//! [`process_host`]), waits for them to register, watches for crashes, evaluates stop
//! conditions, and can snapshot every agent's state into a checkpoint. [`config`] loads the
//! TOML workspace description that a `Runner` is built from.

pub mod agent;
pub mod builtin;
pub mod client;
pub mod config;
pub mod context;
pub mod contracts;
pub mod error;
pub mod passive_loop;
pub mod process_host;
pub mod registry;
pub mod router;
pub mod runner;
pub mod state;
pub mod status;
pub mod team;
pub mod view;

pub use agent::Agent;
pub use client::AgentClient;
pub use config::{WorkspaceConfig, WorkspaceConfigFile};
pub use context::AgentContext;
pub use error::{FleetError, FleetResult};
pub use registry::AgentRegistry;
pub use router::Router;
pub use runner::Runner;
pub use state::{AgentState, TeamState};
