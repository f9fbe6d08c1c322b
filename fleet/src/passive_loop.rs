//! The default `iterate` implementation: find the next unprocessed inbound message and
//! hand it to the agent's `respond`.

use std::sync::Arc;

use fleet_wire::{AgentId, Envelope, EventType};
use tracing::{debug, instrument};

use crate::agent::Agent;
use crate::client::AgentClient;
use crate::context::{AgentContext, AsyncExecutionRecord};
use crate::error::FleetResult;
use crate::state::AgentState;
use crate::status::AgentStatus;

/// Folds any arrived async-tool observations into synthetic internal events (spec §3.5):
/// for each unprocessed envelope addressed to this agent whose observations carry an
/// `async_execution_id` this context is still tracking, consumes the matching
/// [`crate::context::AsyncExecutionRecord`] and records a `internal_event` envelope —
/// rewritten to look like it came from the original requester — in `state.internal_events`.
/// The carrier envelope itself is marked processed so it's never handed to `respond` raw;
/// from the agent's perspective the tool result only ever appears inline in its own history.
fn absorb_async_observations(history: &[Envelope], context: &mut AgentContext, state: &mut AgentState) {
    for m in history {
        let Some(id) = &m.message_id else { continue };
        if state.is_processed(id) {
            continue;
        }
        if m.destination.as_ref() != Some(&context.agent_id) {
            continue;
        }
        let Some(observation) = m.observations.iter().find(|o| o.is_async_observation && o.async_execution_id.is_some()) else {
            continue;
        };
        let async_id = observation.async_execution_id.clone().expect("checked above");
        let Some(record) = context.take_async_execution(&async_id) else {
            continue;
        };

        let mut rewritten = observation.clone();
        rewritten.tool_use_id = record.tool_use_id;

        let mut synthetic = Envelope::new(EventType::InternalEvent)
            .with_destination(context.agent_id.clone())
            .with_observations(vec![rewritten]);
        synthetic.source = Some(record.original_source);
        synthetic.channel = record.original_channel;
        synthetic.ensure_stamped();

        state.push_internal_event(synthetic);
        state.mark_processed(id.clone());
    }
}

/// Records a correlation entry (spec §3.5) for every outbound action dispatched
/// asynchronously out of processing `incoming`, so a later unsolicited observation
/// carrying the same `async_execution_id` can be folded back into this agent's own view
/// by [`absorb_async_observations`] instead of being handed to `respond` raw.
fn record_async_dispatches(outbound: &[Envelope], incoming: &Envelope, context: &mut AgentContext) {
    for envelope in outbound {
        for action in &envelope.actions {
            let Some(async_id) = &action.async_execution_id else { continue };
            context.record_async_execution(
                async_id.clone(),
                AsyncExecutionRecord {
                    original_source: incoming.source.clone().unwrap_or_else(|| AgentId::new("unknown")),
                    original_channel: incoming.channel.clone(),
                    tool_use_id: action.tool_use_id.clone(),
                },
            );
        }
    }
}

/// One pass of the passive loop. Returns `true` if a message was found and processed.
///
/// Matching rule (see module docs in `SPEC_FULL.md` §4.4): the first message, in arrival
/// order, such that it targets this agent directly or via a channel, has not already been
/// processed, is not an internal event belonging to another agent, and whose source is not
/// on this agent's ignore list.
#[instrument(skip(agent, client, context, state, ignored_sources), fields(agent = %context.agent_id))]
pub async fn run_once(
    agent: &Arc<dyn Agent>,
    client: &AgentClient,
    context: &mut AgentContext,
    state: &mut AgentState,
    ignored_sources: &[AgentId],
) -> FleetResult<bool> {
    let history = client.fetch_all_messages().await;
    absorb_async_observations(&history, context, state);

    let next = history.iter().find(|m| {
        let targets_me = m.destination.as_ref() == Some(&context.agent_id) || m.channel.is_some();
        if !targets_me {
            return false;
        }
        let Some(id) = &m.message_id else { return false };
        if state.is_processed(id) {
            return false;
        }
        if matches!(m.event_type, EventType::InternalEvent) && m.source.as_ref() != Some(&context.agent_id) {
            return false;
        }
        if let Some(source) = &m.source {
            if ignored_sources.contains(source) {
                return false;
            }
        }
        true
    });

    let Some(incoming) = next.cloned() else {
        return Ok(false);
    };

    let id = incoming.message_id.clone().expect("matched message always has an id");
    state.mark_processed(id);
    state.status = AgentStatus::Busy;

    let selected = context.view_selector.select(&history, &incoming);
    let view = crate::view::merge_with_internal_events(&selected, &state.internal_events);
    debug!(view_len = view.len(), "dispatching to respond");

    let outbound = agent.respond(context, state, &incoming, &view).await?;
    record_async_dispatches(&outbound, &incoming, context);
    for envelope in outbound {
        client.send_message(envelope).await?;
    }

    state.status = AgentStatus::Idle;
    Ok(true)
}
