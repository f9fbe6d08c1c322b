use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ids::{AgentId, MessageId};

/// Classifies an envelope for routing and view-selection purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// An ordinary agent-to-agent or agent-to-team message.
    Message,
    /// An action/observation pair an agent keeps in its own memory, not meant for peers.
    InternalEvent,
    /// A call into a team service (voting, scratchpad, storage, toolbox).
    TeamService,
    /// A router- or team-originated notification (queue position, collaboration ended, ...).
    Notification,
}

/// A requested tool invocation attached to an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tool_name: String,
    pub action_name: String,
    #[serde(default)]
    pub parameters: Value,
    pub tool_use_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub async_execution_id: Option<String>,
}

impl Action {
    pub fn new(
        tool_name: impl Into<String>,
        action_name: impl Into<String>,
        parameters: Value,
        tool_use_id: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            action_name: action_name.into(),
            parameters,
            tool_use_id: tool_use_id.into(),
            async_execution_id: None,
        }
    }

    pub fn with_async_execution_id(mut self, id: impl Into<String>) -> Self {
        self.async_execution_id = Some(id.into());
        self
    }
}

/// The result of executing an [`Action`], matched back to it by `tool_use_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub data: Value,
    pub tool_use_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub async_execution_id: Option<String>,
    #[serde(default)]
    pub is_async_observation: bool,
}

impl Observation {
    pub fn new(data: Value, tool_use_id: impl Into<String>) -> Self {
        Self {
            data,
            tool_use_id: tool_use_id.into(),
            async_execution_id: None,
            is_async_observation: false,
        }
    }

    pub fn error(message: impl Into<String>, tool_use_id: impl Into<String>) -> Self {
        Self::new(serde_json::json!({ "error": message.into() }), tool_use_id)
    }

    pub fn async_result(
        data: Value,
        tool_use_id: impl Into<String>,
        async_execution_id: impl Into<String>,
    ) -> Self {
        Self {
            data,
            tool_use_id: tool_use_id.into(),
            async_execution_id: Some(async_execution_id.into()),
            is_async_observation: true,
        }
    }
}

/// The single unit of transport between agents and the router.
///
/// `message_id` is assigned on first send if absent and is immutable once appended to the
/// router's log; `timestamp` must be non-decreasing across successive envelopes from the same
/// `source`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: Option<MessageId>,
    pub event_type: EventType,
    #[serde(default)]
    pub source: Option<AgentId>,
    #[serde(default)]
    pub destination: Option<AgentId>,
    #[serde(default)]
    pub channel: Option<String>,
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub observations: Vec<Observation>,
    #[serde(default)]
    pub structured_content: Option<Value>,
    #[serde(default)]
    pub artifacts: Option<Value>,
}

impl Envelope {
    pub fn new(event_type: EventType) -> Self {
        Self {
            message_id: None,
            event_type,
            source: None,
            destination: None,
            channel: None,
            timestamp: None,
            content: None,
            actions: Vec::new(),
            observations: Vec::new(),
            structured_content: None,
            artifacts: None,
        }
    }

    pub fn message(content: impl Into<String>) -> Self {
        Self::new(EventType::Message).with_content(content)
    }

    pub fn with_source(mut self, source: impl Into<AgentId>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<AgentId>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_observations(mut self, observations: Vec<Observation>) -> Self {
        self.observations = observations;
        self
    }

    /// Assigns a message id and timestamp if either is unset. Idempotent: a fully-stamped
    /// envelope is returned unchanged.
    pub fn ensure_stamped(&mut self) {
        if self.message_id.is_none() {
            self.message_id = Some(MessageId::generate());
        }
        if self.timestamp.is_none() {
            self.timestamp = Some(now_unix_seconds());
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.event_type, EventType::InternalEvent)
    }
}

fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_stamped_assigns_missing_fields_once() {
        let mut envelope = Envelope::message("hello").with_destination("bob");
        assert!(envelope.message_id.is_none());
        envelope.ensure_stamped();
        let id = envelope.message_id.clone();
        assert!(id.is_some());
        envelope.ensure_stamped();
        assert_eq!(envelope.message_id, id);
    }

    #[test]
    fn builder_sets_expected_fields() {
        let envelope = Envelope::message("hi")
            .with_source("alice")
            .with_destination("bob")
            .with_channel("general");
        assert_eq!(envelope.content.as_deref(), Some("hi"));
        assert_eq!(envelope.source.as_ref().unwrap().as_str(), "alice");
        assert_eq!(envelope.destination.as_ref().unwrap().as_str(), "bob");
        assert_eq!(envelope.channel.as_deref(), Some("general"));
    }

    #[test]
    fn round_trips_through_json() {
        let mut envelope = Envelope::message("payload").with_source("alice");
        envelope.ensure_stamped();
        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, envelope);
    }
}
