use thiserror::Error;

/// Top-level error type for the fleet runtime: the router, agent clients, process host,
/// team coordination, and CLI all funnel their failures through this enum.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("agent '{0}' is already registered with a live heartbeat")]
    AlreadyRegistered(String),

    #[error("agent '{0}' is not registered")]
    UnknownAgent(String),

    #[error("agent '{0}' crashed: {1}")]
    AgentCrash(String, String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("operation timed out")]
    Timeout,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no agent class registered under name '{0}'")]
    UnknownAgentClass(String),

    #[error("workspace not found at {0}")]
    WorkspaceNotFound(String),

    #[error(transparent)]
    Wire(#[from] fleet_wire::WireError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl FleetError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether a caller can reasonably retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout | Self::Io(_))
    }

    /// A short, user-facing rendering suitable for the CLI or a notification message.
    pub fn user_message(&self) -> String {
        match self {
            Self::AlreadyRegistered(id) => format!("agent '{id}' is already connected"),
            Self::UnknownAgent(id) => format!("no such agent '{id}'"),
            Self::Timeout => "the operation timed out".to_string(),
            other => other.to_string(),
        }
    }
}

pub type FleetResult<T> = Result<T, FleetError>;
