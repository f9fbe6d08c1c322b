use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::agent::Agent;
use crate::error::{FleetError, FleetResult};

/// Constructs a boxed [`Agent`] from its serialized init arguments. Registered once per
/// agent class at process startup; invoked by the process host whenever a worker process
/// needs to reconstruct an agent (fresh start, or respawn after a crash).
pub type AgentFactory = Arc<dyn Fn(Value) -> FleetResult<Arc<dyn Agent>> + Send + Sync>;

/// Maps an agent class name to the factory that builds it.
///
/// This is the runtime's answer to the base framework's reflection-based instantiation:
/// rather than looking a class up by name at runtime through the language's object model,
/// every agent implementation registers an explicit constructor here before the runner
/// starts, and a respawned worker process looks it up the same way a fresh one would.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    factories: Arc<RwLock<HashMap<String, AgentFactory>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, class_name: impl Into<String>, factory: AgentFactory) {
        self.factories.write().await.insert(class_name.into(), factory);
    }

    pub async fn build(&self, class_name: &str, init_args: Value) -> FleetResult<Arc<dyn Agent>> {
        let factories = self.factories.read().await;
        let factory = factories
            .get(class_name)
            .ok_or_else(|| FleetError::UnknownAgentClass(class_name.to_string()))?;
        factory(init_args)
    }

    pub async fn class_names(&self) -> Vec<String> {
        self.factories.read().await.keys().cloned().collect()
    }
}
