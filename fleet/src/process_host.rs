//! Spawns each agent in its own OS process and speaks the bootstrap/shutdown protocol
//! described in `SPEC_FULL.md` §4.3.
//!
//! The parent re-executes the current binary with a hidden `--worker` entrypoint (see
//! [`crate::cli`]) and passes `(class_identifier, init_args, initial_state)` base64-encoded
//! in the `FLEET_WORKER_BOOTSTRAP` environment variable. The child decodes it, looks the
//! class up in the shared [`crate::registry::AgentRegistry`], and runs the iterate loop
//! until it is asked to stop or it crashes.

use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::error::{FleetError, FleetResult};

pub const BOOTSTRAP_ENV_VAR: &str = "FLEET_WORKER_BOOTSTRAP";
pub const WORKER_ITERATE_INTERVAL: Duration = Duration::from_millis(100);
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Overrides which executable `WorkerHandle::spawn` re-execs, instead of the default
/// `current_exe()` self-reexec. Unset in normal operation; integration tests set it to the
/// path of the compiled `fleet` binary (`env!("CARGO_BIN_EXE_fleet")`), since `current_exe()`
/// inside a test binary resolves to the test harness, not `fleet` itself.
pub const WORKER_EXE_OVERRIDE_ENV_VAR: &str = "FLEET_WORKER_EXE";

fn worker_exe() -> FleetResult<std::path::PathBuf> {
    if let Ok(path) = std::env::var(WORKER_EXE_OVERRIDE_ENV_VAR) {
        return Ok(std::path::PathBuf::from(path));
    }
    Ok(std::env::current_exe()?)
}

/// Everything a worker process needs to reconstruct and run one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerBootstrap {
    pub class_identifier: String,
    pub instance_name: String,
    pub init_args: Value,
    pub initial_state: Option<Value>,
    pub router_port: u16,
}

impl WorkerBootstrap {
    pub fn encode(&self) -> FleetResult<String> {
        let json = serde_json::to_vec(self)?;
        Ok(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, json))
    }

    pub fn decode(encoded: &str) -> FleetResult<Self> {
        let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)
            .map_err(|e| FleetError::protocol(format!("invalid worker bootstrap encoding: {e}")))?;
        let value = serde_json::from_slice(&bytes)?;
        Ok(value)
    }

    pub fn from_env() -> FleetResult<Self> {
        let encoded = std::env::var(BOOTSTRAP_ENV_VAR)
            .map_err(|_| FleetError::protocol(format!("{BOOTSTRAP_ENV_VAR} not set")))?;
        Self::decode(&encoded)
    }
}

/// A handle to a spawned worker process, held by the [`crate::runner::Runner`].
pub struct WorkerHandle {
    pub instance_name: String,
    pub bootstrap: WorkerBootstrap,
    child: Child,
}

impl WorkerHandle {
    /// Re-executes the current binary (`current_exe`) with the hidden worker entrypoint
    /// and the bootstrap blob passed via environment variable.
    pub fn spawn(bootstrap: WorkerBootstrap) -> FleetResult<Self> {
        let exe = worker_exe()?;
        let encoded = bootstrap.encode()?;
        let child = Command::new(exe)
            .arg("--worker")
            .env(BOOTSTRAP_ENV_VAR, encoded)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()?;
        info!(instance = %bootstrap.instance_name, pid = child.id(), "spawned agent process");
        Ok(Self {
            instance_name: bootstrap.instance_name.clone(),
            bootstrap,
            child,
        })
    }

    /// `Some(status)` once the process has exited; `None` if it's still running.
    pub fn try_wait(&mut self) -> FleetResult<Option<std::process::ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Sends SIGTERM (via killing the OS process handle) and waits up to
    /// [`STOP_GRACE_PERIOD`] for an orderly exit before force-killing.
    pub async fn stop(&mut self) -> FleetResult<()> {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                // SAFETY: `pid` was just obtained from this live child handle.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
        }
        let result = tokio::time::timeout(STOP_GRACE_PERIOD, self.child.wait()).await;
        if result.is_err() {
            warn!(instance = %self.instance_name, "grace period elapsed, force killing");
            self.child.kill().await?;
        }
        Ok(())
    }
}

/// Installs the worker-side SIGINT/SIGTERM handler: returns a future that resolves once
/// either signal is received, so the iterate loop can select on it and exit the current
/// iteration cleanly before disconnecting.
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_round_trips_through_base64_json() {
        let bootstrap = WorkerBootstrap {
            class_identifier: "echo".into(),
            instance_name: "echo-1".into(),
            init_args: serde_json::json!({"greeting": "hi"}),
            initial_state: None,
            router_port: 5555,
        };
        let encoded = bootstrap.encode().unwrap();
        let decoded = WorkerBootstrap::decode(&encoded).unwrap();
        assert_eq!(decoded.class_identifier, bootstrap.class_identifier);
        assert_eq!(decoded.instance_name, bootstrap.instance_name);
        assert_eq!(decoded.router_port, bootstrap.router_port);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(WorkerBootstrap::decode("not valid base64!!").is_err());
    }
}
