use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use fleet::agent::Agent;
use fleet::client::AgentClient;
use fleet::config::WorkspaceConfig;
use fleet::context::AgentContext;
use fleet::process_host::{wait_for_shutdown_signal, WorkerBootstrap, WORKER_ITERATE_INTERVAL};
use fleet::registry::AgentRegistry;
use fleet::router::server::{RouterServer, DEFAULT_PORT};
use fleet::router::Router;
use fleet::runner::{register_team_classes, Runner};
use fleet::state::AgentState;
use fleet_wire::AgentId;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleet", about = "Router, agent-process host, and team-coordination runtime")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Hidden worker entrypoint: the runner re-execs this binary with this flag set to
    /// host a single agent, reading its bootstrap from `FLEET_WORKER_BOOTSTRAP`.
    #[arg(long, hide = true)]
    worker: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Scaffold a new workspace directory from the minimal template.
    Create {
        #[arg(short, long)]
        workspace: String,
    },
    /// Run a workspace until its configured stop condition fires.
    Run {
        #[arg(short, long)]
        workspace: String,
        #[arg(short, long)]
        input: Option<String>,
        #[arg(long)]
        debug: bool,
        #[arg(long)]
        visual: bool,
        #[arg(long, default_value_t = 9000)]
        visual_port: u16,
    },
}

/// `CONFIG_PATH` / workspace-root resolution: the path is env-first, falling back to
/// `config.toml` relative to the current directory. The runner sets its own working
/// directory to the workspace root before spawning worker processes, so a worker re-execing
/// this binary inherits the same resolution without needing the path passed explicitly.
fn resolve_config_path() -> PathBuf {
    std::env::var("CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("config.toml"))
}

fn init_logging(debug: bool, workspace: &Path) {
    let filter = EnvFilter::new(if debug { "info" } else { "error" });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if debug {
        if let Ok(file) = std::fs::File::create(workspace.join("fleet.log")) {
            builder.with_writer(std::sync::Mutex::new(file)).init();
            return;
        }
    }
    builder.init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.worker {
        run_worker().await;
        return;
    }

    let exit_code = match cli.command {
        Some(Command::Create { workspace }) => create_workspace(&workspace),
        Some(Command::Run {
            workspace,
            input,
            debug,
            visual,
            visual_port,
        }) => run_workspace(&workspace, input, debug, visual, visual_port).await,
        None => {
            eprintln!("usage: fleet <create|run> ...");
            2
        }
    };
    std::process::exit(exit_code);
}

fn create_workspace(workspace: &str) -> i32 {
    let dir = PathBuf::from(workspace);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        eprintln!("failed to create workspace directory: {e}");
        return 1;
    }

    let config_path = dir.join("config.toml");
    if !config_path.exists() {
        const TEMPLATE: &str = "# fleet workspace configuration\n\n[[agents]]\ninstance_name = \"example\"\nclass = \"echo\"\n";
        if let Err(e) = std::fs::write(&config_path, TEMPLATE) {
            eprintln!("failed to write config template: {e}");
            return 1;
        }
    }

    println!("created workspace at {}", dir.display());
    0
}

async fn run_workspace(workspace: &str, input: Option<String>, debug: bool, _visual: bool, _visual_port: u16) -> i32 {
    let workspace_dir = PathBuf::from(workspace);
    if !workspace_dir.is_dir() {
        eprintln!("workspace not found: {}", workspace_dir.display());
        return 1;
    }
    init_logging(debug, &workspace_dir);

    if std::env::set_current_dir(&workspace_dir).is_err() {
        eprintln!("workspace not found: {}", workspace_dir.display());
        return 1;
    }

    let config = match WorkspaceConfig::load(resolve_config_path()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return 2;
        }
    };

    let registry = AgentRegistry::new();
    fleet::builtin::register_builtin_classes(&registry).await;
    register_team_classes(&registry, &config).await;

    let router = Router::new();
    let server = match RouterServer::bind(router.clone(), DEFAULT_PORT).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("failed to bind router: {e}");
            return 2;
        }
    };
    let router_port = server.local_port().unwrap_or(DEFAULT_PORT);
    tokio::spawn(server.serve());

    let mut runner = Runner::new(router, router_port, config, workspace_dir);
    if let Err(e) = runner.start(Duration::from_secs(30)).await {
        eprintln!("agents failed to start: {e}");
        return 2;
    }

    if let Some(text) = input {
        tracing::info!(%text, "initial input supplied on the command line");
    }

    tokio::select! {
        result = runner.run() => {
            if let Err(e) = result {
                eprintln!("run error: {e}");
                return 1;
            }
        }
        _ = wait_for_shutdown_signal() => {
            if let Err(e) = runner.stop().await {
                eprintln!("shutdown error: {e}");
                return 1;
            }
        }
    }

    if let Err(e) = runner.save_checkpoint().await {
        eprintln!("failed to save checkpoint: {e}");
        return 1;
    }

    0
}

/// The hidden worker entrypoint: decodes its bootstrap, rebuilds the agent it was told to
/// host from a registry populated identically to the parent's, connects to the router, and
/// runs the passive loop until asked to stop. Exits non-zero on an unhandled error so the
/// runner respawns it.
async fn run_worker() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new("info")).init();

    let bootstrap = match WorkerBootstrap::from_env() {
        Ok(bootstrap) => bootstrap,
        Err(e) => {
            eprintln!("worker bootstrap error: {e}");
            std::process::exit(1);
        }
    };

    let config = match WorkspaceConfig::load(resolve_config_path()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("worker configuration error: {e}");
            std::process::exit(2);
        }
    };

    let registry = AgentRegistry::new();
    fleet::builtin::register_builtin_classes(&registry).await;
    register_team_classes(&registry, &config).await;

    let agent: Arc<dyn Agent> = match registry.build(&bootstrap.class_identifier, bootstrap.init_args.clone()).await {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("failed to build agent '{}': {e}", bootstrap.class_identifier);
            std::process::exit(1);
        }
    };

    let agent_id = AgentId::new(bootstrap.instance_name.clone());
    let client = match AgentClient::connect(("127.0.0.1", bootstrap.router_port), agent_id.clone()).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("worker failed to connect to router: {e}");
            std::process::exit(1);
        }
    };

    let mut context = AgentContext::new(agent_id);
    let mut state: AgentState = bootstrap
        .initial_state
        .as_ref()
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    loop {
        tokio::select! {
            _ = wait_for_shutdown_signal() => break,
            _ = tokio::time::sleep(WORKER_ITERATE_INTERVAL) => {
                let outcome: Result<(), fleet::error::FleetError> = async {
                    fleet::passive_loop::run_once(&agent, &client, &mut context, &mut state, &[]).await?;
                    // Runs every tick regardless of whether a message was just processed;
                    // this is what drives a team's time-boxed collaboration polling
                    // (decentralized voting's deadline/decision check) even when idle.
                    for envelope in agent.tick(&mut state).await? {
                        client.send_message(envelope).await?;
                    }
                    Ok(())
                }.await;

                match outcome {
                    Ok(()) => {
                        if let Err(e) = client.push_state(&state).await {
                            tracing::warn!(error = %e, "failed to push state to router");
                        }
                    }
                    Err(e) => {
                        eprintln!("agent iterate error: {e}");
                        std::process::exit(1);
                    }
                }
            }
        }
    }
}
