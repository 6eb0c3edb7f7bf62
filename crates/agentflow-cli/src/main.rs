//! agentflow CLI - run declarative multi-step agents from the terminal.
//!
//! Reuses the same engine (agentflow-core) and server bootstrap
//! (agentflow-server) as the HTTP API.

use clap::{Parser, Subcommand};

use agentflow_cli::commands::{self, run::RunArgs, EngineArgs};

/// agentflow - declarative multi-step agents
#[derive(Parser)]
#[command(name = "agentflow", version, about = "agentflow - run declarative multi-step agents")]
pub struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "AGENTFLOW_DB_PATH", default_value = "agentflow.db", global = true)]
    db: String,

    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an agent definition file (YAML or JSON)
    Run {
        /// Path to the agent file
        file: String,
        /// Import sub-agent definitions from this directory first
        #[arg(long)]
        agents_dir: Option<String>,
        #[command(flatten)]
        run: RunArgs,
    },

    /// Validate an agent definition file without running it
    Validate {
        /// Path to the agent file
        file: String,
    },

    /// Manage stored agents
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },

    /// Inspect persisted runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },

    /// Start the agentflow HTTP server
    Server {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(long, default_value_t = 3210)]
        port: u16,
        /// Seconds between schedule ticks (0 disables schedules)
        #[arg(long, default_value_t = 30)]
        tick_interval: u64,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    /// Import an agent file or a directory of agent files
    Import {
        path: String,
    },
    /// List agents in a workspace
    List {
        #[arg(long, default_value = "default")]
        workspace_id: String,
    },
    /// Print a stored agent as JSON
    Show {
        id: String,
    },
    /// Delete an agent and its runs
    Delete {
        id: String,
    },
    /// Run a stored agent
    Run {
        id: String,
        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Subcommand)]
enum RunsAction {
    /// List recent runs of an agent
    List {
        agent_id: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one run
    Show {
        agent_id: String,
        run_id: String,
        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    // Before parsing, so env fallbacks see .env values
    commands::load_dotenv();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "agentflow_core=warn,agentflow_server=info,agentflow_cli=info".into()
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = dispatch(cli).await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<(), String> {
    let engine = commands::engine_config(&cli.engine);

    match cli.command {
        Commands::Validate { file } => commands::run::validate(&file),

        Commands::Server {
            host,
            port,
            tick_interval,
        } => commands::server::run(host, port, cli.db, tick_interval, engine).await,

        Commands::Run {
            file,
            agents_dir,
            run,
        } => {
            let state = commands::init_state(&cli.db, engine)?;
            commands::run::run_file(&state, &file, agents_dir.as_deref(), &run).await
        }

        Commands::Agent { action } => {
            let state = commands::init_state(&cli.db, engine)?;
            match action {
                AgentAction::Import { path } => {
                    commands::agent::import(&state, &path).await.map(|_| ())
                }
                AgentAction::List { workspace_id } => {
                    commands::agent::list(&state, &workspace_id).await
                }
                AgentAction::Show { id } => commands::agent::show(&state, &id).await,
                AgentAction::Delete { id } => commands::agent::delete(&state, &id).await,
                AgentAction::Run { id, run } => commands::agent::run(&state, &id, &run).await,
            }
        }

        Commands::Runs { action } => {
            let state = commands::init_state(&cli.db, engine)?;
            match action {
                RunsAction::List { agent_id, limit } => {
                    commands::runs::list(&state, &agent_id, limit).await
                }
                RunsAction::Show {
                    agent_id,
                    run_id,
                    json,
                } => commands::runs::show(&state, &agent_id, &run_id, json).await,
            }
        }
    }
}
