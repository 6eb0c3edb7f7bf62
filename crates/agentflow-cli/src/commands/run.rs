//! `agentflow run` / `agentflow validate` - run or check an agent file.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use agentflow_core::executor::RunOptions;
use agentflow_core::models::agent::{Agent, AgentLoader, AgentStep};
use agentflow_core::models::run::{RunRecord, RunStatus, RunTrigger};
use agentflow_core::template;
use agentflow_core::triggers::{build_trigger_prompt, run_to_completion};
use agentflow_core::AppState;

use super::output::{run_summary, StdoutChat};
use super::parse_inputs;

/// Per-run flags of `agentflow run` and `agentflow agent run`.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct RunArgs {
    /// Prompt for the first step (otherwise its template is filled from --input)
    #[arg(short = 'p', long)]
    pub prompt: Option<String>,

    /// Template input as key=value (repeatable)
    #[arg(short = 'i', long = "input")]
    pub inputs: Vec<String>,

    /// Do not persist the run
    #[arg(long)]
    pub ephemeral: bool,

    /// Answer in this locale (e.g. fr-FR)
    #[arg(long)]
    pub locale: Option<String>,

    /// Show prompts, step labels and tool activity on stderr
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// Run the agent defined in `file`.
pub async fn run_file(
    state: &AppState,
    file: &str,
    agents_dir: Option<&str>,
    args: &RunArgs,
) -> Result<(), String> {
    if let Some(dir) = agents_dir {
        let count = import_dir(state, dir).await?;
        tracing::info!("[Cli] Imported {} sub-agent(s) from '{}'", count, dir);
    }

    let agent = Agent::from_file(file)?;
    agent.validate()?;
    run_agent(state, agent, args).await
}

/// Run `agent` in the foreground. Ctrl+C cancels the run.
pub async fn run_agent(state: &AppState, agent: Agent, args: &RunArgs) -> Result<(), String> {
    let abort = CancellationToken::new();
    let watcher = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCanceling...");
            watcher.cancel();
        }
    });

    let run = execute(state, agent, args, abort).await?;
    eprintln!("\n{}", run_summary(&run));
    match run.status {
        RunStatus::Success => Ok(()),
        RunStatus::Canceled => Err("Run canceled".to_string()),
        _ => Err(run.error.unwrap_or_else(|| "Run failed".to_string())),
    }
}

/// Execute `agent` with terminal output and return the final record.
pub async fn execute(
    state: &AppState,
    agent: Agent,
    args: &RunArgs,
    abort: CancellationToken,
) -> Result<RunRecord, String> {
    let inputs = parse_inputs(&args.inputs)?;
    let prompt =
        build_trigger_prompt(&agent, args.prompt.as_deref(), &inputs).map_err(|e| e.to_string())?;

    let opts = RunOptions {
        ephemeral: args.ephemeral,
        abort,
        chat: Some(Arc::new(StdoutChat::new(args.verbose))),
        locale: args.locale.clone(),
        ..Default::default()
    };

    let agent_id = agent.id.clone();
    run_to_completion(state, agent, RunTrigger::Manual, prompt, opts)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Agent '{}' produced no run: the prompt is empty", agent_id))
}

/// Import every agent definition in `dir` into the store.
pub async fn import_dir(state: &AppState, dir: &str) -> Result<usize, String> {
    let mut loader = AgentLoader::new();
    loader.load_dir(dir)?;
    for agent in loader.all().values() {
        state
            .agent_store
            .save(agent)
            .await
            .map_err(|e| format!("Failed to save agent '{}': {}", agent.id, e))?;
    }
    Ok(loader.all().len())
}

/// Validate an agent file without running it.
pub fn validate(file: &str) -> Result<(), String> {
    let agent = Agent::from_file(file)?;
    agent.validate()?;

    println!("✅ Agent '{}' ({}) is valid", agent.name, agent.id);
    println!("   Source: {}", agent.source.as_str());
    if let Some(engine) = &agent.engine {
        println!("   Engine: {}", engine);
    }
    if let Some(model) = &agent.model {
        println!("   Model: {}", model);
    }
    println!("   Steps: {}", agent.steps.len());

    for (i, step) in agent.steps.iter().enumerate() {
        println!(
            "   {}. {} (tools: {}{})",
            i + 1,
            step.description.as_deref().unwrap_or("(no description)"),
            describe_tools(step),
            if step.agents.is_empty() {
                String::new()
            } else {
                format!(", agents: {}", step.agents.join(", "))
            }
        );
    }

    let inputs = agent
        .steps
        .first()
        .and_then(|s| s.prompt.as_deref())
        .map(template::extract_inputs)
        .unwrap_or_default();
    if !inputs.is_empty() {
        println!("   Inputs:");
        for input in inputs {
            let mut line = format!("     - {}", input.name);
            if let Some(d) = &input.description {
                line.push_str(&format!(": {}", d));
            }
            if let Some(v) = &input.default_value {
                line.push_str(&format!(" (default: {})", v));
            }
            println!("{}", line);
        }
    }
    Ok(())
}

fn describe_tools(step: &AgentStep) -> String {
    match &step.tools {
        None => "all".to_string(),
        Some(tools) if tools.is_empty() => "none".to_string(),
        Some(tools) => tools.join(", "),
    }
}
