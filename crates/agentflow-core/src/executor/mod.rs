//! Executors - turn an agent definition into a run.
//!
//! Two strategies sit behind the [`Executor`] trait:
//!
//! - [`WorkflowExecutor`]: local multi-step generation loop
//! - [`A2aExecutor`]: the whole turn is delegated to a remote agent
//!
//! Callers obtain one through [`executor_for`] and never branch on the
//! agent's source themselves.

pub mod a2a;
pub mod workflow;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::a2a::A2aClient;
use crate::chat::ChatView;
use crate::docrepo::DocRepository;
use crate::error::CoreError;
use crate::generation::{Generation, LlmChunk};
use crate::locale::LocaleSettings;
use crate::models::agent::Agent;
use crate::models::run::{RunRecord, RunStatus, RunTrigger};
use crate::tools::ToolRegistry;

pub use a2a::A2aExecutor;
pub use workflow::WorkflowExecutor;

// ─── Consumed capabilities ──────────────────────────────────────────────

/// Resolves sub-agent ids referenced by steps.
#[async_trait]
pub trait AgentLookup: Send + Sync {
    async fn list_agents(&self, workspace_id: &str) -> Result<Vec<Agent>, CoreError>;
}

/// Durable run storage keyed by `(agent_id, run_id)`.
#[async_trait]
pub trait RunPersistence: Send + Sync {
    async fn save(&self, run: &RunRecord) -> Result<(), CoreError>;

    async fn load(&self, agent_id: &str, run_id: &str) -> Result<Option<RunRecord>, CoreError>;
}

/// Fallback engine/model when neither the step, the agent nor the caller
/// picks one.
#[derive(Debug, Clone)]
pub struct EngineDefaults {
    pub engine: String,
    pub model: String,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self {
            engine: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Everything an executor talks to.
pub struct ExecutorContext {
    pub generation: Arc<dyn Generation>,
    pub tools: ToolRegistry,
    pub agents: Arc<dyn AgentLookup>,
    pub docrepo: Option<Arc<dyn DocRepository>>,
    pub runs: Arc<dyn RunPersistence>,
    pub a2a: Arc<dyn A2aClient>,
    pub locale: LocaleSettings,
    pub defaults: EngineDefaults,
}

// ─── Produced interface ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    BeforeGeneration,
    BeforeTitle,
    GenerationDone,
}

pub type LifecycleCallback = Arc<dyn Fn(LifecycleEvent, &RunRecord) + Send + Sync>;

/// Per-call options for [`Executor::run`].
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Pre-assigned run id, so the run can be addressed before it finishes
    pub run_id: Option<String>,
    /// Overrides the agent's workspace
    pub workspace_id: Option<String>,
    /// Never persisted
    pub ephemeral: bool,
    pub abort: CancellationToken,
    pub chat: Option<Arc<dyn ChatView>>,
    pub engine: Option<String>,
    pub model: Option<String>,
    /// Overrides the agent's locale
    pub locale: Option<String>,
    pub on_event: Option<LifecycleCallback>,
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("run_id", &self.run_id)
            .field("workspace_id", &self.workspace_id)
            .field("ephemeral", &self.ephemeral)
            .field("aborted", &self.abort.is_cancelled())
            .field("chat", &self.chat.is_some())
            .field("engine", &self.engine)
            .field("model", &self.model)
            .field("locale", &self.locale)
            .finish()
    }
}

impl RunOptions {
    /// Options for a nested sub-agent run: same workspace, persistence mode
    /// and engine choice, cancelled together with `abort`.
    pub fn child(&self, abort: &CancellationToken) -> Self {
        Self {
            run_id: None,
            workspace_id: self.workspace_id.clone(),
            ephemeral: self.ephemeral,
            abort: abort.child_token(),
            chat: None,
            engine: self.engine.clone(),
            model: self.model.clone(),
            locale: None,
            on_event: None,
        }
    }

    fn emit(&self, event: LifecycleEvent, run: &RunRecord) {
        if let Some(cb) = &self.on_event {
            cb(event, run);
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    fn agent(&self) -> &Agent;

    /// Execute the agent once. Returns `None` when the resolved prompt is
    /// empty; otherwise the run in its terminal state.
    async fn run(
        &self,
        trigger: RunTrigger,
        prompt: &str,
        opts: RunOptions,
    ) -> Result<Option<RunRecord>, CoreError>;
}

/// Pick the execution strategy for `agent`.
pub fn executor_for(agent: Agent, ctx: Arc<ExecutorContext>) -> Box<dyn Executor> {
    if agent.is_remote() {
        Box::new(A2aExecutor::new(agent, ctx))
    } else {
        Box::new(WorkflowExecutor::new(agent, ctx))
    }
}

// ─── Shared primitives ──────────────────────────────────────────────────

/// Persist `run` unless the run is ephemeral. Failures are logged; the run
/// keeps going.
pub(crate) async fn save_run(ctx: &ExecutorContext, run: &RunRecord, opts: &RunOptions) {
    if opts.ephemeral {
        return;
    }
    if let Err(e) = ctx.runs.save(run).await {
        tracing::warn!("[Executor] Failed to persist run {}: {}", run.id, e);
    }
}

/// Stop point check. When the abort signal is set: mark the run canceled,
/// persist it, terminate the chat view's current message and return `true`.
pub async fn abort_if_requested(
    ctx: &ExecutorContext,
    run: &mut RunRecord,
    opts: &RunOptions,
) -> bool {
    if !opts.abort.is_cancelled() {
        return false;
    }

    if run.transition(RunStatus::Canceled) {
        tracing::info!("[Executor] Run {} canceled", run.id);
    }
    if let Some(last) = run.last_message_mut() {
        last.status_text = None;
    }
    save_run(ctx, run, opts).await;
    if let Some(chat) = &opts.chat {
        chat.on_chunk(&LlmChunk::done());
    }
    true
}

/// Title the attached chat view if it has none yet.
pub(crate) async fn title_chat(
    ctx: &ExecutorContext,
    run: &RunRecord,
    opts: &RunOptions,
    options: &crate::generation::GenerationOptions,
) {
    let Some(chat) = &opts.chat else { return };
    if chat.has_title() {
        return;
    }
    opts.emit(LifecycleEvent::BeforeTitle, run);
    match ctx.generation.title(&run.messages, options).await {
        Ok(title) => chat.set_title(title),
        Err(e) => tracing::warn!("[Executor] Failed to title run {}: {}", run.id, e),
    }
}

/// Text appended to the assistant message of a failed step.
pub(crate) fn apology(error: &str) -> String {
    format!("Sorry, I could not finish this answer: {}", error)
}
