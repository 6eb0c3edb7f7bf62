//! Workflow Executor - runs an agent's steps locally, one generation each.
//!
//! Per step:
//! 1. Resolve the prompt (caller prompt for step 0, `{{output.N}}` later)
//! 2. Optionally enrich it from a document repository and a JSON schema
//! 3. Rebuild the step's tool set
//! 4. Stream one generation into a fresh user/assistant message pair
//!
//! Failures are caught once per run; cancellation always wins.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    abort_if_requested, apology, save_run, title_chat, Executor, ExecutorContext,
    LifecycleEvent, RunOptions,
};
use crate::docrepo::render_context;
use crate::error::CoreError;
use crate::generation::{
    structured_output_instructions, GenerationOptions, GenerationOutcome, GenerationRequest,
    LlmChunk, StructuredOutput,
};
use crate::models::agent::{Agent, AgentStep};
use crate::models::run::{Message, MessageRole, RunRecord, RunStatus, RunTrigger, ToolCallRecord};
use crate::template;
use crate::tools::{resolve_step_tools, AgentPlugin, ToolSet};

pub struct WorkflowExecutor {
    agent: Agent,
    ctx: Arc<ExecutorContext>,
}

/// How the step loop ended, short of an error.
enum StepsEnd {
    Completed,
    Canceled,
    EmptyPrompt,
}

impl WorkflowExecutor {
    pub fn new(agent: Agent, ctx: Arc<ExecutorContext>) -> Self {
        Self { agent, ctx }
    }

    /// Prompt for step `index` before docrepo/schema enrichment.
    pub fn resolve_prompt(index: usize, step: &AgentStep, caller_prompt: &str, outputs: &[String]) -> String {
        let template_text = step.prompt.as_deref().unwrap_or("");
        if index == 0 {
            if !caller_prompt.trim().is_empty() {
                return caller_prompt.to_string();
            }
            return template::fill(template_text, &HashMap::new());
        }
        template::fill(template_text, &template::output_values(outputs))
    }

    fn generation_options(&self, step: &AgentStep, opts: &RunOptions) -> GenerationOptions {
        let defaults = &self.ctx.defaults;
        let engine = step
            .engine
            .clone()
            .or_else(|| self.agent.engine.clone())
            .or_else(|| opts.engine.clone())
            .unwrap_or_else(|| defaults.engine.clone());
        let model = step
            .model
            .clone()
            .or_else(|| self.agent.model.clone())
            .or_else(|| opts.model.clone())
            .unwrap_or_else(|| defaults.model.clone());

        GenerationOptions {
            engine,
            model,
            streaming: !self.agent.disable_streaming,
            structured_output: None,
            model_opts: self.agent.model_opts.clone(),
        }
    }

    async fn attach_tools(
        &self,
        toolset: &mut ToolSet,
        step: &AgentStep,
        workspace_id: &str,
        opts: &RunOptions,
    ) -> Result<(), CoreError> {
        resolve_step_tools(toolset, &self.ctx.tools, step.tools.as_deref()).await;

        if step.agents.is_empty() {
            return Ok(());
        }

        let agents = self.ctx.agents.list_agents(workspace_id).await?;
        for id in &step.agents {
            match agents.iter().find(|a| &a.id == id) {
                Some(sub) => {
                    toolset.add_plugin(Arc::new(AgentPlugin::new(sub.clone(), self.ctx.clone(), opts)));
                }
                None => tracing::warn!(
                    "[WorkflowExecutor] Sub-agent '{}' not found in workspace {}",
                    id,
                    workspace_id
                ),
            }
        }
        Ok(())
    }

    /// Docrepo context, structured output and tools for one step. `Ok(None)`
    /// means the run was canceled on the way.
    async fn prepare_step(
        &self,
        run: &mut RunRecord,
        index: usize,
        step: &AgentStep,
        prompt: &str,
        toolset: &mut ToolSet,
        opts: &RunOptions,
    ) -> Result<Option<(String, GenerationOptions)>, CoreError> {
        let mut step_prompt = prompt.to_string();

        if let Some(repo_id) = &step.docrepo {
            if abort_if_requested(&self.ctx, run, opts).await {
                return Ok(None);
            }
            match &self.ctx.docrepo {
                Some(docrepo) => {
                    let results = docrepo.query(repo_id, &step_prompt).await?;
                    tracing::debug!(
                        "[WorkflowExecutor] Docrepo {} returned {} results",
                        repo_id,
                        results.len()
                    );
                    step_prompt = render_context(&step_prompt, &results);
                }
                None => tracing::warn!(
                    "[WorkflowExecutor] Step {} uses docrepo {} but none is configured",
                    index + 1,
                    repo_id
                ),
            }
        }

        let mut options = self.generation_options(step, opts);
        if let Some(schema) = &step.json_schema {
            step_prompt = structured_output_instructions(&step_prompt, schema);
            options.structured_output = Some(StructuredOutput {
                name: format!("step_{}_output", index + 1),
                schema: schema.clone(),
            });
        }

        if abort_if_requested(&self.ctx, run, opts).await {
            return Ok(None);
        }
        let workspace_id = run.workspace_id.clone();
        self.attach_tools(toolset, step, &workspace_id, opts).await?;

        Ok(Some((step_prompt, options)))
    }

    /// Push the step's user message and in-flight assistant message.
    async fn open_step(&self, run: &mut RunRecord, step: &AgentStep, prompt: String, opts: &RunOptions) {
        let user = Message::user(prompt);
        let mut assistant = Message::assistant_placeholder();
        assistant.status_text = step.description.clone();
        if let Some(chat) = &opts.chat {
            chat.add_message(user.clone());
            chat.add_message(assistant.clone());
        }
        run.push_message(user);
        run.push_message(assistant);
        save_run(&self.ctx, run, opts).await;
    }

    /// Close the failed step's assistant message with a readable notice.
    fn apologize(&self, run: &mut RunRecord, opts: &RunOptions, message: String) {
        tracing::error!("[WorkflowExecutor] Run {} failed: {}", run.id, message);
        let mut notice = apology(&message);
        if let Some(last) = run.last_message_mut().filter(|m| m.role == MessageRole::Assistant) {
            if !last.content.is_empty() {
                notice.insert_str(0, "\n\n");
            }
            last.append_text(&notice);
            last.status_text = None;
        }
        if let Some(chat) = &opts.chat {
            chat.on_chunk(&LlmChunk::Content { text: notice, done: true });
        }
        run.fail(message);
    }

    async fn run_steps(
        &self,
        run: &mut RunRecord,
        prompt: &str,
        opts: &RunOptions,
    ) -> Result<StepsEnd, CoreError> {
        let mut outputs: Vec<String> = Vec::new();
        let mut toolset = ToolSet::new();
        let mut last_options = None;

        for (index, step) in self.agent.steps.iter().enumerate() {
            if abort_if_requested(&self.ctx, run, opts).await {
                return Ok(StepsEnd::Canceled);
            }

            let step_prompt = Self::resolve_prompt(index, step, prompt, &outputs);
            if step_prompt.trim().is_empty() {
                tracing::warn!(
                    "[WorkflowExecutor] Step {} of agent {} resolved to an empty prompt",
                    index + 1,
                    self.agent.id
                );
                return Ok(StepsEnd::EmptyPrompt);
            }

            let (step_prompt, mut options) =
                match self.prepare_step(run, index, step, &step_prompt, &mut toolset, opts).await {
                    Ok(Some(prepared)) => prepared,
                    Ok(None) => return Ok(StepsEnd::Canceled),
                    Err(e) => {
                        // The notice belongs to this step, not the previous answer
                        self.open_step(run, step, step_prompt, opts).await;
                        return Err(e);
                    }
                };
            self.open_step(run, step, step_prompt, opts).await;

            tracing::info!(
                "[WorkflowExecutor] Run {} step {}/{} (model: {}, tools: {:?})",
                run.id,
                index + 1,
                self.agent.steps.len(),
                options.model,
                toolset.plugin_names()
            );

            let mut outcome = self.generate(run, &toolset, &options, opts).await;
            if outcome == GenerationOutcome::StreamingNotSupported && options.streaming {
                tracing::info!(
                    "[WorkflowExecutor] Streaming not supported by {}, retrying step {} without it",
                    options.model,
                    index + 1
                );
                options.streaming = false;
                if let Some(last) = run.last_message_mut() {
                    last.content.clear();
                }
                outcome = self.generate(run, &toolset, &options, opts).await;
            }

            match outcome {
                GenerationOutcome::Success => {}
                GenerationOutcome::Stopped if opts.abort.is_cancelled() => {
                    abort_if_requested(&self.ctx, run, opts).await;
                    return Ok(StepsEnd::Canceled);
                }
                GenerationOutcome::Stopped => {
                    return Err(CoreError::Generation("Generation stopped".to_string()))
                }
                GenerationOutcome::StreamingNotSupported => {
                    return Err(CoreError::Generation(format!(
                        "Model {} rejected the request",
                        options.model
                    )))
                }
                GenerationOutcome::Error(message) => return Err(CoreError::Generation(message)),
            }

            if let Some(last) = run.last_message_mut() {
                last.status_text = None;
            }
            run.touch();
            save_run(&self.ctx, run, opts).await;

            outputs.push(run.last_output().unwrap_or_default().to_string());
            last_options = Some(options);
        }

        if let Some(options) = &last_options {
            title_chat(&self.ctx, run, opts, options).await;
        }
        Ok(StepsEnd::Completed)
    }

    /// One generation call over the last three messages of the run.
    async fn generate(
        &self,
        run: &mut RunRecord,
        toolset: &ToolSet,
        options: &GenerationOptions,
        opts: &RunOptions,
    ) -> GenerationOutcome {
        opts.emit(LifecycleEvent::BeforeGeneration, run);

        let n = run.messages.len();
        let (system, user, assistant) = (
            run.messages[0].clone(),
            run.messages[n - 2].clone(),
            run.messages[n - 1].clone(),
        );
        let chat = opts.chat.clone();

        let mut on_chunk = |chunk: LlmChunk| {
            apply_chunk(run, &chunk);
            if let Some(chat) = &chat {
                chat.on_chunk(&chunk);
            }
        };

        self.ctx
            .generation
            .generate(
                GenerationRequest {
                    system: &system,
                    user: &user,
                    assistant: &assistant,
                    options,
                    tools: toolset,
                    abort: &opts.abort,
                },
                &mut on_chunk,
            )
            .await
    }
}

/// Fold a streamed chunk into the run's in-flight assistant message.
fn apply_chunk(run: &mut RunRecord, chunk: &LlmChunk) {
    match chunk {
        LlmChunk::Content { text, done } => {
            if let Some(last) = run.last_message_mut() {
                last.append_text(text);
                if *done {
                    last.status_text = None;
                }
            }
        }
        LlmChunk::Status { text } => {
            if let Some(last) = run.last_message_mut() {
                last.status_text = Some(text.clone());
            }
        }
        LlmChunk::Attachment(attachment) => {
            if let Some(last) = run.last_message_mut() {
                last.attach(attachment.clone());
            }
        }
        LlmChunk::ToolCall(call) if call.done => {
            run.tool_calls.push(ToolCallRecord {
                id: call.id.clone(),
                name: call.name.clone(),
                params: call.params.clone(),
                result: call.result.clone().unwrap_or(serde_json::Value::Null),
            });
        }
        LlmChunk::ToolCall(_) | LlmChunk::Usage { .. } => {}
    }
}

#[async_trait]
impl Executor for WorkflowExecutor {
    fn agent(&self) -> &Agent {
        &self.agent
    }

    async fn run(
        &self,
        trigger: RunTrigger,
        prompt: &str,
        opts: RunOptions,
    ) -> Result<Option<RunRecord>, CoreError> {
        let workspace_id = opts
            .workspace_id
            .clone()
            .unwrap_or_else(|| self.agent.workspace_id.clone());
        let mut run = RunRecord::new(opts.run_id.clone(), &self.agent.id, &workspace_id, trigger, prompt);
        run.push_message(Message::system(self.agent.instructions.clone().unwrap_or_default()));
        if !opts.ephemeral {
            self.ctx.runs.save(&run).await?;
        }

        tracing::info!(
            "[WorkflowExecutor] Starting run {} of agent {} ({} steps, trigger: {})",
            run.id,
            self.agent.id,
            self.agent.steps.len(),
            trigger.as_str()
        );

        let locale = opts.locale.clone().or_else(|| self.agent.locale.clone());
        let locale_guard = locale.map(|l| self.ctx.locale.checkout(l));

        let result = self.run_steps(&mut run, prompt, &opts).await;

        drop(locale_guard);

        match result {
            Ok(StepsEnd::Completed) => {
                run.transition(RunStatus::Success);
            }
            Ok(StepsEnd::Canceled) => {}
            Ok(StepsEnd::EmptyPrompt) => {
                run.fail("Empty prompt");
                save_run(&self.ctx, &run, &opts).await;
                return Ok(None);
            }
            Err(e) => {
                if abort_if_requested(&self.ctx, &mut run, &opts).await {
                    tracing::info!("[WorkflowExecutor] Run {} canceled during step: {}", run.id, e);
                } else {
                    self.apologize(&mut run, &opts, e.to_string());
                }
            }
        }

        save_run(&self.ctx, &run, &opts).await;
        tracing::info!(
            "[WorkflowExecutor] Run {} finished: {}",
            run.id,
            run.status.as_str()
        );
        opts.emit(LifecycleEvent::GenerationDone, &run);
        Ok(Some(run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(prompt: &str) -> AgentStep {
        AgentStep {
            prompt: Some(prompt.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_first_step_prefers_caller_prompt() {
        let s = step("Hello {{name}}");
        assert_eq!(WorkflowExecutor::resolve_prompt(0, &s, "Hello Alice", &[]), "Hello Alice");
        assert_eq!(WorkflowExecutor::resolve_prompt(0, &s, "  ", &[]), "Hello {{name}}");
    }

    #[test]
    fn test_later_steps_chain_outputs() {
        let s = step("{{output.1}}");
        assert_eq!(
            WorkflowExecutor::resolve_prompt(1, &s, "ignored", &["X".to_string()]),
            "X"
        );
    }

    #[test]
    fn test_missing_prompt_resolves_empty() {
        let s = AgentStep::default();
        assert!(WorkflowExecutor::resolve_prompt(1, &s, "caller", &["X".to_string()]).is_empty());
    }

    #[test]
    fn test_apply_chunk_logs_completed_tool_calls_only() {
        let mut run = RunRecord::new(None, "a", "default", RunTrigger::Manual, "p");
        run.push_message(Message::assistant_placeholder());
        let call = |done: bool| {
            LlmChunk::ToolCall(crate::generation::ToolCallChunk {
                id: "c1".to_string(),
                name: "search".to_string(),
                params: serde_json::json!({}),
                result: done.then(|| serde_json::json!({ "ok": true })),
                done,
            })
        };
        apply_chunk(&mut run, &call(false));
        apply_chunk(&mut run, &LlmChunk::text("Hi"));
        apply_chunk(&mut run, &call(true));
        assert_eq!(run.tool_calls.len(), 1);
        assert_eq!(run.tool_calls[0].result["ok"], true);
        assert_eq!(run.messages[0].content, "Hi");
    }
}
