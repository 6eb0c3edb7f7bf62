//! A2A Executor - delegates the whole turn to a remote agent.
//!
//! The agent's `instructions` hold the remote agent URL. One user/assistant
//! pair is created and the remote event stream is folded into the assistant
//! message as it arrives.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;

use super::{
    abort_if_requested, apology, save_run, title_chat, Executor, ExecutorContext,
    LifecycleEvent, RunOptions,
};
use crate::a2a::A2aEvent;
use crate::error::CoreError;
use crate::generation::{GenerationOptions, LlmChunk};
use crate::models::agent::Agent;
use crate::models::run::{Attachment, Message, RunRecord, RunStatus, RunTrigger};

pub struct A2aExecutor {
    agent: Agent,
    ctx: Arc<ExecutorContext>,
}

/// Artifact block appended to the assistant message.
pub fn render_artifact(name: &str, content: &str) -> String {
    format!("\n\n<artifact title=\"{}\">\n{}\n</artifact>\n\n", name, content)
}

impl A2aExecutor {
    pub fn new(agent: Agent, ctx: Arc<ExecutorContext>) -> Self {
        Self { agent, ctx }
    }

    fn url(&self) -> &str {
        self.agent.instructions.as_deref().unwrap_or("").trim()
    }

    /// Stream the remote answer into the run. `Ok(false)` means the run was
    /// canceled mid-stream.
    async fn stream_answer(
        &self,
        run: &mut RunRecord,
        prompt: &str,
        opts: &RunOptions,
    ) -> Result<bool, CoreError> {
        opts.emit(LifecycleEvent::BeforeGeneration, run);
        let mut events = self.ctx.a2a.execute(self.url(), prompt, &opts.abort).await?;

        while let Some(event) = events.next().await {
            if abort_if_requested(&self.ctx, run, opts).await {
                return Ok(false);
            }
            let chunks = match event? {
                A2aEvent::Content(text) => vec![LlmChunk::text(text)],
                A2aEvent::Status(text) => vec![LlmChunk::Status { text }],
                A2aEvent::Artifact {
                    name,
                    mime_type,
                    content,
                } => vec![
                    LlmChunk::text(render_artifact(&name, &content)),
                    LlmChunk::Attachment(Attachment {
                        name,
                        mime_type,
                        content,
                    }),
                ],
            };

            for chunk in chunks {
                if let Some(last) = run.last_message_mut() {
                    match &chunk {
                        LlmChunk::Content { text, .. } => last.append_text(text),
                        LlmChunk::Status { text } => last.status_text = Some(text.clone()),
                        LlmChunk::Attachment(attachment) => last.attach(attachment.clone()),
                        _ => {}
                    }
                }
                if let Some(chat) = &opts.chat {
                    chat.on_chunk(&chunk);
                }
            }
            run.touch();
        }

        if let Some(last) = run.last_message_mut() {
            last.status_text = None;
        }
        if let Some(chat) = &opts.chat {
            chat.on_chunk(&LlmChunk::done());
        }
        Ok(true)
    }
}

#[async_trait]
impl Executor for A2aExecutor {
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
        run.push_message(Message::system(""));
        if !opts.ephemeral {
            self.ctx.runs.save(&run).await?;
        }

        if abort_if_requested(&self.ctx, &mut run, &opts).await {
            opts.emit(LifecycleEvent::GenerationDone, &run);
            return Ok(Some(run));
        }

        if prompt.trim().is_empty() {
            tracing::warn!("[A2aExecutor] Empty prompt for agent {}", self.agent.id);
            run.fail("Empty prompt");
            save_run(&self.ctx, &run, &opts).await;
            return Ok(None);
        }

        let user = Message::user(prompt);
        let assistant = Message::assistant_placeholder();
        if let Some(chat) = &opts.chat {
            chat.add_message(user.clone());
            chat.add_message(assistant.clone());
        }
        run.push_message(user);
        run.push_message(assistant);
        save_run(&self.ctx, &run, &opts).await;

        tracing::info!(
            "[A2aExecutor] Starting run {} of agent {} -> {}",
            run.id,
            self.agent.id,
            self.url()
        );

        match self.stream_answer(&mut run, prompt, &opts).await {
            Ok(true) => {
                let options = GenerationOptions {
                    engine: "a2a".to_string(),
                    model: self.agent.model.clone().unwrap_or_default(),
                    ..Default::default()
                };
                title_chat(&self.ctx, &run, &opts, &options).await;
                run.transition(RunStatus::Success);
            }
            Ok(false) => {}
            Err(e) => {
                if abort_if_requested(&self.ctx, &mut run, &opts).await {
                    tracing::info!("[A2aExecutor] Run {} canceled during remote call: {}", run.id, e);
                } else {
                    let message = e.to_string();
                    tracing::error!("[A2aExecutor] Run {} failed: {}", run.id, message);
                    let notice = apology(&message);
                    if let Some(last) = run.last_message_mut() {
                        if !last.content.is_empty() {
                            last.append_text("\n\n");
                        }
                        last.append_text(&notice);
                        last.status_text = None;
                    }
                    if let Some(chat) = &opts.chat {
                        chat.on_chunk(&LlmChunk::Content { text: notice, done: true });
                    }
                    run.fail(message);
                }
            }
        }

        save_run(&self.ctx, &run, &opts).await;
        tracing::info!("[A2aExecutor] Run {} finished: {}", run.id, run.status.as_str());
        opts.emit(LifecycleEvent::GenerationDone, &run);
        Ok(Some(run))
    }
}
