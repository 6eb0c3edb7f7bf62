//! Terminal rendering of a run as it streams.

use std::io::{self, Write};
use std::sync::Mutex;

use agentflow_core::chat::ChatView;
use agentflow_core::generation::LlmChunk;
use agentflow_core::models::run::{Message, MessageRole, RunRecord, RunStatus};

/// Prints assistant text to stdout as it arrives. Progress (tool calls,
/// remote status, prompts) goes to stderr when `verbose` is set, so stdout
/// stays pipeable.
pub struct StdoutChat {
    verbose: bool,
    title: Mutex<Option<String>>,
}

impl StdoutChat {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            title: Mutex::new(None),
        }
    }

    pub fn title(&self) -> Option<String> {
        self.title.lock().ok().and_then(|t| t.clone())
    }
}

impl ChatView for StdoutChat {
    fn add_message(&self, message: Message) {
        match message.role {
            MessageRole::User if self.verbose => eprintln!("\n› {}\n", message.content),
            MessageRole::Assistant if self.verbose => {
                if let Some(status) = &message.status_text {
                    eprintln!("── {} ──", status);
                }
            }
            _ => {}
        }
    }

    fn on_chunk(&self, chunk: &LlmChunk) {
        match chunk {
            LlmChunk::Content { text, done } => {
                let mut out = io::stdout().lock();
                let _ = out.write_all(text.as_bytes());
                if *done {
                    let _ = out.write_all(b"\n");
                }
                let _ = out.flush();
            }
            LlmChunk::Status { text } if self.verbose => eprintln!("  … {}", text),
            LlmChunk::ToolCall(call) if self.verbose && call.done => {
                eprintln!("  ⚙ {} finished", call.name)
            }
            LlmChunk::Attachment(attachment) if self.verbose => {
                eprintln!("  📎 {} ({})", attachment.name, attachment.mime_type)
            }
            LlmChunk::Usage {
                prompt_tokens,
                completion_tokens,
            } if self.verbose => {
                eprintln!("  tokens: {} in / {} out", prompt_tokens, completion_tokens)
            }
            _ => {}
        }
    }

    fn has_title(&self) -> bool {
        self.title().is_some()
    }

    fn set_title(&self, title: String) {
        if let Ok(mut t) = self.title.lock() {
            *t = Some(title);
        }
    }
}

/// One-line summary printed after a run.
pub fn run_summary(run: &RunRecord) -> String {
    let icon = match run.status {
        RunStatus::Success => "✅",
        RunStatus::Canceled => "⏹",
        RunStatus::Error => "❌",
        RunStatus::Running => "…",
    };
    let mut line = format!(
        "{} Run {} of '{}': {}",
        icon,
        run.id,
        run.agent_id,
        run.status.as_str()
    );
    if let Some(error) = &run.error {
        line.push_str(&format!(" ({})", error));
    }
    if !run.tool_calls.is_empty() {
        line.push_str(&format!(", {} tool call(s)", run.tool_calls.len()));
    }
    line
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}
