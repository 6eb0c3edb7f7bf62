//! Generation - the LLM capability consumed by executors.
//!
//! Executors hand a [`Generation`] exactly three messages per step (system,
//! latest user, assistant placeholder) plus the step's [`ToolSet`], and
//! receive the response as a stream of [`LlmChunk`]s through a callback.

pub mod echo;
pub mod openai;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::models::run::{Attachment, Message};
use crate::tools::ToolSet;

pub use echo::EchoGeneration;
pub use openai::{OpenAiConfig, OpenAiGeneration};

/// Incremental piece of a generated response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LlmChunk {
    /// Text appended to the assistant message. `done` marks the last chunk.
    Content { text: String, done: bool },
    /// Transient progress text (e.g. "Calling search...")
    Status { text: String },
    ToolCall(ToolCallChunk),
    Attachment(Attachment),
    Usage {
        prompt_tokens: u64,
        completion_tokens: u64,
    },
}

impl LlmChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Content {
            text: text.into(),
            done: false,
        }
    }

    /// Empty terminating content chunk.
    pub fn done() -> Self {
        Self::Content {
            text: String::new(),
            done: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallChunk {
    pub id: String,
    pub name: String,
    pub params: serde_json::Value,
    /// Present once the call completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub done: bool,
}

/// JSON schema constraint for a step's output.
#[derive(Debug, Clone, Serialize)]
pub struct StructuredOutput {
    pub name: String,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub engine: String,
    pub model: String,
    pub streaming: bool,
    pub structured_output: Option<StructuredOutput>,
    /// Provider-specific fields merged into the request body
    pub model_opts: serde_json::Map<String, serde_json::Value>,
}

/// One step's generation input.
pub struct GenerationRequest<'a> {
    pub system: &'a Message,
    pub user: &'a Message,
    pub assistant: &'a Message,
    pub options: &'a GenerationOptions,
    pub tools: &'a ToolSet,
    pub abort: &'a CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Success,
    /// The model rejected a streaming request; retry with streaming off.
    StreamingNotSupported,
    Error(String),
    /// Stopped through the abort signal
    Stopped,
}

pub type ChunkSink<'a> = &'a mut (dyn FnMut(LlmChunk) + Send);

#[async_trait]
pub trait Generation: Send + Sync {
    async fn generate(
        &self,
        request: GenerationRequest<'_>,
        on_chunk: ChunkSink<'_>,
    ) -> GenerationOutcome;

    /// Short conversation title.
    async fn title(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<String, CoreError>;
}

/// Instructions appended to a prompt whose output must follow `schema`.
pub fn structured_output_instructions(prompt: &str, schema: &serde_json::Value) -> String {
    let pretty = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!(
        "{}\n\nRespond only with a JSON object that validates against this JSON schema. \
         Do not wrap it in markdown.\n\n{}",
        prompt, pretty
    )
}

/// Title candidate cleaned of quotes, trailing punctuation and extra lines.
pub fn clean_title(raw: &str) -> String {
    let first = raw.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    let trimmed = first
        .trim_start_matches(['"', '\'', '#', ' '])
        .trim_end_matches(['"', '\'', '.', ' ']);
    let mut title: String = trimmed.chars().take(80).collect();
    if title.is_empty() {
        title = "New run".to_string();
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("\n\"Weekly report.\"\nextra"), "Weekly report");
        assert_eq!(clean_title("## Plan"), "Plan");
        assert_eq!(clean_title("  "), "New run");
    }

    #[test]
    fn test_structured_output_instructions() {
        let schema = serde_json::json!({ "type": "object" });
        let prompt = structured_output_instructions("List cities", &schema);
        assert!(prompt.starts_with("List cities\n\n"));
        assert!(prompt.contains("\"type\": \"object\""));
    }

    #[test]
    fn test_chunk_serialization_is_tagged() {
        let json = serde_json::to_value(LlmChunk::text("hi")).unwrap();
        assert_eq!(json["type"], "content");
        assert_eq!(json["done"], false);
    }
}
