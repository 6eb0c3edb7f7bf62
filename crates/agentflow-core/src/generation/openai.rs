//! OpenAI-compatible chat completions client.
//!
//! POST {base_url}/chat/completions
//! Headers:
//!   Authorization: Bearer {api_key}
//!   content-type: application/json
//!
//! Streams with SSE when `options.streaming` is set, and runs the tool loop
//! itself: tool calls requested by the model are executed through the step's
//! [`ToolSet`] and their results fed back until the model answers in text.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{
    clean_title, ChunkSink, Generation, GenerationOptions, GenerationOutcome, GenerationRequest,
    LlmChunk, ToolCallChunk,
};
use crate::error::CoreError;
use crate::locale::LocaleSettings;
use crate::models::run::{Message, MessageRole};
use crate::sse;
use crate::tools::{ToolDefinition, ToolSet};

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    /// Model used when neither the step nor the agent names one
    pub default_model: String,
    pub timeout_secs: u64,
    /// Upper bound on model/tool round trips within one generation
    pub max_tool_rounds: usize,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            default_model: "gpt-4o-mini".to_string(),
            timeout_secs: 300,
            max_tool_rounds: 8,
        }
    }
}

impl OpenAiConfig {
    /// Read `AGENTFLOW_BASE_URL`, `AGENTFLOW_API_KEY` (or `OPENAI_API_KEY`)
    /// and `AGENTFLOW_MODEL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("AGENTFLOW_BASE_URL") {
            if !url.trim().is_empty() {
                config.base_url = url;
            }
        }
        config.api_key = std::env::var("AGENTFLOW_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .unwrap_or_default();
        if let Ok(model) = std::env::var("AGENTFLOW_MODEL") {
            if !model.trim().is_empty() {
                config.default_model = model;
            }
        }
        config
    }
}

pub struct OpenAiGeneration {
    client: reqwest::Client,
    config: OpenAiConfig,
    locale: LocaleSettings,
}

/// Result of one request to the completions endpoint.
enum Turn {
    Text,
    ToolCalls(Vec<PendingCall>),
    Outcome(GenerationOutcome),
}

#[derive(Debug, Default, Clone)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl OpenAiGeneration {
    pub fn new(config: OpenAiConfig, locale: LocaleSettings) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            config,
            locale,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn model<'a>(&'a self, options: &'a GenerationOptions) -> &'a str {
        if options.model.is_empty() {
            &self.config.default_model
        } else {
            &options.model
        }
    }

    fn system_prompt(&self, instructions: &str) -> String {
        match self.locale.current() {
            Some(locale) if !locale.is_empty() => {
                let line = format!("Always answer in the language of locale \"{}\".", locale);
                if instructions.trim().is_empty() {
                    line
                } else {
                    format!("{}\n\n{}", instructions, line)
                }
            }
            _ => instructions.to_string(),
        }
    }

    fn request_body(
        &self,
        options: &GenerationOptions,
        messages: &[Value],
        tools: &[ToolDefinition],
        stream: bool,
    ) -> Value {
        let mut body = json!({
            "model": self.model(options),
            "messages": messages,
            "stream": stream,
        });

        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }

        if let Some(structured) = &options.structured_output {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": structured.name,
                    "schema": structured.schema,
                }
            });
        }

        if let Some(obj) = body.as_object_mut() {
            for (key, value) in &options.model_opts {
                if !matches!(key.as_str(), "model" | "messages" | "stream" | "tools") {
                    obj.insert(key.clone(), value.clone());
                }
            }
        }

        body
    }

    async fn send(
        &self,
        body: &Value,
        abort: &CancellationToken,
    ) -> Result<reqwest::Response, GenerationOutcome> {
        let request = self
            .client
            .post(self.url())
            .bearer_auth(&self.config.api_key)
            .header("content-type", "application/json")
            .json(body)
            .send();

        let response = tokio::select! {
            _ = abort.cancelled() => return Err(GenerationOutcome::Stopped),
            response = request => response
                .map_err(|e| GenerationOutcome::Error(format!("HTTP request failed: {}", e)))?,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        if body["stream"] == Value::Bool(true) && is_streaming_rejection(status.as_u16(), &text) {
            tracing::info!("[OpenAiGeneration] Streaming rejected by model, caller may retry");
            return Err(GenerationOutcome::StreamingNotSupported);
        }
        Err(GenerationOutcome::Error(format!(
            "API returned {}: {}",
            status, text
        )))
    }

    /// One request. Text is forwarded to `on_chunk` as it arrives.
    async fn turn(
        &self,
        body: &Value,
        abort: &CancellationToken,
        on_chunk: &mut (dyn FnMut(LlmChunk) + Send),
    ) -> Turn {
        let response = match self.send(body, abort).await {
            Ok(response) => response,
            Err(outcome) => return Turn::Outcome(outcome),
        };

        if body["stream"] == Value::Bool(true) {
            self.read_stream(response, abort, on_chunk).await
        } else {
            self.read_json(response, on_chunk).await
        }
    }

    async fn read_json(
        &self,
        response: reqwest::Response,
        on_chunk: &mut (dyn FnMut(LlmChunk) + Send),
    ) -> Turn {
        let json: Value = match response.json().await {
            Ok(json) => json,
            Err(e) => {
                return Turn::Outcome(GenerationOutcome::Error(format!(
                    "Failed to parse response JSON: {}",
                    e
                )))
            }
        };

        let message = &json["choices"][0]["message"];
        if let Some(text) = message["content"].as_str() {
            if !text.is_empty() {
                on_chunk(LlmChunk::text(text));
            }
        }
        emit_usage(&json["usage"], on_chunk);

        let calls: Vec<PendingCall> = message["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .map(|c| PendingCall {
                        id: c["id"].as_str().unwrap_or_default().to_string(),
                        name: c["function"]["name"].as_str().unwrap_or_default().to_string(),
                        arguments: c["function"]["arguments"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        if calls.is_empty() {
            Turn::Text
        } else {
            Turn::ToolCalls(calls)
        }
    }

    async fn read_stream(
        &self,
        response: reqwest::Response,
        abort: &CancellationToken,
        on_chunk: &mut (dyn FnMut(LlmChunk) + Send),
    ) -> Turn {
        let mut events = sse::data_events(response);
        // Tool call deltas arrive split across frames, keyed by index.
        let mut calls: BTreeMap<u64, PendingCall> = BTreeMap::new();

        loop {
            let next = tokio::select! {
                _ = abort.cancelled() => return Turn::Outcome(GenerationOutcome::Stopped),
                next = events.next() => next,
            };
            let data = match next {
                None => break,
                Some(Ok(data)) => data,
                Some(Err(e)) => return Turn::Outcome(GenerationOutcome::Error(e.to_string())),
            };

            let Ok(frame) = serde_json::from_str::<Value>(&data) else {
                tracing::debug!("[OpenAiGeneration] Skipping non-JSON frame: {}", data);
                continue;
            };

            emit_usage(&frame["usage"], on_chunk);

            let delta = &frame["choices"][0]["delta"];
            if let Some(text) = delta["content"].as_str() {
                if !text.is_empty() {
                    on_chunk(LlmChunk::text(text));
                }
            }
            if let Some(deltas) = delta["tool_calls"].as_array() {
                for d in deltas {
                    let index = d["index"].as_u64().unwrap_or(0);
                    let call = calls.entry(index).or_default();
                    if let Some(id) = d["id"].as_str() {
                        call.id = id.to_string();
                    }
                    if let Some(name) = d["function"]["name"].as_str() {
                        call.name.push_str(name);
                    }
                    if let Some(args) = d["function"]["arguments"].as_str() {
                        call.arguments.push_str(args);
                    }
                }
            }
        }

        if calls.is_empty() {
            Turn::Text
        } else {
            Turn::ToolCalls(calls.into_values().collect())
        }
    }
}

#[async_trait]
impl Generation for OpenAiGeneration {
    async fn generate(
        &self,
        request: GenerationRequest<'_>,
        on_chunk: ChunkSink<'_>,
    ) -> GenerationOutcome {
        let tools = match request.tools.definitions().await {
            Ok(tools) => tools,
            Err(e) => return GenerationOutcome::Error(e.to_string()),
        };

        let mut messages = vec![
            json!({ "role": "system", "content": self.system_prompt(&request.system.content) }),
            json!({ "role": "user", "content": request.user.content }),
        ];
        if !request.assistant.content.is_empty() {
            messages.push(json!({ "role": "assistant", "content": request.assistant.content }));
        }

        tracing::info!(
            "[OpenAiGeneration] Calling {} (model: {}, streaming: {}, tools: {})",
            self.url(),
            self.model(request.options),
            request.options.streaming,
            tools.len()
        );

        for _ in 0..self.config.max_tool_rounds {
            let body = self.request_body(request.options, &messages, &tools, request.options.streaming);
            let calls = match self.turn(&body, request.abort, on_chunk).await {
                Turn::Text => {
                    on_chunk(LlmChunk::done());
                    return GenerationOutcome::Success;
                }
                Turn::Outcome(outcome) => return outcome,
                Turn::ToolCalls(calls) => calls,
            };

            messages.push(json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": calls.iter().map(|c| json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": c.arguments },
                })).collect::<Vec<_>>(),
            }));

            for call in calls {
                let result = run_tool(request.tools, &call, request.abort, on_chunk).await;
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": result.to_string(),
                }));
            }

            if request.abort.is_cancelled() {
                return GenerationOutcome::Stopped;
            }
        }

        GenerationOutcome::Error(format!(
            "Model kept calling tools after {} rounds",
            self.config.max_tool_rounds
        ))
    }

    async fn title(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<String, CoreError> {
        let transcript = messages
            .iter()
            .filter(|m| m.role != MessageRole::System && !m.content.is_empty())
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let body = json!({
            "model": self.model(options),
            "stream": false,
            "messages": [
                {
                    "role": "system",
                    "content": self.system_prompt(
                        "Write a title of at most six words for this conversation. \
                         Reply with the title only."
                    ),
                },
                { "role": "user", "content": transcript },
            ],
        });

        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::Generation(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let json: Value = response
            .json()
            .await
            .map_err(|e| CoreError::Generation(format!("Failed to parse response JSON: {}", e)))?;
        if !status.is_success() {
            return Err(CoreError::Generation(format!("API returned {}: {}", status, json)));
        }

        Ok(clean_title(
            json["choices"][0]["message"]["content"]
                .as_str()
                .unwrap_or_default(),
        ))
    }
}

async fn run_tool(
    tools: &ToolSet,
    call: &PendingCall,
    abort: &CancellationToken,
    on_chunk: &mut (dyn FnMut(LlmChunk) + Send),
) -> Value {
    let params: Value = serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));

    on_chunk(LlmChunk::Status {
        text: format!("Calling {}...", call.name),
    });
    on_chunk(LlmChunk::ToolCall(ToolCallChunk {
        id: call.id.clone(),
        name: call.name.clone(),
        params: params.clone(),
        result: None,
        done: false,
    }));

    let result = match tools.execute(&call.name, params.clone(), abort).await {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("[OpenAiGeneration] Tool {} failed: {}", call.name, e);
            json!({ "error": e.to_string() })
        }
    };

    on_chunk(LlmChunk::ToolCall(ToolCallChunk {
        id: call.id.clone(),
        name: call.name.clone(),
        params,
        result: Some(result.clone()),
        done: true,
    }));
    result
}

fn emit_usage(usage: &Value, on_chunk: &mut (dyn FnMut(LlmChunk) + Send)) {
    if let (Some(prompt), Some(completion)) = (
        usage["prompt_tokens"].as_u64(),
        usage["completion_tokens"].as_u64(),
    ) {
        on_chunk(LlmChunk::Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
        });
    }
}

/// Providers answer a streaming request for a non-streaming model with a 400
/// whose message mentions streaming.
fn is_streaming_rejection(status: u16, body: &str) -> bool {
    if status != 400 && status != 422 {
        return false;
    }
    let lower = body.to_lowercase();
    lower.contains("stream")
        && (lower.contains("not supported")
            || lower.contains("unsupported")
            || lower.contains("does not support"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::StructuredOutput;

    fn generation(locale: Option<&str>) -> OpenAiGeneration {
        OpenAiGeneration::new(
            OpenAiConfig::default(),
            LocaleSettings::new(locale.map(str::to_string)),
        )
    }

    #[test]
    fn test_streaming_rejection_detection() {
        assert!(is_streaming_rejection(
            400,
            r#"{"error":{"message":"Streaming is not supported for this model"}}"#
        ));
        assert!(is_streaming_rejection(400, "model does not support stream=true"));
        assert!(!is_streaming_rejection(500, "streaming not supported"));
        assert!(!is_streaming_rejection(400, "invalid api key"));
    }

    #[test]
    fn test_system_prompt_carries_locale() {
        assert_eq!(generation(None).system_prompt("Be brief."), "Be brief.");
        let prompt = generation(Some("fr-FR")).system_prompt("Be brief.");
        assert!(prompt.starts_with("Be brief.\n\n"));
        assert!(prompt.contains("fr-FR"));
    }

    #[test]
    fn test_request_body_merges_options() {
        let gen = generation(None);
        let mut model_opts = serde_json::Map::new();
        model_opts.insert("temperature".to_string(), json!(0.2));
        model_opts.insert("model".to_string(), json!("ignored"));
        let options = GenerationOptions {
            engine: "openai".to_string(),
            model: String::new(),
            streaming: true,
            structured_output: Some(StructuredOutput {
                name: "cities".to_string(),
                schema: json!({ "type": "object" }),
            }),
            model_opts,
        };
        let tools = vec![ToolDefinition::new("search", "Search", json!({ "type": "object" }))];

        let body = gen.request_body(&options, &[json!({ "role": "user", "content": "hi" })], &tools, true);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["tools"][0]["function"]["name"], "search");
        assert_eq!(body["response_format"]["json_schema"]["name"], "cities");
    }
}
