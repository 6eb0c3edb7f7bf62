//! A2A (agent-to-agent) remote delegation client.
//!
//! Remote agents are reached with a JSON-RPC 2.0 `message/stream` request;
//! the server answers with an SSE stream whose `data:` frames carry JSON-RPC
//! responses. Their `result` objects are translated into [`A2aEvent`]s:
//!
//! | result `kind`     | event                          |
//! |-------------------|--------------------------------|
//! | `message`         | `Content` per text part        |
//! | `status-update`   | `Status` (failure states error)|
//! | `artifact-update` | `Artifact`                     |
//! | `task`            | `Status` + its artifacts       |

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::sse;

#[derive(Debug, Clone, PartialEq)]
pub enum A2aEvent {
    Content(String),
    Status(String),
    Artifact {
        name: String,
        mime_type: String,
        content: String,
    },
}

pub type A2aEventStream = Pin<Box<dyn Stream<Item = Result<A2aEvent, CoreError>> + Send>>;

#[async_trait]
pub trait A2aClient: Send + Sync {
    /// Send `prompt` to the agent at `url` and stream its answer.
    async fn execute(
        &self,
        url: &str,
        prompt: &str,
        abort: &CancellationToken,
    ) -> Result<A2aEventStream, CoreError>;
}

pub struct HttpA2aClient {
    client: reqwest::Client,
}

impl HttpA2aClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

impl Default for HttpA2aClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl A2aClient for HttpA2aClient {
    async fn execute(
        &self,
        url: &str,
        prompt: &str,
        abort: &CancellationToken,
    ) -> Result<A2aEventStream, CoreError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "method": "message/stream",
            "params": {
                "message": {
                    "kind": "message",
                    "role": "user",
                    "messageId": uuid::Uuid::new_v4().to_string(),
                    "parts": [{ "kind": "text", "text": prompt }],
                }
            }
        });

        tracing::info!("[A2aClient] message/stream -> {}", url);

        let request = self
            .client
            .post(url)
            .header("accept", "text/event-stream")
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = abort.cancelled() => {
                return Err(CoreError::Remote("Canceled before the remote agent answered".to_string()))
            }
            response = request => response
                .map_err(|e| CoreError::Remote(format!("HTTP request failed: {}", e)))?,
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::Remote(format!("Remote agent returned {}: {}", status, text)));
        }

        let mut frames = sse::data_events(response);
        Ok(Box::pin(async_stream::try_stream! {
            while let Some(frame) = frames.next().await {
                let frame = frame.map_err(|e| CoreError::Remote(e.to_string()))?;
                let Ok(rpc) = serde_json::from_str::<Value>(&frame) else {
                    tracing::debug!("[A2aClient] Skipping non-JSON frame: {}", frame);
                    continue;
                };
                for event in parse_rpc_frame(&rpc)? {
                    yield event;
                }
            }
        }))
    }
}

/// Translate one JSON-RPC response frame.
pub fn parse_rpc_frame(rpc: &Value) -> Result<Vec<A2aEvent>, CoreError> {
    if let Some(error) = rpc.get("error") {
        let message = error["message"].as_str().unwrap_or("unknown error");
        return Err(CoreError::Remote(message.to_string()));
    }
    let Some(result) = rpc.get("result") else {
        return Ok(Vec::new());
    };

    let mut events = Vec::new();
    match result["kind"].as_str().unwrap_or_default() {
        "message" => {
            events.extend(text_parts(&result["parts"]).into_iter().map(A2aEvent::Content));
        }
        "status-update" => events.extend(status_event(&result["status"])?),
        "artifact-update" => events.extend(artifact_event(&result["artifact"])),
        "task" => {
            events.extend(status_event(&result["status"])?);
            if let Some(artifacts) = result["artifacts"].as_array() {
                events.extend(artifacts.iter().filter_map(artifact_event));
            }
        }
        other => tracing::debug!("[A2aClient] Ignoring result kind '{}'", other),
    }
    Ok(events)
}

fn text_parts(parts: &Value) -> Vec<String> {
    parts
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter(|p| p["kind"] == "text")
                .filter_map(|p| p["text"].as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn status_event(status: &Value) -> Result<Option<A2aEvent>, CoreError> {
    let state = status["state"].as_str().unwrap_or_default();
    let text = text_parts(&status["message"]["parts"]).join("\n");

    if matches!(state, "failed" | "rejected") {
        let reason = if text.is_empty() { state.to_string() } else { text };
        return Err(CoreError::Remote(format!("Remote task {}", reason)));
    }

    if !text.is_empty() {
        Ok(Some(A2aEvent::Status(text)))
    } else if !state.is_empty() {
        Ok(Some(A2aEvent::Status(state.to_string())))
    } else {
        Ok(None)
    }
}

fn artifact_event(artifact: &Value) -> Option<A2aEvent> {
    let name = artifact["name"]
        .as_str()
        .or_else(|| artifact["artifactId"].as_str())
        .unwrap_or("artifact")
        .to_string();

    let parts = artifact["parts"].as_array()?;
    let mut mime_type = "text/plain".to_string();
    let mut content = String::new();
    for part in parts {
        match part["kind"].as_str().unwrap_or_default() {
            "text" => content.push_str(part["text"].as_str().unwrap_or_default()),
            "data" => content.push_str(&part["data"].to_string()),
            "file" => {
                let file = &part["file"];
                if let Some(mime) = file["mimeType"].as_str() {
                    mime_type = mime.to_string();
                }
                content.push_str(
                    file["bytes"]
                        .as_str()
                        .or_else(|| file["uri"].as_str())
                        .unwrap_or_default(),
                );
            }
            _ => {}
        }
    }

    Some(A2aEvent::Artifact {
        name,
        mime_type,
        content,
    })
}
