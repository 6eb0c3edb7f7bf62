//! Offline generation used for dry runs.

use async_trait::async_trait;

use super::{clean_title, ChunkSink, Generation, GenerationOptions, GenerationOutcome, GenerationRequest, LlmChunk};
use crate::error::CoreError;
use crate::models::run::{Message, MessageRole};

/// Answers every prompt with the prompt itself, without touching the network.
#[derive(Debug, Clone, Default)]
pub struct EchoGeneration;

#[async_trait]
impl Generation for EchoGeneration {
    async fn generate(
        &self,
        request: GenerationRequest<'_>,
        on_chunk: ChunkSink<'_>,
    ) -> GenerationOutcome {
        if request.abort.is_cancelled() {
            return GenerationOutcome::Stopped;
        }
        on_chunk(LlmChunk::text(request.user.content.clone()));
        on_chunk(LlmChunk::done());
        GenerationOutcome::Success
    }

    async fn title(
        &self,
        messages: &[Message],
        _options: &GenerationOptions,
    ) -> Result<String, CoreError> {
        let first_user = messages
            .iter()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.split_whitespace().take(6).collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        Ok(clean_title(&first_user))
    }
}
