//! Knowledge-base lookups performed before a step prompt is sent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocResult {
    pub content: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[async_trait]
pub trait DocRepository: Send + Sync {
    async fn query(&self, repo_id: &str, text: &str) -> Result<Vec<DocResult>, CoreError>;
}

/// Prepend retrieved context to a prompt.
pub fn render_context(prompt: &str, results: &[DocResult]) -> String {
    let context = results
        .iter()
        .map(|r| r.content.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    if context.is_empty() {
        return prompt.to_string();
    }

    format!(
        "{}\n\nUse the following context to answer. If the context does not \
         help, answer from your own knowledge.\n\n<context>\n{}\n</context>",
        prompt, context
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(content: &str) -> DocResult {
        DocResult {
            content: content.to_string(),
            score: 1.0,
            title: None,
            url: None,
        }
    }

    #[test]
    fn test_render_context_concatenates_results() {
        let rendered = render_context("Question?", &[doc("alpha"), doc("  "), doc("beta")]);
        assert!(rendered.starts_with("Question?\n\n"));
        assert!(rendered.contains("<context>\nalpha\n\nbeta\n</context>"));
    }

    #[test]
    fn test_render_context_without_content_keeps_prompt() {
        assert_eq!(render_context("Question?", &[doc(" ")]), "Question?");
    }
}
