//! Optional live view of a run's conversation.
//!
//! Executors mirror the messages they append to a run into an attached
//! [`ChatView`] so a UI can update while the run is in flight. Runs behave
//! identically without one.

use std::sync::Mutex;

use crate::generation::LlmChunk;
use crate::models::run::Message;

pub trait ChatView: Send + Sync {
    fn add_message(&self, message: Message);

    /// A streamed chunk for the last message. An empty `Content` chunk with
    /// `done = true` terminates the message.
    fn on_chunk(&self, chunk: &LlmChunk);

    fn has_title(&self) -> bool;

    fn set_title(&self, title: String);
}

/// In-memory chat used by tests and the CLI.
#[derive(Default)]
pub struct MemoryChat {
    inner: Mutex<MemoryChatState>,
}

#[derive(Default, Clone)]
pub struct MemoryChatState {
    pub title: Option<String>,
    pub messages: Vec<Message>,
    pub finished: bool,
}

impl MemoryChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(title: &str) -> Self {
        let chat = Self::default();
        chat.set_title(title.to_string());
        chat
    }

    pub fn snapshot(&self) -> MemoryChatState {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryChatState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ChatView for MemoryChat {
    fn add_message(&self, message: Message) {
        let mut state = self.lock();
        state.finished = false;
        state.messages.push(message);
    }

    fn on_chunk(&self, chunk: &LlmChunk) {
        let mut state = self.lock();
        match chunk {
            LlmChunk::Content { text, done } => {
                if let Some(last) = state.messages.last_mut() {
                    last.append_text(text);
                }
                if *done {
                    state.finished = true;
                }
            }
            LlmChunk::Status { text } => {
                if let Some(last) = state.messages.last_mut() {
                    last.status_text = Some(text.clone());
                }
            }
            LlmChunk::Attachment(attachment) => {
                if let Some(last) = state.messages.last_mut() {
                    last.attach(attachment.clone());
                }
            }
            LlmChunk::ToolCall(_) | LlmChunk::Usage { .. } => {}
        }
    }

    fn has_title(&self) -> bool {
        self.lock().title.is_some()
    }

    fn set_title(&self, title: String) {
        self.lock().title = Some(title);
    }
}
