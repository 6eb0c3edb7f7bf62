//! agentflow Core - Transport-agnostic agent run orchestration.
//!
//! Turns declarative multi-step agent definitions into sequences of LLM
//! generations with per-step tools, output chaining, cooperative
//! cancellation and durable run records. Used by:
//!
//! - HTTP servers (via `agentflow-server`)
//! - CLI tools (via `agentflow-cli`)
//!
//! # Feature Flags
//!
//! - `axum` - Enables `IntoResponse` impl on `CoreError` for use in axum handlers.

pub mod a2a;
pub mod chat;
pub mod db;
pub mod docrepo;
pub mod error;
pub mod executor;
pub mod generation;
pub mod locale;
pub mod models;
pub mod sse;
pub mod state;
pub mod store;
pub mod template;
pub mod tools;
pub mod triggers;

// Convenience re-exports
pub use db::Database;
pub use error::CoreError;
pub use executor::{executor_for, Executor, ExecutorContext, RunOptions};
pub use state::{AppState, AppStateInner, EngineConfig};
