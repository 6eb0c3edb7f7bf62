//! agentflow CLI - command implementations shared by the `agentflow` binary
//! and its integration tests.

pub mod commands;
