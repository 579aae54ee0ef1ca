// SPDX-License-Identifier: MIT

//! Agent adapter seam.
//!
//! An agent is an external CLI process that performs code changes. The
//! adapter spawns it, streams its output as [`AgentEvent`]s over a
//! buffered channel, and can deliver an interrupt signal. The engine
//! never touches the process directly.

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{AgentCall, FakeAgentAdapter, FakeRun};

use async_trait::async_trait;
use ralph_core::AgentId;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from agent operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("agent not found: {0}")]
    NotFound(String),
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    #[error("signal failed: {0}")]
    SignalFailed(String),
}

/// One chunk of structured output from a running agent.
///
/// Chunks for a single agent arrive in emission order; `End` is always
/// the final event.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Stdout { data: String },
    Stderr { data: String },
    /// A structured JSONL message extracted from the output stream.
    Jsonl { message: serde_json::Value },
    /// Process exit. `None` when the process was killed by a signal.
    End { exit_code: Option<i32> },
}

/// Everything an adapter needs to run one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    /// Unique identifier for this invocation.
    pub agent_id: AgentId,
    /// The rendered prompt text.
    pub prompt: String,
    /// Working directory for the agent process.
    pub cwd: PathBuf,
    /// Model override, when the adapter supports one.
    pub model: Option<String>,
}

/// Handle to a running agent invocation.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    pub agent_id: AgentId,
}

/// Adapter driving an external agent process.
#[async_trait]
pub trait AgentAdapter: Clone + Send + Sync + 'static {
    /// Plugin name recorded in the persisted session.
    fn plugin_name(&self) -> &str;

    /// Spawn the agent and stream its output into `event_tx`.
    ///
    /// Returns as soon as the process is started; the terminal
    /// [`AgentEvent::End`] arrives on the channel.
    async fn execute(
        &self,
        invocation: AgentInvocation,
        event_tx: mpsc::Sender<AgentEvent>,
    ) -> Result<AgentHandle, AgentError>;

    /// Deliver a SIGINT-equivalent to a running agent.
    async fn interrupt(&self, agent_id: &AgentId) -> Result<(), AgentError>;
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
