// SPDX-License-Identifier: MIT

//! Engine events fanned out to subscribers.
//!
//! Serializes with `{"type": "scope:name", ...fields}` format.

use crate::iteration::IterationResult;
use crate::task::Task;
use serde::{Deserialize, Serialize};

/// Which output stream an agent chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Why the iteration loop terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// No pending task remained.
    NoTasks,
    /// The iteration budget was exhausted.
    MaxIterations,
    /// The `abort` error policy fired.
    Error,
    /// An explicit `stop()` request.
    Stopped,
}

/// Events emitted by the engine, delivered to each subscriber in
/// emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    #[serde(rename = "engine:started")]
    EngineStarted { max_iterations: u32 },

    #[serde(rename = "engine:stopped")]
    EngineStopped { reason: StopReason },

    #[serde(rename = "engine:paused")]
    EnginePaused,

    #[serde(rename = "engine:resumed")]
    EngineResumed,

    #[serde(rename = "iteration:started")]
    IterationStarted { iteration: u32, task: Task },

    #[serde(rename = "iteration:completed")]
    IterationCompleted { result: IterationResult },

    #[serde(rename = "iteration:failed")]
    IterationFailed { result: IterationResult },

    #[serde(rename = "task:selected")]
    TaskSelected { task: Task },

    #[serde(rename = "task:completed")]
    TaskCompleted { task: Task },

    #[serde(rename = "agent:output")]
    AgentOutput { stream: OutputStream, data: String },
}

impl EngineEvent {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::EngineStarted { .. } => "engine:started",
            EngineEvent::EngineStopped { .. } => "engine:stopped",
            EngineEvent::EnginePaused => "engine:paused",
            EngineEvent::EngineResumed => "engine:resumed",
            EngineEvent::IterationStarted { .. } => "iteration:started",
            EngineEvent::IterationCompleted { .. } => "iteration:completed",
            EngineEvent::IterationFailed { .. } => "iteration:failed",
            EngineEvent::TaskSelected { .. } => "task:selected",
            EngineEvent::TaskCompleted { .. } => "task:completed",
            EngineEvent::AgentOutput { .. } => "agent:output",
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
