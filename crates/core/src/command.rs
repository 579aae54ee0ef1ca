// SPDX-License-Identifier: MIT

//! Control commands posted to the engine's inbox.
//!
//! All control flow into the running loop is message passing: the loop
//! is the single consumer and processes commands at safe points only.

use serde::{Deserialize, Serialize};

/// A control request for the engine loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Begin the iteration loop from idle.
    Start,
    /// Finish the current iteration, then wait for `Resume`.
    Pause,
    /// Leave the paused state.
    Resume,
    /// Signal the in-flight agent and terminate the loop.
    Stop,
    /// Signal the in-flight agent only; the loop continues.
    Interrupt,
    /// Raise the iteration budget.
    AddIterations { count: u32 },
    /// Lower the iteration budget.
    RemoveIterations { count: u32 },
    /// Resume a terminated loop with its accumulated state.
    Continue,
    /// Re-read the task list from the tracker.
    RefreshTasks,
}

impl Command {
    /// Wire-level operation name, as echoed in `operation_result`.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Stop => "stop",
            Command::Interrupt => "interrupt",
            Command::AddIterations { .. } => "add_iterations",
            Command::RemoveIterations { .. } => "remove_iterations",
            Command::Continue => "continue",
            Command::RefreshTasks => "refresh_tasks",
        }
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
