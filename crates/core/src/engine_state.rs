// SPDX-License-Identifier: MIT

//! Engine state snapshot.
//!
//! The engine owns the single mutable instance; everyone else receives
//! owned clones taken under a read lock.

use crate::id::AgentId;
use crate::iteration::IterationResult;
use crate::task::Task;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Engine-level status, distinct from the persisted session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Idle,
    Running,
    Paused,
    Stopping,
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineStatus::Idle => write!(f, "idle"),
            EngineStatus::Running => write!(f, "running"),
            EngineStatus::Paused => write!(f, "paused"),
            EngineStatus::Stopping => write!(f, "stopping"),
        }
    }
}

/// Complete observable state of an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub status: EngineStatus,
    /// 1-based; 0 before the first iteration starts.
    pub current_iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<Task>,
    pub current_output: String,
    pub current_stderr: String,
    pub iterations: Vec<IterationResult>,
    pub tasks_completed: u32,
    pub total_tasks: u32,
    /// 0 means unlimited.
    pub max_iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_agent: Option<AgentId>,
    /// Opaque provider rate-limit bookkeeping, round-tripped untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_state: Option<serde_json::Value>,
}

impl EngineState {
    /// Initial state for a fresh engine.
    pub fn new(max_iterations: u32) -> Self {
        Self {
            status: EngineStatus::Idle,
            current_iteration: 0,
            current_task: None,
            current_output: String::new(),
            current_stderr: String::new(),
            iterations: Vec::new(),
            tasks_completed: 0,
            total_tasks: 0,
            max_iterations,
            started_at: None,
            active_agent: None,
            rate_limit_state: None,
        }
    }
}

#[cfg(test)]
#[path = "engine_state_tests.rs"]
mod tests;
