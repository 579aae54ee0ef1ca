// SPDX-License-Identifier: MIT

//! Iteration history records.

use crate::task::Task;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single engine iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    Completed,
    Failed,
    Interrupted,
    Skipped,
}

impl std::fmt::Display for IterationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IterationStatus::Completed => write!(f, "completed"),
            IterationStatus::Failed => write!(f, "failed"),
            IterationStatus::Interrupted => write!(f, "interrupted"),
            IterationStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Immutable record of one pass of (select task, invoke agent, record).
///
/// Appended to the engine's history in iteration order; `iteration` is
/// 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationResult {
    pub iteration: u32,
    pub status: IterationStatus,
    pub task: Task,
    pub task_completed: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

#[cfg(test)]
#[path = "iteration_tests.rs"]
mod tests;
