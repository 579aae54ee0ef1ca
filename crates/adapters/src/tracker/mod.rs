// SPDX-License-Identifier: MIT

//! Tracker adapter seam.
//!
//! A tracker owns the work items. The engine enumerates tasks, flips
//! statuses, and asks whether the agent's work left a task complete;
//! the tracker's own data model stays out of tree.

#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeTracker;

use async_trait::async_trait;
use ralph_core::{Task, TaskStatus};
use thiserror::Error;

/// Errors from tracker operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("tracker backend error: {0}")]
    Backend(String),
}

/// Adapter over a task tracker backend.
#[async_trait]
pub trait TrackerAdapter: Clone + Send + Sync + 'static {
    /// Plugin name recorded in the persisted session.
    fn plugin_name(&self) -> &str;

    /// Current task list, including terminal tasks.
    async fn list_tasks(&self) -> Result<Vec<Task>, TrackerError>;

    /// Update a task's status.
    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<(), TrackerError>;

    /// Whether the tracker now considers the task complete. Consulted
    /// after each successful agent run; the agent may have updated the
    /// tracker out of band.
    async fn is_complete(&self, task_id: &str) -> Result<bool, TrackerError>;
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
