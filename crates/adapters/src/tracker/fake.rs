// SPDX-License-Identifier: MIT

//! In-memory tracker for deterministic testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{TrackerAdapter, TrackerError};
use async_trait::async_trait;
use parking_lot::Mutex;
use ralph_core::{Task, TaskStatus};
use std::collections::HashSet;
use std::sync::Arc;

/// In-memory tracker.
///
/// With `complete_on_success` set (the default), any task the engine
/// marked `in_progress` reports complete on the next `is_complete`
/// query, modeling an agent that finishes the work it was given.
#[derive(Clone)]
pub struct FakeTracker {
    inner: Arc<Mutex<FakeTrackerState>>,
}

struct FakeTrackerState {
    tasks: Vec<Task>,
    in_progress: HashSet<String>,
    completed: HashSet<String>,
    complete_on_success: bool,
    list_error: Option<TrackerError>,
}

impl FakeTracker {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeTrackerState {
                tasks,
                in_progress: HashSet::new(),
                completed: HashSet::new(),
                complete_on_success: true,
                list_error: None,
            })),
        }
    }

    /// Stop reporting in-progress tasks as complete; `is_complete`
    /// then only honors explicit `set_complete` calls.
    pub fn set_complete_on_success(&self, value: bool) {
        self.inner.lock().complete_on_success = value;
    }

    /// Force a task to report complete.
    pub fn set_complete(&self, task_id: &str) {
        self.inner.lock().completed.insert(task_id.to_string());
    }

    /// Fail the next `list_tasks` call.
    pub fn set_list_error(&self, error: TrackerError) {
        self.inner.lock().list_error = Some(error);
    }

    /// Append a task after construction.
    pub fn add_task(&self, task: Task) {
        self.inner.lock().tasks.push(task);
    }

    /// Current status of a task, for assertions.
    pub fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.inner
            .lock()
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .map(|t| t.status)
    }
}

#[async_trait]
impl TrackerAdapter for FakeTracker {
    fn plugin_name(&self) -> &str {
        "fake"
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, TrackerError> {
        let mut inner = self.inner.lock();
        if let Some(error) = inner.list_error.take() {
            return Err(error);
        }
        Ok(inner.tasks.clone())
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<(), TrackerError> {
        let mut inner = self.inner.lock();
        if status == TaskStatus::InProgress {
            inner.in_progress.insert(task_id.to_string());
        }
        match inner.tasks.iter_mut().find(|t| t.id == task_id) {
            Some(task) => {
                task.status = status;
                Ok(())
            }
            None => Err(TrackerError::NotFound(task_id.to_string())),
        }
    }

    async fn is_complete(&self, task_id: &str) -> Result<bool, TrackerError> {
        let inner = self.inner.lock();
        if inner.completed.contains(task_id) {
            return Ok(true);
        }
        Ok(inner.complete_on_success && inner.in_progress.contains(task_id))
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
