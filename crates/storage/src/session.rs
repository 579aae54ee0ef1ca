// SPDX-License-Identifier: MIT

//! Crash-safe per-cwd session persistence.
//!
//! One session file per working directory, written atomically after
//! every iteration. A session is resumable while its status is
//! `running`, `paused`, or `interrupted`.

use crate::atomic::{atomic_write_json, rotate_bak_path};
use chrono::{DateTime, Utc};
use ralph_core::{Clock, IterationResult, IterationStatus, Task, TaskStatus};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// File name of the session file inside the working directory.
pub const SESSION_FILE_NAME: &str = ".ralph-tui-session.json";

/// Current on-disk schema version.
pub const SESSION_SCHEMA_VERSION: u32 = 1;

/// Errors from session store operations.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Session-level status, distinct from the engine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Paused,
    Interrupted,
    Completed,
    Failed,
}

impl SessionStatus {
    /// Whether a session in this status can be picked up again.
    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            SessionStatus::Running | SessionStatus::Paused | SessionStatus::Interrupted
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Paused => write!(f, "paused"),
            SessionStatus::Interrupted => write!(f, "interrupted"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Point-in-time copy of a tracker task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

impl From<&Task> for TaskSnapshot {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            status: task.status,
            priority: task.priority,
        }
    }
}

/// Tracker identity and task snapshot carried inside the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerState {
    pub plugin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prd_path: Option<PathBuf>,
    pub total_tasks: u32,
    pub tasks: Vec<TaskSnapshot>,
}

/// Iteration record as persisted in the session file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedIterationResult {
    pub iteration: u32,
    pub status: IterationStatus,
    pub task: TaskSnapshot,
    pub task_completed: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl From<&IterationResult> for PersistedIterationResult {
    fn from(result: &IterationResult) -> Self {
        Self {
            iteration: result.iteration,
            status: result.status,
            task: TaskSnapshot::from(&result.task),
            task_completed: result.task_completed,
            duration_ms: result.duration_ms,
            error: result.error.clone(),
            started_at: result.started_at,
            ended_at: result.ended_at,
        }
    }
}

/// Durable state of one continuous run in one working directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub version: u32,
    pub session_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub tasks_completed: u32,
    pub is_paused: bool,
    pub agent_plugin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub tracker_state: TrackerState,
    pub iterations: Vec<PersistedIterationResult>,
    #[serde(default)]
    pub skipped_task_ids: Vec<String>,
    pub cwd: PathBuf,
}

impl PersistedSession {
    /// Create a fresh running session.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: impl Into<String>,
        agent_plugin: impl Into<String>,
        model: Option<String>,
        tracker_state: TrackerState,
        max_iterations: u32,
        cwd: PathBuf,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            version: SESSION_SCHEMA_VERSION,
            session_id: session_id.into(),
            status: SessionStatus::Running,
            started_at: now,
            updated_at: now,
            paused_at: None,
            current_iteration: 0,
            max_iterations,
            tasks_completed: 0,
            is_paused: false,
            agent_plugin: agent_plugin.into(),
            model,
            tracker_state,
            iterations: Vec::new(),
            skipped_task_ids: Vec::new(),
            cwd,
        }
    }

    /// Fold one finished iteration into the session.
    ///
    /// `tasks` refreshes the tracker snapshot; `None` keeps the
    /// previous snapshot (tracker listing failed).
    pub fn update_after_iteration(
        &mut self,
        result: &IterationResult,
        tasks_completed: u32,
        tasks: Option<&[Task]>,
        now: DateTime<Utc>,
    ) {
        self.current_iteration = result.iteration;
        self.tasks_completed = tasks_completed;
        self.iterations.push(PersistedIterationResult::from(result));
        if let Some(tasks) = tasks {
            self.tracker_state.tasks = tasks.iter().map(TaskSnapshot::from).collect();
            self.tracker_state.total_tasks = tasks.len() as u32;
        }
        self.updated_at = now;
    }

    pub fn pause(&mut self, now: DateTime<Utc>) {
        self.status = SessionStatus::Paused;
        self.is_paused = true;
        self.paused_at = Some(now);
        self.updated_at = now;
    }

    pub fn resume(&mut self, now: DateTime<Utc>) {
        self.status = SessionStatus::Running;
        self.is_paused = false;
        self.paused_at = None;
        self.updated_at = now;
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = SessionStatus::Completed;
        self.is_paused = false;
        self.updated_at = now;
    }

    pub fn fail(&mut self, now: DateTime<Utc>) {
        self.status = SessionStatus::Failed;
        self.is_paused = false;
        self.updated_at = now;
    }

    pub fn mark_interrupted(&mut self, now: DateTime<Utc>) {
        self.status = SessionStatus::Interrupted;
        self.updated_at = now;
    }

    /// Record a skipped task id. Duplicates are ignored.
    pub fn add_skipped_task(&mut self, task_id: &str) {
        if !self.skipped_task_ids.iter().any(|id| id == task_id) {
            self.skipped_task_ids.push(task_id.to_string());
        }
    }

    pub fn is_resumable(&self) -> bool {
        self.status.is_resumable()
    }
}

/// Store for per-cwd session files.
#[derive(Debug, Clone)]
pub struct SessionStore<C: Clock> {
    clock: C,
}

impl<C: Clock> SessionStore<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    /// Path of the session file for a working directory.
    pub fn path_for(cwd: &Path) -> PathBuf {
        cwd.join(SESSION_FILE_NAME)
    }

    /// Whether a session file exists for the working directory.
    pub fn has(&self, cwd: &Path) -> bool {
        Self::path_for(cwd).exists()
    }

    /// Load the session for a working directory.
    ///
    /// Returns `Ok(None)` when no file exists. A corrupt file is moved
    /// to a rotated `.bak` path and treated as absent. A version other
    /// than [`SESSION_SCHEMA_VERSION`] is parsed best-effort with a
    /// warning.
    pub fn load(&self, cwd: &Path) -> Result<Option<PersistedSession>, SessionStoreError> {
        let path = Self::path_for(cwd);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<PersistedSession>(&content) {
            Ok(session) => {
                if session.version != SESSION_SCHEMA_VERSION {
                    warn!(
                        version = session.version,
                        expected = SESSION_SCHEMA_VERSION,
                        path = %path.display(),
                        "unexpected session schema version, parsed best-effort",
                    );
                }
                Ok(Some(session))
            }
            Err(e) => {
                let bak_path = rotate_bak_path(&path);
                warn!(
                    error = %e,
                    path = %path.display(),
                    bak = %bak_path.display(),
                    "corrupt session file, moving to .bak",
                );
                fs::rename(&path, &bak_path)?;
                Ok(None)
            }
        }
    }

    /// Save the session atomically, refreshing `updated_at`.
    pub fn save(&self, session: &mut PersistedSession) -> Result<(), SessionStoreError> {
        session.updated_at = self.clock.now();
        let path = Self::path_for(&session.cwd);
        atomic_write_json(&path, session)?;
        Ok(())
    }

    /// Remove the session file. Missing files are not an error.
    pub fn delete(&self, cwd: &Path) -> Result<(), SessionStoreError> {
        let path = Self::path_for(cwd);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
