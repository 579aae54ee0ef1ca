// SPDX-License-Identifier: MIT

//! Global registry of known sessions.
//!
//! One JSON file keyed by session id. Writers serialize through an
//! advisory file lock so concurrent processes never corrupt the file;
//! every write is a locked read-modify-write followed by an atomic
//! rename.

use crate::atomic::{atomic_write_json, rotate_bak_path};
use crate::session::SessionStatus;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use ralph_core::Clock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// File name of the registry inside the config directory.
pub const REGISTRY_FILE_NAME: &str = "sessions.json";

const REGISTRY_SCHEMA_VERSION: u32 = 1;

/// Directory under `<config_home>` holding ralph-tui state.
const CONFIG_DIR_NAME: &str = "ralph-tui";

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not determine config directory")]
    NoConfigDir,
}

/// One registered session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub session_id: String,
    /// Absolute working directory of the session.
    pub cwd: PathBuf,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub agent_plugin: String,
    pub tracker_plugin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prd_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<bool>,
}

/// Filter for [`SessionRegistry::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    Resumable,
    All,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    version: u32,
    sessions: HashMap<String, RegistryEntry>,
}

impl Default for RegistryFile {
    fn default() -> Self {
        Self {
            version: REGISTRY_SCHEMA_VERSION,
            sessions: HashMap::new(),
        }
    }
}

/// The global session registry.
#[derive(Debug, Clone)]
pub struct SessionRegistry<C: Clock> {
    path: PathBuf,
    clock: C,
}

impl<C: Clock> SessionRegistry<C> {
    /// Open a registry backed by the given file path.
    pub fn open(path: PathBuf, clock: C) -> Self {
        Self { path, clock }
    }

    /// Default registry path: `<config_home>/ralph-tui/sessions.json`.
    pub fn default_path() -> Result<PathBuf, RegistryError> {
        let config_home = dirs::config_dir().ok_or(RegistryError::NoConfigDir)?;
        Ok(config_home.join(CONFIG_DIR_NAME).join(REGISTRY_FILE_NAME))
    }

    /// Insert or replace an entry by session id.
    pub fn register(&self, entry: RegistryEntry) -> Result<(), RegistryError> {
        self.mutate(|file| {
            file.sessions.insert(entry.session_id.clone(), entry);
        })
    }

    /// Update an entry's status and `updated_at`. Silent no-op when the
    /// id is unknown.
    pub fn update_status(&self, session_id: &str, status: SessionStatus) -> Result<(), RegistryError> {
        let now = self.clock.now();
        self.mutate(|file| {
            if let Some(entry) = file.sessions.get_mut(session_id) {
                entry.status = status;
                entry.updated_at = now;
            }
        })
    }

    /// Remove an entry by session id.
    pub fn unregister(&self, session_id: &str) -> Result<(), RegistryError> {
        self.mutate(|file| {
            file.sessions.remove(session_id);
        })
    }

    pub fn get_by_id(&self, session_id: &str) -> Result<Option<RegistryEntry>, RegistryError> {
        self.read(|file| file.sessions.get(session_id).cloned())
    }

    /// Newest resumable entry for a working directory, if any.
    pub fn get_by_cwd(&self, cwd: &Path) -> Result<Option<RegistryEntry>, RegistryError> {
        self.read(|file| {
            file.sessions
                .values()
                .filter(|e| e.cwd == cwd && e.status.is_resumable())
                .max_by_key(|e| e.updated_at)
                .cloned()
        })
    }

    /// List entries, newest first.
    pub fn list(&self, filter: ListFilter) -> Result<Vec<RegistryEntry>, RegistryError> {
        self.read(|file| {
            let mut entries: Vec<_> = file
                .sessions
                .values()
                .filter(|e| match filter {
                    ListFilter::Resumable => e.status.is_resumable(),
                    ListFilter::All => true,
                })
                .cloned()
                .collect();
            entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            entries
        })
    }

    /// All entries whose session id starts with `prefix`.
    pub fn find_by_prefix(&self, prefix: &str) -> Result<Vec<RegistryEntry>, RegistryError> {
        self.read(|file| {
            let mut entries: Vec<_> = file
                .sessions
                .values()
                .filter(|e| e.session_id.starts_with(prefix))
                .cloned()
                .collect();
            entries.sort_by(|a, b| a.session_id.cmp(&b.session_id));
            entries
        })
    }

    /// Remove entries whose cwd the checker declares unoccupied.
    ///
    /// Returns the number of removed entries.
    pub fn cleanup_stale<F>(&self, checker: F) -> Result<usize, RegistryError>
    where
        F: Fn(&Path) -> bool,
    {
        self.mutate(|file| {
            let before = file.sessions.len();
            file.sessions.retain(|_, entry| checker(&entry.cwd));
            before - file.sessions.len()
        })
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    /// Take the exclusive lock, apply `f`, write back atomically.
    fn mutate<R>(&self, f: impl FnOnce(&mut RegistryFile) -> R) -> Result<R, RegistryError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock = File::create(self.lock_path())?;
        lock.lock_exclusive()?;

        let mut file = self.read_file()?;
        let out = f(&mut file);
        atomic_write_json(&self.path, &file)?;
        // Lock released when `lock` drops.
        Ok(out)
    }

    fn read<R>(&self, f: impl FnOnce(&RegistryFile) -> R) -> Result<R, RegistryError> {
        if self.path.exists() {
            let lock = File::create(self.lock_path())?;
            lock.lock_shared()?;
            let file = self.read_file()?;
            return Ok(f(&file));
        }
        Ok(f(&RegistryFile::default()))
    }

    fn read_file(&self) -> Result<RegistryFile, RegistryError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RegistryFile::default())
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&content) {
            Ok(file) => Ok(file),
            Err(e) => {
                let bak_path = rotate_bak_path(&self.path);
                warn!(
                    error = %e,
                    path = %self.path.display(),
                    bak = %bak_path.display(),
                    "corrupt registry file, moving to .bak and starting fresh",
                );
                fs::rename(&self.path, &bak_path)?;
                Ok(RegistryFile::default())
            }
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
