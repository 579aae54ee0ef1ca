// SPDX-License-Identifier: MIT

//! Remote config inspection and push.
//!
//! Two scopes: the global config under the remote user's home and the
//! project config under the remote working directory. Pushes validate
//! TOML, back up any overwritten file, and write atomically.

use crate::protocol::Payload;
use chrono::{DateTime, SecondsFormat, Utc};
use ralph_storage::atomic_write_bytes;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Which config file a push targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigScope {
    Global,
    Project,
}

impl std::fmt::Display for ConfigScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigScope::Global => write!(f, "global"),
            ConfigScope::Project => write!(f, "project"),
        }
    }
}

impl std::str::FromStr for ConfigScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(ConfigScope::Global),
            "project" => Ok(ConfigScope::Project),
            other => Err(format!("unknown scope: {other}")),
        }
    }
}

/// Resolved config file locations on the server host.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub global: PathBuf,
    pub project: PathBuf,
    pub remote_cwd: PathBuf,
}

impl ConfigPaths {
    /// `<home>/.config/ralph-tui/config.toml` and
    /// `<remote_cwd>/.ralph-tui/config.toml`.
    pub fn resolve(home: &Path, remote_cwd: &Path) -> Self {
        Self {
            global: home
                .join(".config")
                .join("ralph-tui")
                .join("config.toml"),
            project: remote_cwd.join(".ralph-tui").join("config.toml"),
            remote_cwd: remote_cwd.to_path_buf(),
        }
    }

    fn target(&self, scope: ConfigScope) -> &Path {
        match scope {
            ConfigScope::Global => &self.global,
            ConfigScope::Project => &self.project,
        }
    }
}

/// Build a `check_config_response` payload.
pub fn check_config(paths: &ConfigPaths) -> Payload {
    let global_content = fs::read_to_string(&paths.global).ok();
    let project_content = fs::read_to_string(&paths.project).ok();
    Payload::CheckConfigResponse {
        global_exists: global_content.is_some(),
        project_exists: project_content.is_some(),
        global_path: paths.global.clone(),
        project_path: paths.project.clone(),
        global_content,
        project_content,
        remote_cwd: paths.remote_cwd.clone(),
    }
}

/// Apply a `push_config` request, returning the response payload.
pub fn push_config(
    paths: &ConfigPaths,
    scope: ConfigScope,
    content: &str,
    overwrite: bool,
    now: DateTime<Utc>,
) -> Payload {
    let new_value = match toml::from_str::<toml::Value>(content) {
        Ok(value) => value,
        Err(e) => return failure(format!("Invalid TOML: {e}")),
    };

    let target = paths.target(scope);
    let existing = match fs::read_to_string(target) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return failure(format!("failed to read existing config: {e}")),
    };

    if existing.is_some() && !overwrite {
        return failure(format!(
            "Config already exists at {}. Use overwrite=true to replace it.",
            target.display()
        ));
    }

    let backup_path = match existing.as_deref() {
        Some(old) => match back_up(target, old, now) {
            Ok(path) => Some(path),
            Err(e) => return failure(format!("failed to back up existing config: {e}")),
        },
        None => None,
    };

    if let Err(e) = atomic_write_bytes(target, content.as_bytes()) {
        return failure(format!("failed to write config: {e}"));
    }

    let old_value = existing
        .as_deref()
        .and_then(|c| toml::from_str::<toml::Value>(c).ok());
    let migration_triggered = version_changed(old_value.as_ref(), &new_value);
    let requires_restart = listener_settings_changed(old_value.as_ref(), &new_value);

    info!(
        scope = %scope,
        path = %target.display(),
        migration_triggered,
        requires_restart,
        "config pushed",
    );

    Payload::PushConfigResponse {
        success: true,
        config_path: Some(target.to_path_buf()),
        backup_path,
        migration_triggered,
        requires_restart,
        error: None,
    }
}

fn failure(error: String) -> Payload {
    warn!(error = %error, "config push rejected");
    Payload::PushConfigResponse {
        success: false,
        config_path: None,
        backup_path: None,
        migration_triggered: false,
        requires_restart: false,
        error: Some(error),
    }
}

/// Copy the existing content to `<target>.backup.<timestamp>` with the
/// timestamp's colons replaced by dashes.
fn back_up(target: &Path, old_content: &str, now: DateTime<Utc>) -> std::io::Result<PathBuf> {
    let stamp = now
        .to_rfc3339_opts(SecondsFormat::Secs, true)
        .replace(':', "-");
    let backup_path = PathBuf::from(format!("{}.backup.{}", target.display(), stamp));
    fs::write(&backup_path, old_content)?;
    Ok(backup_path)
}

fn version_changed(old: Option<&toml::Value>, new: &toml::Value) -> bool {
    let old_version = old.and_then(|v| v.get("version")).and_then(|v| v.as_integer());
    let new_version = new.get("version").and_then(|v| v.as_integer());
    match (old_version, new_version) {
        (Some(a), Some(b)) => a != b,
        (None, None) => false,
        // Version appearing or disappearing counts as a schema change.
        _ => old.is_some(),
    }
}

/// Restart is needed when settings affecting bound listeners change.
fn listener_settings_changed(old: Option<&toml::Value>, new: &toml::Value) -> bool {
    for key in ["port", "host"] {
        let old_value = old.and_then(|v| v.get(key));
        let new_value = new.get(key);
        if old_value != new_value {
            return true;
        }
    }
    false
}

#[cfg(test)]
#[path = "config_push_tests.rs"]
mod tests;
