// SPDX-License-Identifier: MIT

//! Token issuance and verification.
//!
//! The long-lived server token is the shared secret distributed to
//! operators out of band. Successful auth mints a short-lived
//! connection token; the server accepts either as proof of identity.
//! Comparisons never short-circuit on content.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use ralph_core::Clock;
use ralph_storage::atomic_write_json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Server token lifetime.
pub const SERVER_TOKEN_DAYS: i64 = 90;

/// Connection token lifetime.
pub const CONNECTION_TOKEN_HOURS: i64 = 24;

/// Refresh a connection token when less than this remains.
pub const REFRESH_THRESHOLD_HOURS: i64 = 1;

/// File name of the persisted server token.
pub const TOKEN_FILE_NAME: &str = "server-token.json";

const CONFIG_DIR_NAME: &str = "ralph-tui";

/// Errors from token persistence.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not determine config directory")]
    NoConfigDir,
}

/// Long-lived shared secret held by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ServerToken {
    pub fn generate(now: DateTime<Utc>) -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            issued_at: now,
            expires_at: now + Duration::days(SERVER_TOKEN_DAYS),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Short-lived per-connection credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Compare two tokens without short-circuiting on content.
///
/// Token length is not secret; only the byte comparison is folded.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Holds the server token and all live connection tokens.
pub struct TokenStore<C: Clock> {
    path: PathBuf,
    server_token: ServerToken,
    connections: Mutex<HashMap<String, ConnectionToken>>,
    connection_ttl: Duration,
    clock: C,
}

impl<C: Clock> TokenStore<C> {
    /// Load the persisted server token, generating (and persisting) a
    /// fresh one when the file is absent, corrupt, expired, or
    /// `rotate` is requested.
    pub fn load_or_generate(path: PathBuf, clock: C, rotate: bool) -> Result<Self, TokenError> {
        let now = clock.now();
        let existing = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<ServerToken>(&content) {
                Ok(token) => Some(token),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt token file, regenerating");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let server_token = match existing {
            Some(token) if !rotate && !token.is_expired(now) => token,
            Some(_) => {
                info!(rotate, "rotating server token");
                let token = ServerToken::generate(now);
                atomic_write_json(&path, &token)?;
                token
            }
            None => {
                info!("generating server token");
                let token = ServerToken::generate(now);
                atomic_write_json(&path, &token)?;
                token
            }
        };

        Ok(Self {
            path,
            server_token,
            connections: Mutex::new(HashMap::new()),
            connection_ttl: Duration::hours(CONNECTION_TOKEN_HOURS),
            clock,
        })
    }

    /// Default token path: `<config_home>/ralph-tui/server-token.json`.
    pub fn default_path() -> Result<PathBuf, TokenError> {
        let config_home = dirs::config_dir().ok_or(TokenError::NoConfigDir)?;
        Ok(config_home.join(CONFIG_DIR_NAME).join(TOKEN_FILE_NAME))
    }

    /// Shrink the connection token lifetime (specs exercise refresh).
    pub fn with_connection_ttl(mut self, ttl: Duration) -> Self {
        self.connection_ttl = ttl;
        self
    }

    pub fn server_token(&self) -> &ServerToken {
        &self.server_token
    }

    /// Path the server token was persisted to.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Mint a connection token.
    pub fn issue_connection_token(&self) -> ConnectionToken {
        let now = self.clock.now();
        let token = ConnectionToken {
            token: Uuid::new_v4().to_string(),
            expires_at: now + self.connection_ttl,
        };
        let mut connections = self.connections.lock();
        connections.retain(|_, t| t.expires_at > now);
        connections.insert(token.token.clone(), token.clone());
        token
    }

    /// Whether `presented` matches the server token or a live
    /// connection token.
    pub fn verify(&self, presented: &str) -> bool {
        let now = self.clock.now();
        if !self.server_token.is_expired(now)
            && constant_time_eq(presented, &self.server_token.token)
        {
            return true;
        }
        let mut connections = self.connections.lock();
        connections.retain(|_, t| t.expires_at > now);
        connections
            .values()
            .any(|t| constant_time_eq(presented, &t.token))
    }

    /// Drop a connection token (e.g. after rotation).
    pub fn revoke_connection_token(&self, token: &str) {
        self.connections.lock().remove(token);
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
