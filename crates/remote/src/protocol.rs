// SPDX-License-Identifier: MIT

//! Wire protocol for the remote control plane.
//!
//! One JSON value per WebSocket text frame. Every message carries
//! `{type, id, timestamp}`; request/response pairs correlate by `id`
//! (the response echoes the request's `id`).

use crate::config_push::ConfigScope;
use chrono::{DateTime, Utc};
use ralph_core::{EngineEvent, EngineState, EngineStatus, Task};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Default TCP port for the remote listener.
pub const DEFAULT_PORT: u16 = 7890;

/// Error codes carried by `error` messages.
pub mod codes {
    pub const UNKNOWN_MESSAGE: &str = "UNKNOWN_MESSAGE";
    pub const NOT_AUTHENTICATED: &str = "NOT_AUTHENTICATED";
    pub const AUTH_TIMEOUT: &str = "AUTH_TIMEOUT";
    pub const HEARTBEAT_TIMEOUT: &str = "HEARTBEAT_TIMEOUT";
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
    pub const TRACKER_ERROR: &str = "TRACKER_ERROR";
    pub const UNEXPECTED_MESSAGE: &str = "UNEXPECTED_MESSAGE";
}

/// Errors from encoding/decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message has no type field")]
    MissingType,
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

/// Which credential an `auth` message presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Server,
    Connection,
}

/// A complete wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Envelope {
    /// A fresh message with a new id.
    pub fn new(payload: Payload, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: now,
            payload,
        }
    }

    /// A response echoing the request's id.
    pub fn reply(request_id: Uuid, payload: Payload, now: DateTime<Utc>) -> Self {
        Self {
            id: request_id,
            timestamp: now,
            payload,
        }
    }
}

/// All message payloads, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    // -- handshake --
    Auth {
        token: String,
        token_type: TokenType,
    },
    AuthResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connection_token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_at: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    TokenRefresh,
    TokenRefreshResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connection_token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_at: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // -- liveness --
    Ping,
    Pong,
    Error {
        code: String,
        message: String,
    },
    ServerStatus {
        uptime_secs: u64,
        engine_status: EngineStatus,
        clients: u32,
    },

    // -- event stream --
    Subscribe,
    Unsubscribe,
    EngineEvent {
        event: EngineEvent,
    },

    // -- state queries --
    GetState,
    StateResponse {
        state: EngineState,
    },
    GetTasks,
    TasksResponse {
        tasks: Vec<Task>,
    },
    GetPromptPreview,
    PromptPreviewResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
    },
    GetIterationOutput {
        iteration: u32,
    },
    IterationOutputResponse {
        iteration: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
    },

    // -- engine control --
    Pause,
    Resume,
    Interrupt,
    RefreshTasks,
    AddIterations {
        count: u32,
    },
    RemoveIterations {
        count: u32,
    },
    Continue,
    OperationResult {
        operation: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // -- config push --
    CheckConfig,
    CheckConfigResponse {
        global_exists: bool,
        project_exists: bool,
        global_path: PathBuf,
        project_path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        global_content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project_content: Option<String>,
        remote_cwd: PathBuf,
    },
    PushConfig {
        scope: ConfigScope,
        config_content: String,
        overwrite: bool,
    },
    PushConfigResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config_path: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backup_path: Option<PathBuf>,
        migration_triggered: bool,
        requires_restart: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Every wire-level `type` tag, for unknown-type detection.
pub const MESSAGE_TYPES: &[&str] = &[
    "auth",
    "auth_response",
    "token_refresh",
    "token_refresh_response",
    "ping",
    "pong",
    "error",
    "server_status",
    "subscribe",
    "unsubscribe",
    "engine_event",
    "get_state",
    "state_response",
    "get_tasks",
    "tasks_response",
    "get_prompt_preview",
    "prompt_preview_response",
    "get_iteration_output",
    "iteration_output_response",
    "pause",
    "resume",
    "interrupt",
    "refresh_tasks",
    "add_iterations",
    "remove_iterations",
    "continue",
    "operation_result",
    "check_config",
    "check_config_response",
    "push_config",
    "push_config_response",
];

impl Payload {
    /// The wire-level `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Auth { .. } => "auth",
            Payload::AuthResponse { .. } => "auth_response",
            Payload::TokenRefresh => "token_refresh",
            Payload::TokenRefreshResponse { .. } => "token_refresh_response",
            Payload::Ping => "ping",
            Payload::Pong => "pong",
            Payload::Error { .. } => "error",
            Payload::ServerStatus { .. } => "server_status",
            Payload::Subscribe => "subscribe",
            Payload::Unsubscribe => "unsubscribe",
            Payload::EngineEvent { .. } => "engine_event",
            Payload::GetState => "get_state",
            Payload::StateResponse { .. } => "state_response",
            Payload::GetTasks => "get_tasks",
            Payload::TasksResponse { .. } => "tasks_response",
            Payload::GetPromptPreview => "get_prompt_preview",
            Payload::PromptPreviewResponse { .. } => "prompt_preview_response",
            Payload::GetIterationOutput { .. } => "get_iteration_output",
            Payload::IterationOutputResponse { .. } => "iteration_output_response",
            Payload::Pause => "pause",
            Payload::Resume => "resume",
            Payload::Interrupt => "interrupt",
            Payload::RefreshTasks => "refresh_tasks",
            Payload::AddIterations { .. } => "add_iterations",
            Payload::RemoveIterations { .. } => "remove_iterations",
            Payload::Continue => "continue",
            Payload::OperationResult { .. } => "operation_result",
            Payload::CheckConfig => "check_config",
            Payload::CheckConfigResponse { .. } => "check_config_response",
            Payload::PushConfig { .. } => "push_config",
            Payload::PushConfigResponse { .. } => "push_config_response",
        }
    }
}

/// Encode an envelope to one JSON text frame.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decode one JSON text frame.
///
/// A syntactically valid message with an unrecognized `type` maps to
/// [`ProtocolError::UnknownType`] so the server can answer with an
/// `UNKNOWN_MESSAGE` error instead of closing.
pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let type_name = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(ProtocolError::MissingType)?
        .to_string();
    match serde_json::from_value::<Envelope>(value) {
        Ok(envelope) => Ok(envelope),
        Err(e) => {
            if MESSAGE_TYPES.contains(&type_name.as_str()) {
                Err(e.into())
            } else {
                Err(ProtocolError::UnknownType(type_name))
            }
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
