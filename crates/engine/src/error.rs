// SPDX-License-Identifier: MIT

//! Engine error taxonomy.

use ralph_core::EngineStatus;
use thiserror::Error;

/// Errors reported by engine control operations.
///
/// All of these are state errors: non-fatal, reported to the caller,
/// and leaving the engine untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine already running")]
    AlreadyRunning,

    #[error("{operation} is not valid while {status}")]
    InvalidState {
        operation: &'static str,
        status: EngineStatus,
    },

    #[error("no agent in flight")]
    NoActiveAgent,

    #[error("bad argument: {0}")]
    BadArg(String),

    #[error("removing {count} iterations would end the loop")]
    WouldEndLoop { count: u32 },

    #[error("engine loop has not terminated")]
    NotTerminated,

    #[error("tracker error: {0}")]
    Tracker(String),

    #[error("engine is shut down")]
    Shutdown,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
