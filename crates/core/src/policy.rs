// SPDX-License-Identifier: MIT

//! Iteration error-handling policy.

use serde::{Deserialize, Serialize};

/// What to do when an iteration fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// Terminate the loop with reason `error`.
    Abort,
    /// Re-select the same task up to `max_retries` consecutive
    /// failures, then skip it.
    Retry,
    /// Add the task to the skipped set and move on.
    Skip,
    /// Record the failure and keep going; the task stays selectable.
    Continue,
}

impl std::fmt::Display for ErrorStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorStrategy::Abort => write!(f, "abort"),
            ErrorStrategy::Retry => write!(f, "retry"),
            ErrorStrategy::Skip => write!(f, "skip"),
            ErrorStrategy::Continue => write!(f, "continue"),
        }
    }
}

/// Error policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPolicy {
    pub strategy: ErrorStrategy,
    /// Consecutive failures tolerated per task under `Retry`.
    #[serde(default = "ErrorPolicy::default_max_retries")]
    pub max_retries: u32,
}

impl ErrorPolicy {
    /// Default retry budget for the `retry` strategy. Independent from
    /// the remote client's reconnect budget.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    fn default_max_retries() -> u32 {
        Self::DEFAULT_MAX_RETRIES
    }

    pub fn new(strategy: ErrorStrategy) -> Self {
        Self {
            strategy,
            max_retries: Self::DEFAULT_MAX_RETRIES,
        }
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::new(ErrorStrategy::Retry)
    }
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
