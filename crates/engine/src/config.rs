// SPDX-License-Identifier: MIT

//! Engine configuration.

use crate::prompt::DEFAULT_PROMPT_TEMPLATE;
use ralph_core::ErrorPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Static engine settings fixed at construction.
///
/// `max_iterations` seeds the initial budget; the live value sits in
/// `EngineState` and moves via `add_iterations`/`remove_iterations`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Iteration budget. 0 means unlimited.
    pub max_iterations: u32,
    /// Sleep between iterations.
    pub iteration_delay: Duration,
    pub error_policy: ErrorPolicy,
    pub prompt_template: String,
    /// Model override passed to the agent adapter.
    pub model: Option<String>,
    /// Working directory agents run in.
    pub cwd: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 0,
            iteration_delay: Duration::from_millis(1000),
            error_policy: ErrorPolicy::default(),
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            model: None,
            cwd: PathBuf::from("."),
        }
    }
}
