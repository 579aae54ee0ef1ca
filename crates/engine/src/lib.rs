// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ralph-tui execution engine: the iteration state machine that drives
//! an agent over a tracker's pending tasks.

mod bus;
mod config;
mod engine;
mod error;
mod persist;
mod prompt;
mod runner;
mod select;

pub use bus::{EventBus, EventSubscription, DEFAULT_SUBSCRIBER_CAPACITY};
pub use config::EngineConfig;
pub use engine::{Engine, EngineControl, IterationOutput};
pub use error::EngineError;
pub use persist::SessionPersistence;
pub use prompt::{render_prompt, DEFAULT_PROMPT_TEMPLATE};
pub use select::select_next_task;
