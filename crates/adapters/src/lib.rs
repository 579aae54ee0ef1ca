// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Adapter seams between the engine and the outside world.
//!
//! Concrete agent and tracker backends live out of tree; the engine
//! only sees the traits defined here. Fakes for deterministic tests are
//! exported behind the `test-support` feature.

pub mod agent;
pub mod tracker;

pub use agent::{AgentAdapter, AgentError, AgentEvent, AgentHandle, AgentInvocation};
pub use tracker::{TrackerAdapter, TrackerError};

#[cfg(any(test, feature = "test-support"))]
pub use agent::{AgentCall, FakeAgentAdapter, FakeRun};
#[cfg(any(test, feature = "test-support"))]
pub use tracker::FakeTracker;
