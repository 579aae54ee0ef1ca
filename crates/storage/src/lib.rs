// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Durable session state: per-cwd session files and the global
//! session registry.

mod atomic;
mod registry;
mod session;

pub use atomic::{atomic_write_bytes, atomic_write_json, rotate_bak_path};
pub use registry::{ListFilter, RegistryEntry, RegistryError, SessionRegistry, REGISTRY_FILE_NAME};
pub use session::{
    PersistedIterationResult, PersistedSession, SessionStatus, SessionStore, SessionStoreError,
    TaskSnapshot, TrackerState, SESSION_FILE_NAME, SESSION_SCHEMA_VERSION,
};
