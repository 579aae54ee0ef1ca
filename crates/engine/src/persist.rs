// SPDX-License-Identifier: MIT

//! Session persistence wiring for the engine loop.
//!
//! Every mutation saves the session file atomically and mirrors the
//! status into the global registry. Persistence failures never stop
//! the loop: they are logged and the session is marked dirty so the
//! next save retries.

use ralph_core::{Clock, IterationResult, Task};
use ralph_storage::{PersistedSession, SessionRegistry, SessionStatus, SessionStore};
use tracing::warn;

/// Durable session state owned by a running engine.
pub struct SessionPersistence<C: Clock> {
    store: SessionStore<C>,
    registry: SessionRegistry<C>,
    session: PersistedSession,
    clock: C,
    dirty: bool,
}

impl<C: Clock> SessionPersistence<C> {
    pub fn new(
        store: SessionStore<C>,
        registry: SessionRegistry<C>,
        session: PersistedSession,
        clock: C,
    ) -> Self {
        Self {
            store,
            registry,
            session,
            clock,
            dirty: false,
        }
    }

    /// The persisted session as of the last mutation.
    pub fn session(&self) -> &PersistedSession {
        &self.session
    }

    #[cfg(test)]
    pub(crate) fn session_mut(&mut self) -> &mut PersistedSession {
        &mut self.session
    }

    /// Whether the last save failed and a retry is pending.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn after_iteration(
        &mut self,
        result: &IterationResult,
        tasks_completed: u32,
        tasks: Option<&[Task]>,
    ) {
        let now = self.clock.now();
        self.session
            .update_after_iteration(result, tasks_completed, tasks, now);
        self.save();
    }

    pub fn running(&mut self) {
        let now = self.clock.now();
        self.session.resume(now);
        self.save();
        self.sync_registry(SessionStatus::Running);
    }

    pub fn paused(&mut self) {
        let now = self.clock.now();
        self.session.pause(now);
        self.save();
        self.sync_registry(SessionStatus::Paused);
    }

    pub fn completed(&mut self) {
        let now = self.clock.now();
        self.session.complete(now);
        self.save();
        self.sync_registry(SessionStatus::Completed);
    }

    pub fn failed(&mut self) {
        let now = self.clock.now();
        self.session.fail(now);
        self.save();
        self.sync_registry(SessionStatus::Failed);
    }

    pub fn interrupted(&mut self) {
        let now = self.clock.now();
        self.session.mark_interrupted(now);
        self.save();
        self.sync_registry(SessionStatus::Interrupted);
    }

    pub fn add_skipped_task(&mut self, task_id: &str) {
        self.session.add_skipped_task(task_id);
        self.save();
    }

    fn save(&mut self) {
        match self.store.save(&mut self.session) {
            Ok(()) => self.dirty = false,
            Err(e) => {
                self.dirty = true;
                warn!(
                    session_id = %self.session.session_id,
                    error = %e,
                    "session save failed, will retry on next save",
                );
            }
        }
    }

    fn sync_registry(&self, status: SessionStatus) {
        if let Err(e) = self.registry.update_status(&self.session.session_id, status) {
            warn!(
                session_id = %self.session.session_id,
                error = %e,
                "registry status update failed",
            );
        }
    }
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
