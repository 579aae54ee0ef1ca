//! Scenario: with the skip strategy, a failing task is recorded,
//! skipped durably, and the loop moves on to the next task.

use crate::prelude::*;
use ralph_adapters::FakeRun;
use ralph_core::{ErrorPolicy, ErrorStrategy, IterationStatus, Task};
use ralph_storage::SessionStatus;

#[tokio::test]
async fn failed_task_is_skipped_and_recorded_in_the_session() {
    let mut config = engine_config();
    config.error_policy = ErrorPolicy::new(ErrorStrategy::Skip);
    let h = persisted_engine(
        vec![
            Task::new("a", "first").with_priority(2),
            Task::new("b", "second").with_priority(1),
        ],
        config,
    );
    h.agents.push_run(FakeRun::failure(1));

    h.engine.start().await.unwrap();
    wait_idle(&h.engine).await;

    let state = h.engine.snapshot();
    assert_eq!(state.iterations.len(), 2);
    assert_eq!(state.iterations[0].status, IterationStatus::Failed);
    assert_eq!(state.iterations[0].task.id, "a");
    assert_eq!(state.iterations[1].task.id, "b");

    let session = h.store.load(h.work.path()).unwrap().unwrap();
    assert_eq!(session.skipped_task_ids, vec!["a".to_string()]);
    assert_eq!(session.iterations[0].status, IterationStatus::Failed);
    assert_eq!(
        session.iterations[0].error.as_deref(),
        Some("agent exited with code 1")
    );
    // One of two tasks completed; the loop still finished cleanly.
    assert_eq!(session.tasks_completed, 1);
    assert_eq!(session.status, SessionStatus::Completed);
}
