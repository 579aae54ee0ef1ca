//! Scenario: tracker yields two prioritized tasks, the agent succeeds
//! and completes each; the session file and registry reflect the run.

use crate::prelude::*;
use ralph_core::{Task, TaskStatus};
use ralph_storage::{ListFilter, SessionStatus};

#[tokio::test]
async fn two_tasks_complete_in_priority_order_and_persist() {
    let h = persisted_engine(
        vec![
            Task::new("a", "first").with_priority(2),
            Task::new("b", "second").with_priority(1),
        ],
        engine_config(),
    );

    h.engine.start().await.unwrap();
    wait_idle(&h.engine).await;

    let state = h.engine.snapshot();
    assert_eq!(state.iterations.len(), 2);
    assert_eq!(state.tasks_completed, 2);
    assert_eq!(state.iterations[0].task.id, "a");
    assert_eq!(state.iterations[1].task.id, "b");
    assert_eq!(h.tracker.status_of("a"), Some(TaskStatus::Completed));
    assert_eq!(h.tracker.status_of("b"), Some(TaskStatus::Completed));

    // Session file invariants.
    let session = h.store.load(h.work.path()).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.updated_at >= session.started_at);
    assert!(session.tasks_completed <= session.tracker_state.total_tasks);
    assert_eq!(session.iterations.len() as u32, session.current_iteration);
    assert_eq!(session.tasks_completed, 2);
    assert!(session
        .tracker_state
        .tasks
        .iter()
        .all(|t| t.status == TaskStatus::Completed));

    // Registry mirrors the terminal status; nothing is resumable.
    let entry = h.registry.get_by_id(SESSION_ID).unwrap().unwrap();
    assert_eq!(entry.status, SessionStatus::Completed);
    assert!(h.registry.get_by_cwd(h.work.path()).unwrap().is_none());
    assert_eq!(h.registry.list(ListFilter::All).unwrap().len(), 1);
}

#[tokio::test]
async fn session_survives_reload_after_each_iteration() {
    let h = persisted_engine(vec![Task::new("a", "only")], engine_config());

    h.engine.start().await.unwrap();
    wait_idle(&h.engine).await;

    let session = h.store.load(h.work.path()).unwrap().unwrap();
    assert_eq!(session.session_id, SESSION_ID);
    assert_eq!(session.iterations.len(), 1);
    assert_eq!(session.iterations[0].task.id, "a");
    assert!(session.iterations[0].task_completed);
    assert_eq!(session.cwd, h.work.path());
}
