//! Scenario: pause lands mid-iteration; the in-flight agent finishes,
//! the engine pauses between iterations, and resume picks up task two.

use crate::prelude::*;
use ralph_adapters::FakeRun;
use ralph_core::{EngineEvent, EngineStatus, Task};
use ralph_storage::SessionStatus;
use std::time::Duration;

#[tokio::test]
async fn pause_waits_for_the_iteration_then_resume_continues() {
    let h = persisted_engine(
        vec![
            Task::new("a", "first").with_priority(2),
            Task::new("b", "second").with_priority(1),
        ],
        engine_config(),
    );
    h.agents
        .push_run(FakeRun::success().with_hold(Duration::from_millis(100)));
    let sub = h.engine.events();

    h.engine.start().await.unwrap();
    // Pause while iteration 1's agent is still holding.
    for _ in 0..1_000 {
        if h.agents.has_inflight() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    h.engine.pause().await.unwrap();

    wait_for(&h.engine, |s| s.status == EngineStatus::Paused).await;

    // The paused session is durable and resumable.
    let session = h.store.load(h.work.path()).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Paused);
    assert!(session.is_paused);
    assert!(session.paused_at.is_some());
    assert!(session.is_resumable());
    assert_eq!(session.iterations.len(), 1);

    h.engine.resume().await.unwrap();
    wait_idle(&h.engine).await;

    // Event order: iteration 1 completed, then paused, then resumed,
    // then iteration 2 started.
    let mut events = Vec::new();
    while let Some(event) = sub.try_recv() {
        events.push(event);
    }
    let completed_1 = events
        .iter()
        .position(|e| matches!(e, EngineEvent::IterationCompleted { result } if result.iteration == 1))
        .unwrap();
    let paused = events
        .iter()
        .position(|e| matches!(e, EngineEvent::EnginePaused))
        .unwrap();
    let started_2 = events
        .iter()
        .position(|e| matches!(e, EngineEvent::IterationStarted { iteration: 2, .. }))
        .unwrap();
    assert!(completed_1 < paused);
    assert!(paused < started_2);

    let session = h.store.load(h.work.path()).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(!session.is_paused);
    assert!(session.paused_at.is_none());
    assert_eq!(session.tasks_completed, 2);
}
