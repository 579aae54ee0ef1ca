// SPDX-License-Identifier: MIT

use super::*;
use std::path::PathBuf;

fn invocation(id: &str, prompt: &str) -> AgentInvocation {
    AgentInvocation {
        agent_id: AgentId::new(id),
        prompt: prompt.to_string(),
        cwd: PathBuf::from("/tmp"),
        model: None,
    }
}

async fn drain(rx: &mut mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let done = matches!(event, AgentEvent::End { .. });
        events.push(event);
        if done {
            break;
        }
    }
    events
}

#[tokio::test]
async fn default_run_succeeds() {
    let agents = FakeAgentAdapter::new();
    let (tx, mut rx) = mpsc::channel(16);

    agents.execute(invocation("a-1", "do it"), tx).await.unwrap();
    let events = drain(&mut rx).await;

    assert_eq!(
        events.last(),
        Some(&AgentEvent::End { exit_code: Some(0) })
    );
    assert_eq!(agents.prompts(), vec!["do it".to_string()]);
}

#[tokio::test]
async fn scripted_runs_pop_in_order() {
    let agents = FakeAgentAdapter::new();
    agents.push_run(FakeRun::failure(2));
    agents.push_run(FakeRun::success());

    let (tx, mut rx) = mpsc::channel(16);
    agents.execute(invocation("a-1", "x"), tx).await.unwrap();
    let first = drain(&mut rx).await;
    assert_eq!(first.last(), Some(&AgentEvent::End { exit_code: Some(2) }));

    let (tx, mut rx) = mpsc::channel(16);
    agents.execute(invocation("a-2", "y"), tx).await.unwrap();
    let second = drain(&mut rx).await;
    assert_eq!(
        second.last(),
        Some(&AgentEvent::End { exit_code: Some(0) })
    );
}

#[tokio::test]
async fn interrupt_ends_held_run_with_no_exit_code() {
    let agents = FakeAgentAdapter::new();
    agents.push_run(FakeRun::success().with_hold(Duration::from_secs(60)));

    let (tx, mut rx) = mpsc::channel(16);
    agents.execute(invocation("a-1", "x"), tx).await.unwrap();

    // First event arrives, then the run holds.
    assert_eq!(
        rx.recv().await,
        Some(AgentEvent::Stdout {
            data: "done\n".to_string()
        })
    );
    agents.interrupt(&AgentId::new("a-1")).await.unwrap();
    assert_eq!(rx.recv().await, Some(AgentEvent::End { exit_code: None }));
}

#[tokio::test]
async fn interrupt_unknown_agent_fails() {
    let agents = FakeAgentAdapter::new();
    let err = agents.interrupt(&AgentId::new("nope")).await.unwrap_err();
    assert_eq!(err, AgentError::NotFound("nope".to_string()));
}

#[tokio::test]
async fn execute_error_is_consumed_once() {
    let agents = FakeAgentAdapter::new();
    agents.set_execute_error(AgentError::SpawnFailed("boom".to_string()));

    let (tx, _rx) = mpsc::channel(16);
    let err = agents
        .execute(invocation("a-1", "x"), tx)
        .await
        .unwrap_err();
    assert_eq!(err, AgentError::SpawnFailed("boom".to_string()));

    let (tx, mut rx) = mpsc::channel(16);
    agents.execute(invocation("a-2", "y"), tx).await.unwrap();
    let events = drain(&mut rx).await;
    assert_eq!(
        events.last(),
        Some(&AgentEvent::End { exit_code: Some(0) })
    );
}
