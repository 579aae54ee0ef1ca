//! Scenario: a subscribed client receives every engine event between
//! subscribe and unsubscribe, in emission order, and nothing after.

use crate::prelude::*;
use ralph_core::{EngineEvent, EngineStatus, Task};
use ralph_remote::{ClientEvent, ClientTuning, RemoteClient};
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
async fn exactly_the_emitted_events_arrive_in_order() {
    let h = remote_harness(vec![Task::new("a", "only")]).await;
    let (client, mut events) = RemoteClient::connect(&h.url, &h.token, ClientTuning::default())
        .await
        .unwrap();

    client.subscribe().await.unwrap();
    // One round trip pins the subscription before the loop starts.
    client.get_state().await.unwrap();

    h.engine.start().await.unwrap();

    let mut received = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event stream stalled")
            .expect("event stream closed");
        if let ClientEvent::EngineEvent { event } = event {
            let stopped = matches!(event, EngineEvent::EngineStopped { .. });
            received.push(event);
            if stopped {
                break;
            }
        }
    }

    // One successful single-task run emits exactly this sequence.
    let names: Vec<_> = received.iter().map(|e| e.name()).collect();
    assert_eq!(
        names,
        vec![
            "engine:started",
            "task:selected",
            "iteration:started",
            "agent:output",
            "task:completed",
            "iteration:completed",
            "engine:stopped",
        ]
    );

    // After unsubscribe, a second run produces no more events here.
    client.unsubscribe().await.unwrap();
    client.get_state().await.unwrap();

    client.continue_run().await.unwrap();
    for _ in 0..100 {
        if h.engine.snapshot().status == EngineStatus::Idle {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut post_unsubscribe = Vec::new();
    while let Ok(Some(event)) = timeout(Duration::from_millis(300), events.recv()).await {
        if matches!(event, ClientEvent::EngineEvent { .. }) {
            post_unsubscribe.push(event);
        }
    }
    assert!(post_unsubscribe.is_empty());

    client.disconnect().await;
    h.server.shutdown();
}
