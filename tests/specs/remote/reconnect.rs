//! Scenario: the server dies; the client retries with exponential
//! backoff, the first three attempts silently, and recovers once the
//! server is back on the same port.

use crate::prelude::*;
use ralph_core::SystemClock;
use ralph_remote::{ClientEvent, ClientTuning, ConnState, RemoteClient, TokenStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn fast_tuning() -> ClientTuning {
    ClientTuning {
        initial_delay_ms: 20,
        max_delay_ms: 200,
        multiplier: 2.0,
        max_retries: 10,
        silent_retry_threshold: 3,
        heartbeat_interval: Duration::from_millis(500),
        ..ClientTuning::default()
    }
}

#[tokio::test]
async fn backoff_reconnect_is_silent_then_visible_then_recovers() {
    let h = remote_harness(vec![]).await;
    let (client, mut events) = RemoteClient::connect(&h.url, &h.token, fast_tuning())
        .await
        .unwrap();

    let addr = h.addr;
    h.server.shutdown();

    // Wait for the visible reconnect attempt. Attempts 1-3 are silent;
    // attempt 4 announces itself with the doubled delay.
    let mut seen = Vec::new();
    let visible = loop {
        let event = timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("no reconnect activity")
            .expect("event stream closed");
        seen.push(event.clone());
        if let ClientEvent::Reconnecting { attempt, delay_ms } = event {
            break (attempt, delay_ms);
        }
    };
    assert_eq!(visible, (4, 160));
    assert!(seen
        .iter()
        .any(|e| matches!(e, ClientEvent::Disconnected { .. })));
    assert!(!seen
        .iter()
        .any(|e| matches!(e, ClientEvent::Reconnecting { attempt, .. } if *attempt <= 3)));

    // Bring the server back on the same port with the same token.
    let tokens = Arc::new(
        TokenStore::load_or_generate(h.tokens_path.clone(), SystemClock, false).unwrap(),
    );
    let server2 = bind_server(
        addr.to_string(),
        Arc::clone(&h.engine),
        tokens,
        h.home.path(),
        h.remote_cwd.path(),
    )
    .await;

    loop {
        let event = timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("client never reconnected")
            .expect("event stream closed");
        if matches!(event, ClientEvent::Connected) {
            break;
        }
    }
    assert_eq!(client.state(), ConnState::Connected);

    client.disconnect().await;
    server2.shutdown();
}

#[tokio::test]
async fn retries_exhaust_into_failed() {
    let h = remote_harness(vec![]).await;
    let tuning = ClientTuning {
        max_retries: 4,
        silent_retry_threshold: 1,
        ..fast_tuning()
    };
    let (client, mut events) = RemoteClient::connect(&h.url, &h.token, tuning)
        .await
        .unwrap();
    h.server.shutdown();

    let mut visible_attempts = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("no terminal event")
            .expect("event stream closed");
        match event {
            ClientEvent::Reconnecting { attempt, .. } => visible_attempts.push(attempt),
            ClientEvent::Failed { error } => {
                assert!(error.contains("4 attempts"));
                break;
            }
            _ => {}
        }
    }
    assert_eq!(visible_attempts, vec![2, 3, 4]);
    assert_eq!(client.state(), ConnState::Disconnected);
}

#[tokio::test]
async fn intentional_disconnect_never_reconnects() {
    let h = remote_harness(vec![]).await;
    let (client, mut events) = RemoteClient::connect(&h.url, &h.token, fast_tuning())
        .await
        .unwrap();

    client.disconnect().await;
    assert_eq!(client.state(), ConnState::Disconnected);

    // The only lifecycle events are the connect and the clean close.
    let mut lifecycle = Vec::new();
    while let Ok(Some(event)) = timeout(Duration::from_millis(300), events.recv()).await {
        lifecycle.push(event);
    }
    assert!(lifecycle
        .iter()
        .any(|e| matches!(e, ClientEvent::Disconnected { error: None })));
    assert!(!lifecycle
        .iter()
        .any(|e| matches!(e, ClientEvent::Reconnecting { .. })));

    h.server.shutdown();
}
