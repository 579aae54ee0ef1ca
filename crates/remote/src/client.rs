// SPDX-License-Identifier: MIT

//! Remote client: one logical tab per remote.
//!
//! `connect` performs the initial transport + auth handshake inline and
//! fails without retrying; after that a driver task owns the socket,
//! heartbeats every 15s, refreshes the connection token before expiry,
//! and reconnects with exponential backoff on unexpected closes. The
//! first few retries are silent so brief blips don't surface.

use crate::protocol::{decode, encode, Envelope, Payload, TokenType};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use ralph_core::{EngineEvent, EngineState, EngineStatus, Task};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client timing and backoff knobs, shrunk by specs.
#[derive(Debug, Clone)]
pub struct ClientTuning {
    /// Interval between client pings.
    pub heartbeat_interval: Duration,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub max_retries: u32,
    /// Retries below this emit no user-visible `Reconnecting` event.
    pub silent_retry_threshold: u32,
    /// Refresh the connection token when less than this remains.
    pub refresh_threshold: chrono::Duration,
    /// Deadline for a single request/response pair.
    pub request_timeout: Duration,
}

impl ClientTuning {
    /// Reconnect budget. Independent from the engine's error policy
    /// retry budget.
    pub const DEFAULT_MAX_RETRIES: u32 = 10;
}

impl Default for ClientTuning {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            silent_retry_threshold: 3,
            refresh_threshold: chrono::Duration::hours(crate::token::REFRESH_THRESHOLD_HOURS),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Delay before reconnect attempt `attempt` (1-based):
/// `min(initial * multiplier^(attempt-1), max)`.
pub fn backoff_delay(tuning: &ClientTuning, attempt: u32) -> Duration {
    let exp = tuning.multiplier.powi(attempt.saturating_sub(1) as i32);
    let ms = (tuning.initial_delay_ms as f64 * exp).min(tuning.max_delay_ms as f64);
    Duration::from_millis(ms as u64)
}

/// Connection lifecycle as observed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events surfaced to the client's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected { error: Option<String> },
    Reconnecting { attempt: u32, delay_ms: u64 },
    Failed { error: String },
    EngineEvent { event: EngineEvent },
    ServerStatus { uptime_secs: u64, engine_status: EngineStatus, clients: u32 },
    Latency { latency_ms: u64 },
}

/// Client-side errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("request timed out")]
    Timeout,
    #[error("not connected")]
    NotConnected,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("remote refused: {0}")]
    Refused(String),
}

/// Result of a successful config push.
#[derive(Debug, Clone, PartialEq)]
pub struct PushOutcome {
    pub config_path: Option<PathBuf>,
    pub backup_path: Option<PathBuf>,
    pub migration_triggered: bool,
    pub requires_restart: bool,
}

struct ClientShared {
    url: String,
    server_token: String,
    tuning: ClientTuning,
    state: Mutex<ConnState>,
    intentional: AtomicBool,
    latency_ms: Mutex<Option<u64>>,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<Envelope>>>,
    out_tx: Mutex<Option<mpsc::Sender<Envelope>>>,
    events: mpsc::Sender<ClientEvent>,
    connection_token: Mutex<Option<(String, DateTime<Utc>)>>,
    refresh_inflight: AtomicBool,
    close_notify: tokio::sync::Notify,
}

impl ClientShared {
    fn emit(&self, event: ClientEvent) {
        if self.events.try_send(event).is_err() {
            debug!("client event receiver lagging, event dropped");
        }
    }

    fn set_state(&self, state: ConnState) {
        *self.state.lock() = state;
    }
}

/// Handle to a remote connection.
pub struct RemoteClient {
    shared: Arc<ClientShared>,
    driver: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RemoteClient {
    /// Connect and authenticate.
    ///
    /// A transport failure or an `auth_response {success: false}` fails
    /// the call outright; reconnection only ever follows an unexpected
    /// close of an established connection.
    pub async fn connect(
        url: &str,
        server_token: &str,
        tuning: ClientTuning,
    ) -> Result<(Self, mpsc::Receiver<ClientEvent>), ClientError> {
        let (events_tx, events_rx) = mpsc::channel(256);
        let shared = Arc::new(ClientShared {
            url: url.to_string(),
            server_token: server_token.to_string(),
            tuning,
            state: Mutex::new(ConnState::Connecting),
            intentional: AtomicBool::new(false),
            latency_ms: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            out_tx: Mutex::new(None),
            events: events_tx,
            connection_token: Mutex::new(None),
            refresh_inflight: AtomicBool::new(false),
            close_notify: tokio::sync::Notify::new(),
        });

        let ws = establish(&shared).await?;
        shared.set_state(ConnState::Connected);
        shared.emit(ClientEvent::Connected);
        info!(url = %shared.url, "connected");

        let driver_shared = Arc::clone(&shared);
        let driver = tokio::spawn(drive(driver_shared, ws));

        Ok((
            Self {
                shared,
                driver: Mutex::new(Some(driver)),
            },
            events_rx,
        ))
    }

    pub fn state(&self) -> ConnState {
        *self.shared.state.lock()
    }

    /// Round-trip time from the most recent pong.
    pub fn latency_ms(&self) -> Option<u64> {
        *self.shared.latency_ms.lock()
    }

    /// Current connection token expiry, if authenticated.
    pub fn token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.shared.connection_token.lock().as_ref().map(|(_, at)| *at)
    }

    /// User-initiated disconnect. Never reconnects.
    pub async fn disconnect(&self) {
        self.shared.intentional.store(true, Ordering::SeqCst);
        self.shared.close_notify.notify_waiters();
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            let _ = driver.await;
        }
        self.shared.set_state(ConnState::Disconnected);
    }

    /// Send a request and await the response correlated by id.
    pub async fn request(&self, payload: Payload) -> Result<Envelope, ClientError> {
        let out_tx = self
            .shared
            .out_tx
            .lock()
            .clone()
            .ok_or(ClientError::NotConnected)?;

        let envelope = Envelope::new(payload, Utc::now());
        let id = envelope.id;
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);
        if out_tx.send(envelope).await.is_err() {
            self.shared.pending.lock().remove(&id);
            return Err(ClientError::NotConnected);
        }

        match timeout(self.shared.tuning.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.shared.pending.lock().remove(&id);
                Err(ClientError::NotConnected)
            }
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                Err(ClientError::Timeout)
            }
        }
    }

    /// Fire-and-forget send (subscribe/unsubscribe have no response).
    pub async fn send(&self, payload: Payload) -> Result<(), ClientError> {
        let envelope = Envelope::new(payload, Utc::now());
        let out_tx = self
            .shared
            .out_tx
            .lock()
            .clone()
            .ok_or(ClientError::NotConnected)?;
        out_tx
            .send(envelope)
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    pub async fn subscribe(&self) -> Result<(), ClientError> {
        self.send(Payload::Subscribe).await
    }

    pub async fn unsubscribe(&self) -> Result<(), ClientError> {
        self.send(Payload::Unsubscribe).await
    }

    pub async fn get_state(&self) -> Result<EngineState, ClientError> {
        match self.request(Payload::GetState).await?.payload {
            Payload::StateResponse { state } => Ok(state),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_tasks(&self) -> Result<Vec<Task>, ClientError> {
        match self.request(Payload::GetTasks).await?.payload {
            Payload::TasksResponse { tasks } => Ok(tasks),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_prompt_preview(&self) -> Result<Option<String>, ClientError> {
        match self.request(Payload::GetPromptPreview).await?.payload {
            Payload::PromptPreviewResponse { prompt } => Ok(prompt),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_iteration_output(
        &self,
        iteration: u32,
    ) -> Result<(Option<String>, Option<String>), ClientError> {
        match self
            .request(Payload::GetIterationOutput { iteration })
            .await?
            .payload
        {
            Payload::IterationOutputResponse { output, stderr, .. } => Ok((output, stderr)),
            other => Err(unexpected(other)),
        }
    }

    pub async fn pause(&self) -> Result<(), ClientError> {
        self.operation(Payload::Pause).await
    }

    pub async fn resume(&self) -> Result<(), ClientError> {
        self.operation(Payload::Resume).await
    }

    pub async fn interrupt(&self) -> Result<(), ClientError> {
        self.operation(Payload::Interrupt).await
    }

    pub async fn refresh_tasks(&self) -> Result<(), ClientError> {
        self.operation(Payload::RefreshTasks).await
    }

    pub async fn add_iterations(&self, count: u32) -> Result<(), ClientError> {
        self.operation(Payload::AddIterations { count }).await
    }

    pub async fn remove_iterations(&self, count: u32) -> Result<(), ClientError> {
        self.operation(Payload::RemoveIterations { count }).await
    }

    pub async fn continue_run(&self) -> Result<(), ClientError> {
        self.operation(Payload::Continue).await
    }

    pub async fn check_config(&self) -> Result<Envelope, ClientError> {
        let response = self.request(Payload::CheckConfig).await?;
        match response.payload {
            Payload::CheckConfigResponse { .. } => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    pub async fn push_config(
        &self,
        scope: crate::config_push::ConfigScope,
        config_content: String,
        overwrite: bool,
    ) -> Result<PushOutcome, ClientError> {
        match self
            .request(Payload::PushConfig {
                scope,
                config_content,
                overwrite,
            })
            .await?
            .payload
        {
            Payload::PushConfigResponse {
                success: true,
                config_path,
                backup_path,
                migration_triggered,
                requires_restart,
                ..
            } => Ok(PushOutcome {
                config_path,
                backup_path,
                migration_triggered,
                requires_restart,
            }),
            Payload::PushConfigResponse { error, .. } => Err(ClientError::Refused(
                error.unwrap_or_else(|| "push rejected".to_string()),
            )),
            other => Err(unexpected(other)),
        }
    }

    async fn operation(&self, payload: Payload) -> Result<(), ClientError> {
        match self.request(payload).await?.payload {
            Payload::OperationResult { success: true, .. } => Ok(()),
            Payload::OperationResult { error, .. } => Err(ClientError::Refused(
                error.unwrap_or_else(|| "operation failed".to_string()),
            )),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(payload: Payload) -> ClientError {
    ClientError::Protocol(format!("unexpected response: {}", payload.type_name()))
}

/// Open the transport and run the auth handshake.
async fn establish(shared: &ClientShared) -> Result<WsStream, ClientError> {
    let (mut ws, _) = connect_async(shared.url.as_str())
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;

    let auth = Envelope::new(
        Payload::Auth {
            token: shared.server_token.clone(),
            token_type: TokenType::Server,
        },
        Utc::now(),
    );
    let text = encode(&auth).map_err(|e| ClientError::Protocol(e.to_string()))?;
    ws.send(Message::Text(text))
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;

    let deadline = shared.tuning.request_timeout;
    loop {
        let message = match timeout(deadline, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => text,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => return Err(ClientError::Transport(e.to_string())),
            Ok(None) => return Err(ClientError::Transport("closed during auth".to_string())),
            Err(_) => return Err(ClientError::Timeout),
        };
        let envelope = decode(&message).map_err(|e| ClientError::Protocol(e.to_string()))?;
        if envelope.id != auth.id {
            continue;
        }
        return match envelope.payload {
            Payload::AuthResponse {
                success: true,
                connection_token,
                expires_at,
                ..
            } => {
                if let (Some(token), Some(at)) = (connection_token, expires_at) {
                    *shared.connection_token.lock() = Some((token, at));
                }
                Ok(ws)
            }
            Payload::AuthResponse { error, .. } => Err(ClientError::Auth(
                error.unwrap_or_else(|| "auth rejected".to_string()),
            )),
            other => Err(unexpected(other)),
        };
    }
}

/// Driver task: pump one connection, then reconnect with backoff until
/// intentional disconnect, auth rejection, or retry exhaustion.
async fn drive(shared: Arc<ClientShared>, ws: WsStream) {
    let mut current = Some(ws);
    loop {
        if let Some(ws) = current.take() {
            run_connection(&shared, ws).await;
            shared.out_tx.lock().take();
            shared.pending.lock().clear();
            if shared.intentional.load(Ordering::SeqCst) {
                shared.set_state(ConnState::Disconnected);
                shared.emit(ClientEvent::Disconnected { error: None });
                return;
            }
            shared.set_state(ConnState::Reconnecting);
            shared.emit(ClientEvent::Disconnected {
                error: Some("connection lost".to_string()),
            });
        }

        match reconnect(&shared).await {
            Some(ws) => {
                shared.set_state(ConnState::Connected);
                shared.emit(ClientEvent::Connected);
                info!(url = %shared.url, "reconnected");
                current = Some(ws);
            }
            None => {
                shared.set_state(ConnState::Disconnected);
                return;
            }
        }
    }
}

/// Exponential backoff reconnect. Returns `None` when giving up.
async fn reconnect(shared: &Arc<ClientShared>) -> Option<WsStream> {
    for attempt in 1..=shared.tuning.max_retries {
        let delay = backoff_delay(&shared.tuning, attempt);
        if attempt > shared.tuning.silent_retry_threshold {
            shared.emit(ClientEvent::Reconnecting {
                attempt,
                delay_ms: delay.as_millis() as u64,
            });
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shared.close_notify.notified() => return None,
        }

        if shared.intentional.load(Ordering::SeqCst) {
            return None;
        }
        match establish(shared).await {
            Ok(ws) => return Some(ws),
            Err(ClientError::Auth(error)) => {
                // Fatal: the server explicitly rejected us.
                shared.emit(ClientEvent::Failed { error });
                return None;
            }
            Err(e) => {
                debug!(attempt, error = %e, "reconnect attempt failed");
            }
        }
    }
    shared.emit(ClientEvent::Failed {
        error: format!("gave up after {} attempts", shared.tuning.max_retries),
    });
    None
}

/// Pump one established connection until it closes.
async fn run_connection(shared: &Arc<ClientShared>, ws: WsStream) {
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(64);
    *shared.out_tx.lock() = Some(out_tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(envelope) = out_rx.recv().await {
            let Ok(text) = encode(&envelope) else { continue };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut heartbeat = tokio::time::interval(shared.tuning.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.reset();
    let mut last_ping: Option<(Uuid, Instant)> = None;

    loop {
        tokio::select! {
            maybe_msg = stream.next() => match maybe_msg {
                Some(Ok(Message::Text(text))) => {
                    handle_inbound(shared, &out_tx, &text, &mut last_ping);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "read error");
                    break;
                }
            },
            _ = heartbeat.tick() => {
                let ping = Envelope::new(Payload::Ping, Utc::now());
                last_ping = Some((ping.id, Instant::now()));
                if out_tx.send(ping).await.is_err() {
                    break;
                }
                maybe_refresh_token(shared, &out_tx).await;
            },
            _ = shared.close_notify.notified() => break,
        }
    }

    drop(out_tx);
    shared.out_tx.lock().take();
    let _ = writer.await;
}

fn handle_inbound(
    shared: &Arc<ClientShared>,
    out_tx: &mpsc::Sender<Envelope>,
    text: &str,
    last_ping: &mut Option<(Uuid, Instant)>,
) {
    let envelope = match decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "undecodable message from server");
            return;
        }
    };

    // Responses correlate to pending requests by id.
    if let Some(tx) = shared.pending.lock().remove(&envelope.id) {
        let _ = tx.send(envelope);
        return;
    }

    match envelope.payload {
        Payload::Pong => {
            if let Some((id, at)) = last_ping.take() {
                if id == envelope.id {
                    let latency_ms = at.elapsed().as_millis() as u64;
                    *shared.latency_ms.lock() = Some(latency_ms);
                    shared.emit(ClientEvent::Latency { latency_ms });
                } else {
                    *last_ping = Some((id, at));
                }
            }
        }
        Payload::Ping => {
            // Server heartbeat; echo the id so it sees traffic.
            let pong = Envelope::reply(envelope.id, Payload::Pong, Utc::now());
            if out_tx.try_send(pong).is_err() {
                debug!("send queue full, pong dropped");
            }
        }
        Payload::EngineEvent { event } => {
            shared.emit(ClientEvent::EngineEvent { event });
        }
        Payload::ServerStatus {
            uptime_secs,
            engine_status,
            clients,
        } => {
            shared.emit(ClientEvent::ServerStatus {
                uptime_secs,
                engine_status,
                clients,
            });
        }
        Payload::Error { code, message } => {
            warn!(code = %code, message = %message, "server error");
        }
        other => {
            debug!(type_name = other.type_name(), "unsolicited message ignored");
        }
    }
}

/// Send `token_refresh` when the connection token is close to expiry.
/// At most one refresh is in flight at a time; a failed refresh leaves
/// the current token in place until it actually expires.
async fn maybe_refresh_token(shared: &Arc<ClientShared>, out_tx: &mpsc::Sender<Envelope>) {
    let needs_refresh = {
        let token = shared.connection_token.lock();
        match token.as_ref() {
            Some((_, expires_at)) => *expires_at - Utc::now() < shared.tuning.refresh_threshold,
            None => false,
        }
    };
    if !needs_refresh || shared.refresh_inflight.swap(true, Ordering::SeqCst) {
        return;
    }

    let envelope = Envelope::new(Payload::TokenRefresh, Utc::now());
    let (tx, rx) = oneshot::channel();
    shared.pending.lock().insert(envelope.id, tx);
    if out_tx.send(envelope).await.is_err() {
        shared.refresh_inflight.store(false, Ordering::SeqCst);
        return;
    }

    let waiter = Arc::clone(shared);
    tokio::spawn(async move {
        let outcome = timeout(waiter.tuning.request_timeout, rx).await;
        match outcome {
            Ok(Ok(Envelope {
                payload:
                    Payload::TokenRefreshResponse {
                        success: true,
                        connection_token: Some(token),
                        expires_at: Some(at),
                        ..
                    },
                ..
            })) => {
                *waiter.connection_token.lock() = Some((token, at));
                info!("connection token refreshed");
            }
            _ => {
                // Keep the old token; it is valid until expiry.
                warn!("token refresh failed");
            }
        }
        waiter.refresh_inflight.store(false, Ordering::SeqCst);
    });
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
