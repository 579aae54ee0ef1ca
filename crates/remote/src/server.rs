// SPDX-License-Identifier: MIT

//! Remote server: accepts WebSocket connections, authenticates them,
//! forwards engine events to subscribers, and dispatches control
//! commands.
//!
//! Per-connection state machine: `connected` until a valid `auth`
//! arrives within the deadline, then `authenticated`, optionally
//! `subscribed`, then `closed`. Each connection has a reader task and
//! a writer task behind a send queue; engine commands from all
//! connections funnel through one dispatcher so only one is in flight
//! at a time.

use crate::config_push::{check_config, push_config, ConfigPaths};
use crate::protocol::{codes, decode, encode, Envelope, Payload, ProtocolError, TokenType};
use crate::token::TokenStore;
use futures_util::{SinkExt, StreamExt};
use ralph_core::Clock;
use ralph_engine::{EngineControl, EventSubscription};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Listener defaults.
#[derive(Debug, Clone)]
pub struct ListenOptions {
    pub port: u16,
    pub daemon: bool,
    pub rotate_token: bool,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            port: crate::protocol::DEFAULT_PORT,
            daemon: false,
            rotate_token: false,
        }
    }
}

/// Timing knobs, shrunk by specs.
#[derive(Debug, Clone)]
pub struct ServerTuning {
    /// How long a connection may stay unauthenticated.
    pub auth_deadline: Duration,
    /// Interval between server heartbeats.
    pub heartbeat_interval: Duration,
    /// Close after this long without inbound traffic.
    pub liveness_window: Duration,
    /// Close when a single write stalls this long.
    pub write_stall_limit: Duration,
}

impl Default for ServerTuning {
    fn default() -> Self {
        Self {
            auth_deadline: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            liveness_window: Duration::from_secs(90),
            write_stall_limit: Duration::from_secs(30),
        }
    }
}

/// Errors from server startup.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Send queue capacity per connection.
const SEND_QUEUE: usize = 64;

/// Command dispatch queue capacity.
const COMMAND_QUEUE: usize = 32;

struct CommandJob {
    command: ralph_core::Command,
    operation: &'static str,
    request_id: Uuid,
    out_tx: mpsc::Sender<Envelope>,
}

struct Shared<E, C: Clock> {
    engine: Arc<E>,
    tokens: Arc<TokenStore<C>>,
    tuning: ServerTuning,
    clock: C,
    paths: ConfigPaths,
    started: Instant,
    clients: AtomicU32,
    cmd_tx: mpsc::Sender<CommandJob>,
    shutdown: tokio::sync::Notify,
    is_shutdown: std::sync::atomic::AtomicBool,
}

/// The remote server.
pub struct RemoteServer<E, C: Clock> {
    local_addr: SocketAddr,
    shared: Arc<Shared<E, C>>,
    accept_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
}

impl<E, C> RemoteServer<E, C>
where
    E: EngineControl,
    C: Clock,
{
    /// Bind the listener and start accepting connections.
    pub async fn bind(
        addr: impl tokio::net::ToSocketAddrs,
        engine: Arc<E>,
        tokens: Arc<TokenStore<C>>,
        paths: ConfigPaths,
        tuning: ServerTuning,
        clock: C,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let shared = Arc::new(Shared {
            engine,
            tokens,
            tuning,
            clock,
            paths,
            started: Instant::now(),
            clients: AtomicU32::new(0),
            cmd_tx,
            shutdown: tokio::sync::Notify::new(),
            is_shutdown: std::sync::atomic::AtomicBool::new(false),
        });

        let dispatch_task = tokio::spawn(Self::dispatch_loop(Arc::clone(&shared), cmd_rx));
        let accept_shared = Arc::clone(&shared);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection accepted");
                        let shared = Arc::clone(&accept_shared);
                        tokio::spawn(async move {
                            if let Ok(ws) = accept_async(stream).await {
                                Connection::run(shared, ws, peer).await;
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        });

        info!(%local_addr, "remote server listening");
        Ok(Self {
            local_addr,
            shared,
            accept_task,
            dispatch_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of authenticated connections.
    pub fn client_count(&self) -> u32 {
        self.shared.clients.load(Ordering::Relaxed)
    }

    /// Stop accepting, dispatching, and serving existing connections.
    pub fn shutdown(self) {
        self.shared.is_shutdown.store(true, Ordering::SeqCst);
        self.shared.shutdown.notify_waiters();
        self.accept_task.abort();
        self.dispatch_task.abort();
    }

    /// Engine commands run one at a time, in arrival order; the
    /// operation_result is sent only after the engine applied (or
    /// rejected) the operation.
    async fn dispatch_loop(shared: Arc<Shared<E, C>>, mut cmd_rx: mpsc::Receiver<CommandJob>) {
        while let Some(job) = cmd_rx.recv().await {
            let result = shared.engine.dispatch(job.command).await;
            let (success, error) = match result {
                Ok(()) => (true, None),
                Err(e) => (false, Some(e.to_string())),
            };
            let reply = Envelope::reply(
                job.request_id,
                Payload::OperationResult {
                    operation: job.operation.to_string(),
                    success,
                    error,
                },
                shared.clock.now(),
            );
            let _ = job.out_tx.send(reply).await;
        }
    }
}

/// One live connection.
struct Connection<E, C: Clock> {
    shared: Arc<Shared<E, C>>,
    out_tx: mpsc::Sender<Envelope>,
    peer: SocketAddr,
    subscription: Option<SubscriptionHandle>,
}

struct SubscriptionHandle {
    events: Arc<EventSubscription>,
    forward_task: JoinHandle<()>,
}

impl<E, C> Connection<E, C>
where
    E: EngineControl,
    C: Clock,
{
    async fn run(shared: Arc<Shared<E, C>>, ws: WebSocketStream<TcpStream>, peer: SocketAddr) {
        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(SEND_QUEUE);

        let write_stall = shared.tuning.write_stall_limit;
        let writer_task = tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                let Ok(text) = encode(&envelope) else {
                    continue;
                };
                match timeout(write_stall, sink.send(Message::Text(text))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => break,
                    Err(_) => {
                        warn!("write stalled, closing connection");
                        break;
                    }
                }
            }
            let _ = sink.close().await;
        });

        let mut conn = Connection {
            shared,
            out_tx,
            peer,
            subscription: None,
        };
        conn.serve(&mut stream).await;

        if let Some(sub) = conn.subscription.take() {
            sub.events.close();
            let _ = sub.forward_task.await;
        }
        drop(conn.out_tx);
        let _ = writer_task.await;
        debug!(peer = %conn.peer, "connection closed");
    }

    async fn serve(
        &mut self,
        stream: &mut futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
    ) {
        // connected -> authenticated: a valid auth must arrive in time.
        if !self.authenticate(stream).await {
            return;
        }
        self.shared.clients.fetch_add(1, Ordering::Relaxed);

        let mut heartbeat = tokio::time::interval(self.shared.tuning.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.reset();
        let mut last_rx = Instant::now();

        loop {
            if self.shared.is_shutdown.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = self.shared.shutdown.notified() => break,
                maybe_msg = stream.next() => match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        last_rx = Instant::now();
                        if !self.handle_text(&text).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        last_rx = Instant::now();
                    }
                    Some(Err(e)) => {
                        debug!(peer = %self.peer, error = %e, "read error");
                        break;
                    }
                },
                _ = heartbeat.tick() => {
                    if last_rx.elapsed() > self.shared.tuning.liveness_window {
                        self.send_error(codes::HEARTBEAT_TIMEOUT, "no traffic within liveness window").await;
                        break;
                    }
                    let now = self.shared.clock.now();
                    self.send(Envelope::new(Payload::Ping, now)).await;
                    self.send(Envelope::new(self.server_status(), now)).await;
                }
            }
        }

        self.shared.clients.fetch_sub(1, Ordering::Relaxed);
    }

    /// Wait for the auth message. Any other first message, an invalid
    /// token, or the deadline expiring closes the connection.
    async fn authenticate(
        &mut self,
        stream: &mut futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
    ) -> bool {
        let deadline = self.shared.tuning.auth_deadline;
        let first = match timeout(deadline, stream.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => text,
            // Any non-text frame is "a message other than auth".
            Ok(Some(Ok(_))) => {
                self.send_error(codes::NOT_AUTHENTICATED, "auth required before any other message")
                    .await;
                return false;
            }
            Ok(Some(Err(_))) | Ok(None) => return false,
            Err(_) => {
                info!(peer = %self.peer, "auth deadline expired");
                self.send_error(codes::AUTH_TIMEOUT, "no auth message within deadline")
                    .await;
                return false;
            }
        };

        let envelope = match decode(&first) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.send_error(codes::PROTOCOL_ERROR, &e.to_string()).await;
                return false;
            }
        };

        let Payload::Auth { token, token_type } = envelope.payload else {
            self.send_error(codes::NOT_AUTHENTICATED, "auth required before any other message")
                .await;
            return false;
        };
        debug!(peer = %self.peer, token_type = ?token_type, "auth attempt");

        let now = self.shared.clock.now();
        if self.shared.tokens.verify(&token) {
            let connection_token = self.shared.tokens.issue_connection_token();
            self.send(Envelope::reply(
                envelope.id,
                Payload::AuthResponse {
                    success: true,
                    connection_token: Some(connection_token.token),
                    expires_at: Some(connection_token.expires_at),
                    error: None,
                },
                now,
            ))
            .await;
            info!(peer = %self.peer, "authenticated");
            true
        } else {
            self.send(Envelope::reply(
                envelope.id,
                Payload::AuthResponse {
                    success: false,
                    connection_token: None,
                    expires_at: None,
                    error: Some("invalid or expired token".to_string()),
                },
                now,
            ))
            .await;
            info!(peer = %self.peer, "auth rejected");
            false
        }
    }

    /// Handle one authenticated message. Returns false to close.
    async fn handle_text(&mut self, text: &str) -> bool {
        let envelope = match decode(text) {
            Ok(envelope) => envelope,
            Err(ProtocolError::UnknownType(type_name)) => {
                self.send_error(codes::UNKNOWN_MESSAGE, &format!("unknown type: {type_name}"))
                    .await;
                return true;
            }
            Err(e) => {
                self.send_error(codes::PROTOCOL_ERROR, &e.to_string()).await;
                return false;
            }
        };

        let request_id = envelope.id;
        let now = self.shared.clock.now();
        match envelope.payload {
            Payload::Ping => {
                self.send(Envelope::reply(request_id, Payload::Pong, now)).await;
            }
            Payload::Pong => {}

            Payload::Auth { token, .. } => {
                // Re-auth on a live connection rotates the credential.
                if self.shared.tokens.verify(&token) {
                    let connection_token = self.shared.tokens.issue_connection_token();
                    self.send(Envelope::reply(
                        request_id,
                        Payload::AuthResponse {
                            success: true,
                            connection_token: Some(connection_token.token),
                            expires_at: Some(connection_token.expires_at),
                            error: None,
                        },
                        now,
                    ))
                    .await;
                } else {
                    self.send(Envelope::reply(
                        request_id,
                        Payload::AuthResponse {
                            success: false,
                            connection_token: None,
                            expires_at: None,
                            error: Some("invalid or expired token".to_string()),
                        },
                        now,
                    ))
                    .await;
                    return false;
                }
            }

            Payload::TokenRefresh => {
                let connection_token = self.shared.tokens.issue_connection_token();
                self.send(Envelope::reply(
                    request_id,
                    Payload::TokenRefreshResponse {
                        success: true,
                        connection_token: Some(connection_token.token),
                        expires_at: Some(connection_token.expires_at),
                        error: None,
                    },
                    now,
                ))
                .await;
            }

            Payload::Subscribe => {
                if self.subscription.is_none() {
                    let events = Arc::new(self.shared.engine.subscribe());
                    let forward_events = Arc::clone(&events);
                    let out_tx = self.out_tx.clone();
                    let clock = self.shared.clock.clone();
                    let forward_task = tokio::spawn(async move {
                        loop {
                            let Some(event) = forward_events.recv().await else {
                                break;
                            };
                            let envelope =
                                Envelope::new(Payload::EngineEvent { event }, clock.now());
                            if out_tx.send(envelope).await.is_err() {
                                break;
                            }
                        }
                    });
                    self.subscription = Some(SubscriptionHandle {
                        events,
                        forward_task,
                    });
                    debug!(peer = %self.peer, "subscribed to engine events");
                }
            }

            Payload::Unsubscribe => {
                if let Some(sub) = self.subscription.take() {
                    sub.events.close();
                    let _ = sub.forward_task.await;
                    debug!(peer = %self.peer, "unsubscribed");
                }
            }

            Payload::GetState => {
                let state = self.shared.engine.state();
                self.send(Envelope::reply(request_id, Payload::StateResponse { state }, now))
                    .await;
            }

            Payload::GetTasks => match self.shared.engine.tasks().await {
                Ok(tasks) => {
                    self.send(Envelope::reply(request_id, Payload::TasksResponse { tasks }, now))
                        .await;
                }
                Err(e) => {
                    self.send(Envelope::reply(
                        request_id,
                        Payload::Error {
                            code: codes::TRACKER_ERROR.to_string(),
                            message: e.to_string(),
                        },
                        now,
                    ))
                    .await;
                }
            },

            Payload::GetPromptPreview => match self.shared.engine.prompt_preview().await {
                Ok(prompt) => {
                    self.send(Envelope::reply(
                        request_id,
                        Payload::PromptPreviewResponse { prompt },
                        now,
                    ))
                    .await;
                }
                Err(e) => {
                    self.send(Envelope::reply(
                        request_id,
                        Payload::Error {
                            code: codes::TRACKER_ERROR.to_string(),
                            message: e.to_string(),
                        },
                        now,
                    ))
                    .await;
                }
            },

            Payload::GetIterationOutput { iteration } => {
                let output = self.shared.engine.iteration_output(iteration);
                let (output, stderr) = match output {
                    Some(o) => (Some(o.output), Some(o.stderr)),
                    None => (None, None),
                };
                self.send(Envelope::reply(
                    request_id,
                    Payload::IterationOutputResponse {
                        iteration,
                        output,
                        stderr,
                    },
                    now,
                ))
                .await;
            }

            Payload::Pause => self.enqueue_command(request_id, ralph_core::Command::Pause).await,
            Payload::Resume => self.enqueue_command(request_id, ralph_core::Command::Resume).await,
            Payload::Interrupt => {
                self.enqueue_command(request_id, ralph_core::Command::Interrupt).await
            }
            Payload::RefreshTasks => {
                self.enqueue_command(request_id, ralph_core::Command::RefreshTasks).await
            }
            Payload::AddIterations { count } => {
                self.enqueue_command(request_id, ralph_core::Command::AddIterations { count })
                    .await
            }
            Payload::RemoveIterations { count } => {
                self.enqueue_command(request_id, ralph_core::Command::RemoveIterations { count })
                    .await
            }
            Payload::Continue => {
                self.enqueue_command(request_id, ralph_core::Command::Continue).await
            }

            Payload::CheckConfig => {
                let payload = check_config(&self.shared.paths);
                self.send(Envelope::reply(request_id, payload, now)).await;
            }

            Payload::PushConfig {
                scope,
                config_content,
                overwrite,
            } => {
                let payload =
                    push_config(&self.shared.paths, scope, &config_content, overwrite, now);
                self.send(Envelope::reply(request_id, payload, now)).await;
            }

            // Server-to-client payloads arriving here are a peer bug.
            other => {
                self.send(Envelope::reply(
                    request_id,
                    Payload::Error {
                        code: codes::UNEXPECTED_MESSAGE.to_string(),
                        message: format!("unexpected message type: {}", other.type_name()),
                    },
                    now,
                ))
                .await;
            }
        }
        true
    }

    async fn enqueue_command(&self, request_id: Uuid, command: ralph_core::Command) {
        let job = CommandJob {
            operation: command.name(),
            command,
            request_id,
            out_tx: self.out_tx.clone(),
        };
        if self.shared.cmd_tx.send(job).await.is_err() {
            self.send_error(codes::PROTOCOL_ERROR, "command dispatcher unavailable")
                .await;
        }
    }

    fn server_status(&self) -> Payload {
        Payload::ServerStatus {
            uptime_secs: self.shared.started.elapsed().as_secs(),
            engine_status: self.shared.engine.state().status,
            clients: self.shared.clients.load(Ordering::Relaxed),
        }
    }

    async fn send(&self, envelope: Envelope) {
        let _ = self.out_tx.send(envelope).await;
    }

    async fn send_error(&self, code: &str, message: &str) {
        let envelope = Envelope::new(
            Payload::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
            self.shared.clock.now(),
        );
        let _ = self.out_tx.send(envelope).await;
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
