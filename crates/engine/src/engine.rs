// SPDX-License-Identifier: MIT

//! Engine facade.
//!
//! Constructing an engine spawns its loop task immediately; the task
//! idles on the command inbox until `start()`. All control operations
//! post a command and await the loop's reply, so transitions are
//! serialized by construction.

use crate::bus::{EventBus, EventSubscription};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::persist::SessionPersistence;
use crate::prompt::render_prompt;
use crate::runner::Runner;
use crate::select::select_next_task;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use ralph_adapters::{AgentAdapter, TrackerAdapter};
use ralph_core::{Clock, Command, EngineState, IdGen, Task};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Capacity of the control inbox.
const COMMAND_BUFFER: usize = 32;

/// A control command paired with its reply channel.
pub struct CommandRequest {
    pub command: Command,
    pub reply: oneshot::Sender<Result<(), EngineError>>,
}

/// Captured stdout/stderr of one finished iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationOutput {
    pub output: String,
    pub stderr: String,
}

/// The surface a remote server (or any other driver) needs from an
/// engine.
#[async_trait]
pub trait EngineControl: Send + Sync + 'static {
    /// Post a control command and wait for the loop's verdict.
    async fn dispatch(&self, command: Command) -> Result<(), EngineError>;

    /// Immutable snapshot of the engine state.
    fn state(&self) -> EngineState;

    /// Subscribe to the engine event stream.
    fn subscribe(&self) -> EventSubscription;

    /// Current task list from the tracker.
    async fn tasks(&self) -> Result<Vec<Task>, EngineError>;

    /// The prompt the next iteration would send, if a task is pending.
    async fn prompt_preview(&self) -> Result<Option<String>, EngineError>;

    /// Captured output of a historic iteration.
    fn iteration_output(&self, iteration: u32) -> Option<IterationOutput>;
}

/// The execution engine.
pub struct Engine<T: TrackerAdapter> {
    state: Arc<RwLock<EngineState>>,
    bus: EventBus,
    cmd_tx: mpsc::Sender<CommandRequest>,
    outputs: Arc<RwLock<HashMap<u32, IterationOutput>>>,
    skipped: Arc<RwLock<HashSet<String>>>,
    tracker: T,
    config: EngineConfig,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: TrackerAdapter> Engine<T> {
    /// Build an engine and spawn its loop task.
    ///
    /// Must be called within a tokio runtime. Sessions resumed from
    /// disk seed `skipped_task_ids` through `persistence`.
    pub fn new<A, C, G>(
        agents: A,
        tracker: T,
        clock: C,
        idgen: G,
        config: EngineConfig,
        persistence: Option<SessionPersistence<C>>,
    ) -> Self
    where
        A: AgentAdapter,
        C: Clock,
        G: IdGen,
    {
        let state = Arc::new(RwLock::new(EngineState::new(config.max_iterations)));
        let bus = EventBus::new();
        let outputs: Arc<RwLock<HashMap<u32, IterationOutput>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let skipped: Arc<RwLock<HashSet<String>>> = Arc::new(RwLock::new(HashSet::new()));

        if let Some(p) = persistence.as_ref() {
            let session = p.session();
            let mut seeded = skipped.write();
            for id in &session.skipped_task_ids {
                seeded.insert(id.clone());
            }
            let mut state = state.write();
            state.current_iteration = session.current_iteration;
            state.tasks_completed = session.tasks_completed;
            state.max_iterations = session.max_iterations;
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let runner = Runner {
            agents,
            tracker: tracker.clone(),
            clock,
            idgen,
            config: config.clone(),
            state: Arc::clone(&state),
            bus: bus.clone(),
            cmd_rx,
            outputs: Arc::clone(&outputs),
            skipped: Arc::clone(&skipped),
            persistence,
            failure_counts: HashMap::new(),
            has_run: false,
        };
        let loop_task = tokio::spawn(runner.run());

        Self {
            state,
            bus,
            cmd_tx,
            outputs,
            skipped,
            tracker,
            config,
            loop_task: Mutex::new(Some(loop_task)),
        }
    }

    pub async fn start(&self) -> Result<(), EngineError> {
        self.send(Command::Start).await
    }

    pub async fn pause(&self) -> Result<(), EngineError> {
        self.send(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<(), EngineError> {
        self.send(Command::Resume).await
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        self.send(Command::Stop).await
    }

    pub async fn interrupt(&self) -> Result<(), EngineError> {
        self.send(Command::Interrupt).await
    }

    pub async fn add_iterations(&self, count: u32) -> Result<(), EngineError> {
        self.send(Command::AddIterations { count }).await
    }

    pub async fn remove_iterations(&self, count: u32) -> Result<(), EngineError> {
        self.send(Command::RemoveIterations { count }).await
    }

    /// Resume a terminated loop with its accumulated state.
    pub async fn continue_run(&self) -> Result<(), EngineError> {
        self.send(Command::Continue).await
    }

    pub async fn refresh_tasks(&self) -> Result<(), EngineError> {
        self.send(Command::RefreshTasks).await
    }

    /// Snapshot of the engine state.
    pub fn snapshot(&self) -> EngineState {
        self.state.read().clone()
    }

    /// Subscribe to engine events.
    pub fn events(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    async fn send(&self, command: Command) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(CommandRequest { command, reply })
            .await
            .map_err(|_| EngineError::Shutdown)?;
        rx.await.map_err(|_| EngineError::Shutdown)?
    }

    /// Stop the loop if needed and wait for the task to exit.
    pub async fn shutdown(self) {
        let _ = self.send(Command::Stop).await;
        let handle = self.loop_task.lock().take();
        drop(self.cmd_tx);
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[async_trait]
impl<T: TrackerAdapter> EngineControl for Engine<T> {
    async fn dispatch(&self, command: Command) -> Result<(), EngineError> {
        self.send(command).await
    }

    fn state(&self) -> EngineState {
        self.snapshot()
    }

    fn subscribe(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    async fn tasks(&self) -> Result<Vec<Task>, EngineError> {
        self.tracker
            .list_tasks()
            .await
            .map_err(|e| EngineError::Tracker(e.to_string()))
    }

    async fn prompt_preview(&self) -> Result<Option<String>, EngineError> {
        let tasks = self.tasks().await?;
        let skipped = self.skipped.read().clone();
        Ok(select_next_task(&tasks, &skipped)
            .map(|task| render_prompt(&self.config.prompt_template, task)))
    }

    fn iteration_output(&self, iteration: u32) -> Option<IterationOutput> {
        self.outputs.read().get(&iteration).cloned()
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
