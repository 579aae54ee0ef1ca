// SPDX-License-Identifier: MIT

//! The iteration loop.
//!
//! The loop task is the single consumer of the command inbox and the
//! only writer of `EngineState`. Control commands are handled at safe
//! points: between iterations, during the inter-iteration delay, and
//! while waiting on agent events via `select!`. Pause takes effect
//! between iterations only; stop and interrupt signal the in-flight
//! agent and then drain its events until the end.

use crate::bus::EventBus;
use crate::config::EngineConfig;
use crate::engine::{CommandRequest, IterationOutput};
use crate::error::EngineError;
use crate::persist::SessionPersistence;
use crate::prompt::render_prompt;
use crate::select::select_next_task;
use parking_lot::RwLock;
use ralph_adapters::{AgentAdapter, AgentEvent, AgentInvocation, TrackerAdapter};
use ralph_core::{
    AgentId, Clock, Command, EngineEvent, EngineState, EngineStatus, ErrorStrategy, IdGen,
    IterationResult, IterationStatus, OutputStream, StopReason, Task, TaskStatus,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, info, warn};

/// Capacity of the agent event channel feeding the loop.
const AGENT_EVENT_BUFFER: usize = 64;

enum CommandOutcome {
    Handled,
    StopRequested,
    Resumed,
    AgentInterrupted,
}

enum IterationDirective {
    Continue,
    Stop,
    Abort,
}

pub(crate) struct Runner<A, T, C: Clock, G> {
    pub agents: A,
    pub tracker: T,
    pub clock: C,
    pub idgen: G,
    pub config: EngineConfig,
    pub state: Arc<RwLock<EngineState>>,
    pub bus: EventBus,
    pub cmd_rx: mpsc::Receiver<CommandRequest>,
    pub outputs: Arc<RwLock<HashMap<u32, IterationOutput>>>,
    pub skipped: Arc<RwLock<HashSet<String>>>,
    pub persistence: Option<SessionPersistence<C>>,
    pub failure_counts: HashMap<String, u32>,
    pub has_run: bool,
}

impl<A, T, C, G> Runner<A, T, C, G>
where
    A: AgentAdapter,
    T: TrackerAdapter,
    C: Clock,
    G: IdGen,
{
    /// Top-level task: waits for `Start`/`Continue` while idle and
    /// drives the loop while running. Exits when the inbox closes.
    pub(crate) async fn run(mut self) {
        while let Some(CommandRequest { command, reply }) = self.cmd_rx.recv().await {
            match command {
                Command::Start => {
                    let _ = reply.send(Ok(()));
                    self.run_loop().await;
                }
                Command::Continue => {
                    if self.has_run {
                        let _ = reply.send(Ok(()));
                        self.run_loop().await;
                    } else {
                        let _ = reply.send(Err(EngineError::NotTerminated));
                    }
                }
                Command::AddIterations { count } => {
                    let _ = reply.send(self.add_iterations(count));
                }
                Command::RemoveIterations { count } => {
                    let _ = reply.send(self.remove_iterations(count));
                }
                Command::RefreshTasks => {
                    let result = self.refresh_tasks().await;
                    let _ = reply.send(result);
                }
                Command::Interrupt => {
                    let _ = reply.send(Err(EngineError::NoActiveAgent));
                }
                Command::Pause | Command::Resume | Command::Stop => {
                    let _ = reply.send(Err(EngineError::InvalidState {
                        operation: command.name(),
                        status: EngineStatus::Idle,
                    }));
                }
            }
        }
    }

    async fn run_loop(&mut self) {
        {
            let mut state = self.state.write();
            state.status = EngineStatus::Running;
            if state.started_at.is_none() {
                state.started_at = Some(self.clock.now());
            }
        }
        self.has_run = true;
        let max_iterations = self.state.read().max_iterations;
        self.bus.emit(&EngineEvent::EngineStarted { max_iterations });
        if let Some(p) = self.persistence.as_mut() {
            p.running();
        }

        let reason = self.drive().await;

        // Persistence completes before the engine reports idle.
        if let Some(p) = self.persistence.as_mut() {
            match reason {
                StopReason::NoTasks => p.completed(),
                StopReason::Error => p.failed(),
                StopReason::Stopped | StopReason::MaxIterations => p.interrupted(),
            }
        }
        {
            let mut state = self.state.write();
            state.status = EngineStatus::Idle;
            state.current_task = None;
            state.active_agent = None;
        }
        self.bus.emit(&EngineEvent::EngineStopped { reason });
        info!(reason = ?reason, "engine loop terminated");
    }

    async fn drive(&mut self) -> StopReason {
        let mut pending_pause = false;
        loop {
            // Safe point: drain queued control messages.
            loop {
                match self.cmd_rx.try_recv() {
                    Ok(req) => {
                        if let CommandOutcome::StopRequested =
                            self.handle_command(req, false, None, &mut pending_pause).await
                        {
                            return StopReason::Stopped;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return StopReason::Stopped,
                }
            }

            if pending_pause {
                pending_pause = false;
                if !self.pause_until_resumed().await {
                    return StopReason::Stopped;
                }
            }

            let (max, current) = {
                let state = self.state.read();
                (state.max_iterations, state.current_iteration)
            };
            if max != 0 && current >= max {
                return StopReason::MaxIterations;
            }

            let tasks = match self.tracker.list_tasks().await {
                Ok(tasks) => tasks,
                Err(e) => {
                    error!(error = %e, "task listing failed");
                    return StopReason::Error;
                }
            };
            self.state.write().total_tasks = tasks.len() as u32;

            let skipped = self.skipped.read().clone();
            let Some(task) = select_next_task(&tasks, &skipped).cloned() else {
                return StopReason::NoTasks;
            };

            match self.run_iteration(task, &mut pending_pause).await {
                IterationDirective::Continue => {}
                IterationDirective::Stop => return StopReason::Stopped,
                IterationDirective::Abort => return StopReason::Error,
            }

            if !pending_pause && !self.inter_iteration_delay(&mut pending_pause).await {
                return StopReason::Stopped;
            }
        }
    }

    /// One pass of select task, invoke agent, record result, persist.
    async fn run_iteration(
        &mut self,
        task: Task,
        pending_pause: &mut bool,
    ) -> IterationDirective {
        let iteration = {
            let mut state = self.state.write();
            state.current_iteration += 1;
            state.current_task = Some(task.clone());
            state.current_output.clear();
            state.current_stderr.clear();
            state.current_iteration
        };
        self.bus.emit(&EngineEvent::TaskSelected { task: task.clone() });
        self.bus.emit(&EngineEvent::IterationStarted {
            iteration,
            task: task.clone(),
        });
        info!(iteration, task_id = %task.id, "iteration started");

        if let Err(e) = self
            .tracker
            .update_status(&task.id, TaskStatus::InProgress)
            .await
        {
            warn!(task_id = %task.id, error = %e, "failed to mark task in progress");
        }

        let agent_id = AgentId::new(self.idgen.next());
        self.state.write().active_agent = Some(agent_id.clone());

        let prompt = render_prompt(&self.config.prompt_template, &task);
        let invocation = AgentInvocation {
            agent_id: agent_id.clone(),
            prompt,
            cwd: self.config.cwd.clone(),
            model: self.config.model.clone(),
        };

        let started_at = self.clock.now();
        let start = Instant::now();
        let (event_tx, mut event_rx) = mpsc::channel(AGENT_EVENT_BUFFER);

        let mut interrupted = false;
        let mut stopping = false;
        let mut inbox_closed = false;
        let mut exit_code: Option<i32> = None;
        let mut ended_by_agent = false;

        let spawn_error = match self.agents.execute(invocation, event_tx).await {
            Ok(_handle) => None,
            Err(e) => Some(e.to_string()),
        };

        if spawn_error.is_none() {
            loop {
                tokio::select! {
                    maybe_event = event_rx.recv() => match maybe_event {
                        Some(AgentEvent::Stdout { data }) => {
                            self.state.write().current_output.push_str(&data);
                            self.bus.emit(&EngineEvent::AgentOutput {
                                stream: OutputStream::Stdout,
                                data,
                            });
                        }
                        Some(AgentEvent::Stderr { data }) => {
                            self.state.write().current_stderr.push_str(&data);
                            self.bus.emit(&EngineEvent::AgentOutput {
                                stream: OutputStream::Stderr,
                                data,
                            });
                        }
                        Some(AgentEvent::Jsonl { message }) => {
                            debug!(agent_id = %agent_id, message = %message, "agent jsonl message");
                        }
                        Some(AgentEvent::End { exit_code: code }) => {
                            exit_code = code;
                            ended_by_agent = true;
                            break;
                        }
                        None => break,
                    },
                    maybe_req = self.cmd_rx.recv(), if !inbox_closed => match maybe_req {
                        Some(req) => match self
                            .handle_command(req, false, Some(&agent_id), pending_pause)
                            .await
                        {
                            CommandOutcome::StopRequested => {
                                stopping = true;
                                interrupted = true;
                            }
                            CommandOutcome::AgentInterrupted => {
                                interrupted = true;
                            }
                            _ => {}
                        },
                        None => {
                            // Inbox gone: treat as stop and drain the agent.
                            inbox_closed = true;
                            stopping = true;
                            interrupted = true;
                            if let Err(e) = self.agents.interrupt(&agent_id).await {
                                warn!(agent_id = %agent_id, error = %e, "interrupt on shutdown failed");
                            }
                        }
                    }
                }
            }
        }

        self.state.write().active_agent = None;
        let ended_at = self.clock.now();
        let duration_ms = start.elapsed().as_millis() as u64;

        let (status, iter_error, task_completed) = if let Some(err) = spawn_error {
            (IterationStatus::Failed, Some(err), false)
        } else if interrupted {
            (IterationStatus::Interrupted, None, false)
        } else {
            match exit_code {
                Some(0) => {
                    let complete = match self.tracker.is_complete(&task.id).await {
                        Ok(complete) => complete,
                        Err(e) => {
                            warn!(task_id = %task.id, error = %e, "completion query failed");
                            false
                        }
                    };
                    (IterationStatus::Completed, None, complete)
                }
                Some(code) => (
                    IterationStatus::Failed,
                    Some(format!("agent exited with code {code}")),
                    false,
                ),
                None if ended_by_agent => (
                    IterationStatus::Failed,
                    Some("agent terminated by signal".to_string()),
                    false,
                ),
                None => (
                    IterationStatus::Failed,
                    Some("agent event stream closed unexpectedly".to_string()),
                    false,
                ),
            }
        };

        if task_completed {
            self.set_task_status(&task, TaskStatus::Completed).await;
            self.state.write().tasks_completed += 1;
            self.failure_counts.remove(&task.id);
            self.bus.emit(&EngineEvent::TaskCompleted { task: task.clone() });
        } else {
            match status {
                // Success without completion and interrupts leave the
                // task selectable again.
                IterationStatus::Completed | IterationStatus::Interrupted => {
                    self.failure_counts.remove(&task.id);
                    self.set_task_status(&task, TaskStatus::Pending).await;
                }
                IterationStatus::Failed => {}
                IterationStatus::Skipped => {}
            }
        }

        let mut abort = false;
        if status == IterationStatus::Failed {
            match self.config.error_policy.strategy {
                ErrorStrategy::Abort => {
                    abort = true;
                    self.set_task_status(&task, TaskStatus::Failed).await;
                }
                ErrorStrategy::Retry => {
                    let count = self.failure_counts.entry(task.id.clone()).or_insert(0);
                    *count += 1;
                    if *count >= self.config.error_policy.max_retries {
                        self.skip_task(&task).await;
                    } else {
                        self.set_task_status(&task, TaskStatus::Pending).await;
                    }
                }
                ErrorStrategy::Skip => {
                    self.skip_task(&task).await;
                }
                ErrorStrategy::Continue => {
                    self.set_task_status(&task, TaskStatus::Pending).await;
                }
            }
        }

        let result = IterationResult {
            iteration,
            status,
            task: task.clone(),
            task_completed,
            duration_ms,
            error: iter_error,
            started_at,
            ended_at,
        };

        let (output, stderr, tasks_completed) = {
            let mut state = self.state.write();
            state.iterations.push(result.clone());
            (
                state.current_output.clone(),
                state.current_stderr.clone(),
                state.tasks_completed,
            )
        };
        self.outputs
            .write()
            .insert(iteration, IterationOutput { output, stderr });

        if let Some(p) = self.persistence.as_mut() {
            let tasks = match self.tracker.list_tasks().await {
                Ok(tasks) => Some(tasks),
                Err(e) => {
                    warn!(error = %e, "task listing for persistence failed");
                    None
                }
            };
            p.after_iteration(&result, tasks_completed, tasks.as_deref());
        }

        if status == IterationStatus::Failed {
            self.bus.emit(&EngineEvent::IterationFailed { result });
        } else {
            self.bus.emit(&EngineEvent::IterationCompleted { result });
        }
        info!(iteration, status = %status, "iteration finished");

        if stopping || inbox_closed {
            IterationDirective::Stop
        } else if abort {
            IterationDirective::Abort
        } else {
            IterationDirective::Continue
        }
    }

    /// Enter the paused state and block until resume or stop.
    ///
    /// Returns false when the loop must terminate.
    async fn pause_until_resumed(&mut self) -> bool {
        self.state.write().status = EngineStatus::Paused;
        self.bus.emit(&EngineEvent::EnginePaused);
        if let Some(p) = self.persistence.as_mut() {
            p.paused();
        }
        info!("engine paused");

        let mut ignored_pending = false;
        loop {
            match self.cmd_rx.recv().await {
                Some(req) => match self
                    .handle_command(req, true, None, &mut ignored_pending)
                    .await
                {
                    CommandOutcome::Resumed => {
                        self.state.write().status = EngineStatus::Running;
                        self.bus.emit(&EngineEvent::EngineResumed);
                        if let Some(p) = self.persistence.as_mut() {
                            p.running();
                        }
                        info!("engine resumed");
                        return true;
                    }
                    CommandOutcome::StopRequested => return false,
                    _ => {}
                },
                None => return false,
            }
        }
    }

    /// Sleep between iterations, still serving the inbox.
    ///
    /// Returns false when the loop must terminate.
    async fn inter_iteration_delay(&mut self, pending_pause: &mut bool) -> bool {
        let delay = self.config.iteration_delay;
        if delay.is_zero() {
            return true;
        }
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                maybe_req = self.cmd_rx.recv() => match maybe_req {
                    Some(req) => {
                        if let CommandOutcome::StopRequested =
                            self.handle_command(req, false, None, pending_pause).await
                        {
                            return false;
                        }
                        if *pending_pause {
                            // Pause cancels the remaining delay.
                            return true;
                        }
                    }
                    None => return false,
                }
            }
        }
    }

    /// Process one control command against the current loop phase.
    async fn handle_command(
        &mut self,
        req: CommandRequest,
        paused: bool,
        inflight: Option<&AgentId>,
        pending_pause: &mut bool,
    ) -> CommandOutcome {
        let CommandRequest { command, reply } = req;
        let status = self.state.read().status;

        // Transition requests are rejected outright while stopping.
        if status == EngineStatus::Stopping
            && matches!(
                command,
                Command::Start
                    | Command::Continue
                    | Command::Pause
                    | Command::Resume
                    | Command::Stop
                    | Command::Interrupt
            )
        {
            let _ = reply.send(Err(EngineError::InvalidState {
                operation: command.name(),
                status,
            }));
            return CommandOutcome::Handled;
        }

        match command {
            Command::Start => {
                let _ = reply.send(Err(EngineError::AlreadyRunning));
                CommandOutcome::Handled
            }
            Command::Continue => {
                let _ = reply.send(Err(EngineError::NotTerminated));
                CommandOutcome::Handled
            }
            Command::Pause => {
                if paused {
                    let _ = reply.send(Err(EngineError::InvalidState {
                        operation: "pause",
                        status,
                    }));
                } else {
                    *pending_pause = true;
                    let _ = reply.send(Ok(()));
                }
                CommandOutcome::Handled
            }
            Command::Resume => {
                if paused {
                    let _ = reply.send(Ok(()));
                    CommandOutcome::Resumed
                } else {
                    let _ = reply.send(Err(EngineError::InvalidState {
                        operation: "resume",
                        status,
                    }));
                    CommandOutcome::Handled
                }
            }
            Command::Stop => {
                self.state.write().status = EngineStatus::Stopping;
                if let Some(agent_id) = inflight {
                    if let Err(e) = self.agents.interrupt(agent_id).await {
                        warn!(agent_id = %agent_id, error = %e, "stop: agent signal failed");
                    }
                }
                let _ = reply.send(Ok(()));
                CommandOutcome::StopRequested
            }
            Command::Interrupt => match inflight {
                Some(agent_id) => match self.agents.interrupt(agent_id).await {
                    Ok(()) => {
                        let _ = reply.send(Ok(()));
                        CommandOutcome::AgentInterrupted
                    }
                    Err(e) => {
                        warn!(agent_id = %agent_id, error = %e, "interrupt signal failed");
                        let _ = reply.send(Err(EngineError::NoActiveAgent));
                        CommandOutcome::Handled
                    }
                },
                None => {
                    let _ = reply.send(Err(EngineError::NoActiveAgent));
                    CommandOutcome::Handled
                }
            },
            Command::AddIterations { count } => {
                let _ = reply.send(self.add_iterations(count));
                CommandOutcome::Handled
            }
            Command::RemoveIterations { count } => {
                let _ = reply.send(self.remove_iterations(count));
                CommandOutcome::Handled
            }
            Command::RefreshTasks => {
                let result = self.refresh_tasks().await;
                let _ = reply.send(result);
                CommandOutcome::Handled
            }
        }
    }

    fn add_iterations(&mut self, count: u32) -> Result<(), EngineError> {
        if count == 0 {
            return Err(EngineError::BadArg("count must be positive".to_string()));
        }
        let mut state = self.state.write();
        state.max_iterations = state.max_iterations.saturating_add(count);
        Ok(())
    }

    fn remove_iterations(&mut self, count: u32) -> Result<(), EngineError> {
        if count == 0 {
            return Err(EngineError::BadArg("count must be positive".to_string()));
        }
        let mut state = self.state.write();
        // The floor is one more than the current iteration; dropping to
        // zero would flip the budget back to unlimited.
        let floor = state.current_iteration.max(1);
        if count > state.max_iterations || state.max_iterations - count < floor {
            return Err(EngineError::WouldEndLoop { count });
        }
        state.max_iterations -= count;
        Ok(())
    }

    async fn refresh_tasks(&mut self) -> Result<(), EngineError> {
        let tasks = self
            .tracker
            .list_tasks()
            .await
            .map_err(|e| EngineError::Tracker(e.to_string()))?;
        self.state.write().total_tasks = tasks.len() as u32;
        Ok(())
    }

    async fn set_task_status(&mut self, task: &Task, status: TaskStatus) {
        if let Err(e) = self.tracker.update_status(&task.id, status).await {
            warn!(task_id = %task.id, status = %status, error = %e, "task status update failed");
        }
    }

    async fn skip_task(&mut self, task: &Task) {
        self.skipped.write().insert(task.id.clone());
        self.set_task_status(task, TaskStatus::Failed).await;
        if let Some(p) = self.persistence.as_mut() {
            p.add_skipped_task(&task.id);
        }
        info!(task_id = %task.id, "task added to skip list");
    }
}
