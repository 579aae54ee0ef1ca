// SPDX-License-Identifier: MIT

//! Fake agent adapter for deterministic testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{AgentAdapter, AgentError, AgentEvent, AgentHandle, AgentInvocation};
use async_trait::async_trait;
use parking_lot::Mutex;
use ralph_core::AgentId;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Recorded call to [`FakeAgentAdapter`].
#[derive(Debug, Clone)]
pub enum AgentCall {
    Execute {
        agent_id: AgentId,
        prompt: String,
        model: Option<String>,
    },
    Interrupt {
        agent_id: AgentId,
    },
}

/// Scripted behavior for one agent invocation.
#[derive(Debug, Clone)]
pub struct FakeRun {
    /// Events delivered before `End`.
    pub events: Vec<AgentEvent>,
    /// Exit code reported by `End` when the run is not interrupted.
    pub exit_code: Option<i32>,
    /// Simulated runtime between the last event and `End`. Runs with a
    /// hold window can be interrupted mid-flight.
    pub hold: Option<Duration>,
}

impl FakeRun {
    /// A run that prints one line and exits 0.
    pub fn success() -> Self {
        Self {
            events: vec![AgentEvent::Stdout {
                data: "done\n".to_string(),
            }],
            exit_code: Some(0),
            hold: None,
        }
    }

    /// A run that prints to stderr and exits non-zero.
    pub fn failure(exit_code: i32) -> Self {
        Self {
            events: vec![AgentEvent::Stderr {
                data: "agent error\n".to_string(),
            }],
            exit_code: Some(exit_code),
            hold: None,
        }
    }

    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = Some(hold);
        self
    }

    pub fn with_events(mut self, events: Vec<AgentEvent>) -> Self {
        self.events = events;
        self
    }
}

/// Fake agent adapter.
///
/// Pops scripted runs in order; when the script is empty every
/// invocation uses the default run. Records all calls.
#[derive(Clone)]
pub struct FakeAgentAdapter {
    inner: Arc<Mutex<FakeAgentState>>,
}

struct FakeAgentState {
    script: VecDeque<FakeRun>,
    default_run: FakeRun,
    calls: Vec<AgentCall>,
    execute_error: Option<AgentError>,
    inflight: HashMap<AgentId, Arc<Notify>>,
}

impl Default for FakeAgentAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAgentAdapter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeAgentState {
                script: VecDeque::new(),
                default_run: FakeRun::success(),
                calls: Vec::new(),
                execute_error: None,
                inflight: HashMap::new(),
            })),
        }
    }

    /// Queue a scripted run for the next invocation.
    pub fn push_run(&self, run: FakeRun) {
        self.inner.lock().script.push_back(run);
    }

    /// Behavior used once the script is exhausted.
    pub fn set_default_run(&self, run: FakeRun) {
        self.inner.lock().default_run = run;
    }

    /// Fail the next `execute` call.
    pub fn set_execute_error(&self, error: AgentError) {
        self.inner.lock().execute_error = Some(error);
    }

    /// All recorded calls.
    pub fn calls(&self) -> Vec<AgentCall> {
        self.inner.lock().calls.clone()
    }

    /// Prompts passed to `execute`, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                AgentCall::Execute { prompt, .. } => Some(prompt.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether an invocation is currently in its hold window.
    pub fn has_inflight(&self) -> bool {
        !self.inner.lock().inflight.is_empty()
    }
}

#[async_trait]
impl AgentAdapter for FakeAgentAdapter {
    fn plugin_name(&self) -> &str {
        "fake"
    }

    async fn execute(
        &self,
        invocation: AgentInvocation,
        event_tx: mpsc::Sender<AgentEvent>,
    ) -> Result<AgentHandle, AgentError> {
        let (run, cancel) = {
            let mut inner = self.inner.lock();
            inner.calls.push(AgentCall::Execute {
                agent_id: invocation.agent_id.clone(),
                prompt: invocation.prompt.clone(),
                model: invocation.model.clone(),
            });
            if let Some(error) = inner.execute_error.take() {
                return Err(error);
            }
            let run = inner
                .script
                .pop_front()
                .unwrap_or_else(|| inner.default_run.clone());
            let cancel = Arc::new(Notify::new());
            inner
                .inflight
                .insert(invocation.agent_id.clone(), Arc::clone(&cancel));
            (run, cancel)
        };

        let inner = Arc::clone(&self.inner);
        let agent_id = invocation.agent_id.clone();
        tokio::spawn(async move {
            let mut interrupted = false;
            for event in run.events {
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
            if let Some(hold) = run.hold {
                tokio::select! {
                    _ = tokio::time::sleep(hold) => {}
                    _ = cancel.notified() => {
                        interrupted = true;
                    }
                }
            }
            inner.lock().inflight.remove(&agent_id);
            let exit_code = if interrupted { None } else { run.exit_code };
            let _ = event_tx.send(AgentEvent::End { exit_code }).await;
        });

        Ok(AgentHandle {
            agent_id: invocation.agent_id,
        })
    }

    async fn interrupt(&self, agent_id: &AgentId) -> Result<(), AgentError> {
        let mut inner = self.inner.lock();
        inner.calls.push(AgentCall::Interrupt {
            agent_id: agent_id.clone(),
        });
        match inner.inflight.get(agent_id) {
            Some(cancel) => {
                cancel.notify_one();
                Ok(())
            }
            None => Err(AgentError::NotFound(agent_id.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
