//! In-memory automation backend with scripted snapshots and outcomes.
//!
//! Used by tests and demos. Every capture mints a new [`Snapshot`] (new id)
//! from the current page template, executed commands are recorded, and the
//! open/close timeline of sessions is observable.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use super::{AutomationBackend, AutomationSession, BackendError, BackendResult, ExecutionOutcome, SessionOptions};
use crate::resolver::ResolvedCommand;
use crate::snapshot::{Snapshot, SnapshotElement};

/// Scripted result for the next executed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedOutcome {
    Success,
    /// Unsuccessful outcome carrying this error text
    Failure(String),
    /// Transport loss: the session is gone
    Disconnect(String),
}

/// A session lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Opened { session: String, at: Instant },
    Closed { session: String, at: Instant },
}

#[derive(Debug, Clone)]
struct PageTemplate {
    url: Option<String>,
    title: Option<String>,
    elements: Vec<SnapshotElement>,
}

impl PageTemplate {
    fn mint(&self) -> Snapshot {
        Snapshot::new(self.elements.clone()).with_page(self.url.clone(), self.title.clone())
    }
}

#[derive(Default)]
struct ScriptState {
    /// Pages shown after each executed command, in order; the last one sticks
    pages: VecDeque<PageTemplate>,
    current: Option<PageTemplate>,
    outcomes: VecDeque<ScriptedOutcome>,
    executed: Vec<ResolvedCommand>,
    captured: Vec<u64>,
    events: Vec<SessionEvent>,
    open_failures: usize,
}

/// Deterministic in-memory backend
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<ScriptState>>,
    open_now: Arc<AtomicUsize>,
    max_open: Arc<AtomicUsize>,
    sessions_opened: Arc<AtomicUsize>,
    close_delay: Duration,
    execute_delay: Duration,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page shown from the start
    pub fn with_page(self, elements: Vec<SnapshotElement>) -> Self {
        self.with_titled_page(None, None, elements)
    }

    pub fn with_titled_page(
        self,
        url: Option<&str>,
        title: Option<&str>,
        elements: Vec<SnapshotElement>,
    ) -> Self {
        let page = PageTemplate {
            url: url.map(str::to_string),
            title: title.map(str::to_string),
            elements,
        };
        if let Ok(mut state) = self.state.try_lock() {
            if state.current.is_none() {
                state.current = Some(page);
            } else {
                state.pages.push_back(page);
            }
        }
        self
    }

    /// Queue outcomes for the next executed commands; unscripted commands succeed
    pub fn with_outcomes(self, outcomes: impl IntoIterator<Item = ScriptedOutcome>) -> Self {
        if let Ok(mut state) = self.state.try_lock() {
            state.outcomes.extend(outcomes);
        }
        self
    }

    /// Make the next `count` session opens fail
    pub fn failing_opens(self, count: usize) -> Self {
        if let Ok(mut state) = self.state.try_lock() {
            state.open_failures = count;
        }
        self
    }

    /// Time a session takes to close
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    /// Time each command takes to execute
    pub fn with_execute_delay(mut self, delay: Duration) -> Self {
        self.execute_delay = delay;
        self
    }

    /// Commands executed so far, across sessions
    pub async fn executed(&self) -> Vec<ResolvedCommand> {
        self.state.lock().await.executed.clone()
    }

    /// Ids of every snapshot handed out
    pub async fn captured_snapshot_ids(&self) -> Vec<u64> {
        self.state.lock().await.captured.clone()
    }

    pub async fn events(&self) -> Vec<SessionEvent> {
        self.state.lock().await.events.clone()
    }

    /// Highest number of sessions ever open at once
    pub fn max_concurrent_sessions(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AutomationBackend for ScriptedBackend {
    async fn open_session(&self, options: &SessionOptions) -> BackendResult<Box<dyn AutomationSession>> {
        let mut state = self.state.lock().await;
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(BackendError::Open("scripted open failure".to_string()));
        }

        let number = self.sessions_opened.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("scripted-{}", number);
        let open = self.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(open, Ordering::SeqCst);
        state.events.push(SessionEvent::Opened {
            session: id.clone(),
            at: Instant::now(),
        });
        debug!(session = %id, run = %options.run_id, "scripted session opened");

        Ok(Box::new(ScriptedSession {
            id,
            backend: self.clone(),
            connected: true,
            closed: false,
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedSession {
    id: String,
    backend: ScriptedBackend,
    connected: bool,
    closed: bool,
}

#[async_trait]
impl AutomationSession for ScriptedSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn capture_snapshot(&mut self) -> BackendResult<Snapshot> {
        if !self.connected {
            return Err(BackendError::Disconnected(format!("{} is gone", self.id)));
        }
        let mut state = self.backend.state.lock().await;
        let snapshot = state.current.as_ref().map(PageTemplate::mint).unwrap_or_else(|| Snapshot::new(Vec::new()));
        state.captured.push(snapshot.id);
        Ok(snapshot)
    }

    async fn execute(&mut self, command: &ResolvedCommand, _timeout: Duration) -> BackendResult<ExecutionOutcome> {
        if !self.connected {
            return Err(BackendError::Disconnected(format!("{} is gone", self.id)));
        }
        if !self.backend.execute_delay.is_zero() {
            tokio::time::sleep(self.backend.execute_delay).await;
        }

        let mut state = self.backend.state.lock().await;
        state.executed.push(command.clone());
        match state.outcomes.pop_front().unwrap_or(ScriptedOutcome::Success) {
            ScriptedOutcome::Success => {
                if let Some(next) = state.pages.pop_front() {
                    state.current = Some(next);
                }
                Ok(ExecutionOutcome::ok(command.trace_phrase()))
            }
            ScriptedOutcome::Failure(error) => Ok(ExecutionOutcome::failed(error)),
            ScriptedOutcome::Disconnect(reason) => {
                self.connected = false;
                Err(BackendError::Disconnected(reason))
            }
        }
    }

    async fn close(&mut self) -> BackendResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.backend.close_delay.is_zero() {
            tokio::time::sleep(self.backend.close_delay).await;
        }
        self.backend.open_now.fetch_sub(1, Ordering::SeqCst);
        self.backend.state.lock().await.events.push(SessionEvent::Closed {
            session: self.id.clone(),
            at: Instant::now(),
        });
        debug!(session = %self.id, "scripted session closed");
        Ok(())
    }
}
