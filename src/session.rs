//! Run session management.
//!
//! Provides automation sessions for runs with:
//! - A fixed number of host slots; a new session waits for a free slot
//! - Drain-then-create: a slot is only free once the previous session in it
//!   has fully closed
//! - Guaranteed release: a [`RunSession`] dropped without `close` still
//!   closes its session before giving the slot back

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::automation::{AutomationBackend, AutomationSession, BackendError, ExecutionOutcome, SessionOptions};
use crate::config;
use crate::error::{EngineError, EngineResult};
use crate::resolver::ResolvedCommand;
use crate::snapshot::Snapshot;

/// Extra time the engine allows past a backend's own execute timeout, so the
/// backend can clear its in-flight request before being cut off
const EXECUTE_GRACE: Duration = Duration::from_millis(250);

/// How long [`RunSession::execute`] waits for a backend given `timeout`
pub(crate) fn execute_deadline(timeout: Duration) -> Duration {
    timeout.saturating_add(EXECUTE_GRACE)
}

/// Hands out sessions from a shared automation backend
#[derive(Clone)]
pub struct SessionManager {
    backend: Arc<dyn AutomationBackend>,
    slots: Arc<Semaphore>,
    slot_count: usize,
    open: Arc<AtomicUsize>,
}

impl SessionManager {
    /// Manager with the configured number of slots
    pub fn new(backend: Arc<dyn AutomationBackend>) -> Self {
        Self::with_slots(backend, config::get().session.slots)
    }

    pub fn with_slots(backend: Arc<dyn AutomationBackend>, slots: usize) -> Self {
        let slot_count = slots.max(1);
        Self {
            backend,
            slots: Arc::new(Semaphore::new(slot_count)),
            slot_count,
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sessions opened and not yet fully closed
    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Open a session, first waiting for a slot whose previous session has closed
    pub async fn open(&self, options: SessionOptions) -> EngineResult<RunSession> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| EngineError::Backend(format!("session slots closed: {}", e)))?;
        debug!(run = %options.run_id, "session slot acquired");

        let session = self.backend.open_session(&options).await?;
        self.open.fetch_add(1, Ordering::SeqCst);
        info!(run = %options.run_id, session = session.id(), backend = self.backend.name(), "session opened");

        Ok(RunSession {
            session: Some(session),
            permit: Some(permit),
            backend: self.backend.clone(),
            open: self.open.clone(),
            options,
            reconnects: 0,
        })
    }

    /// Wait until every session handed out has closed
    pub async fn drain(&self) -> EngineResult<()> {
        let all = self
            .slots
            .acquire_many(self.slot_count as u32)
            .await
            .map_err(|e| EngineError::Backend(format!("session slots closed: {}", e)))?;
        drop(all);
        Ok(())
    }
}

/// A run's automation session, holding its host slot until closed
pub struct RunSession {
    session: Option<Box<dyn AutomationSession>>,
    permit: Option<OwnedSemaphorePermit>,
    backend: Arc<dyn AutomationBackend>,
    open: Arc<AtomicUsize>,
    options: SessionOptions,
    reconnects: u32,
}

impl RunSession {
    pub fn id(&self) -> Option<&str> {
        self.session.as_deref().map(|s| s.id())
    }

    /// Successful reconnects so far
    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    fn live(&mut self) -> EngineResult<&mut Box<dyn AutomationSession>> {
        self.session
            .as_mut()
            .ok_or_else(|| EngineError::SessionDisconnected("session is closed".to_string()))
    }

    /// Capture a fresh snapshot, bounded by `timeout`
    pub async fn capture_snapshot(&mut self, timeout: Duration) -> EngineResult<Snapshot> {
        let session = self.live()?;
        match tokio::time::timeout(timeout, session.capture_snapshot()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(EngineError::Backend(format!("snapshot timed out after {:?}", timeout))),
        }
    }

    /// Execute a command, racing the backend against `timeout`
    pub async fn execute(&mut self, command: &ResolvedCommand, timeout: Duration) -> EngineResult<ExecutionOutcome> {
        let session = self.live()?;
        match tokio::time::timeout(execute_deadline(timeout), session.execute(command, timeout)).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(BackendError::Timeout(after))) => Ok(ExecutionOutcome::failed(format!("timeout after {:?}", after))),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(ExecutionOutcome::failed(format!("timeout after {:?}", timeout))),
        }
    }

    /// Replace a lost session with a new one in the same slot
    pub async fn reconnect(&mut self) -> EngineResult<()> {
        if let Some(mut old) = self.session.take() {
            if let Err(e) = old.close().await {
                debug!(error = %e, "closing lost session failed");
            }
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
        match self.backend.open_session(&self.options).await {
            Ok(session) => {
                self.open.fetch_add(1, Ordering::SeqCst);
                self.reconnects += 1;
                info!(run = %self.options.run_id, session = session.id(), "session reconnected");
                self.session = Some(session);
                Ok(())
            }
            Err(e) => Err(EngineError::SessionDisconnected(format!("reconnect failed: {}", e))),
        }
    }

    /// Close the session and release the slot once the close has completed
    pub async fn close(mut self) -> EngineResult<()> {
        let result = match self.session.take() {
            Some(mut session) => {
                let result = session.close().await;
                self.open.fetch_sub(1, Ordering::SeqCst);
                info!(run = %self.options.run_id, session = session.id(), "session closed");
                result.map_err(EngineError::from)
            }
            None => Ok(()),
        };
        drop(self.permit.take());
        result
    }
}

impl Drop for RunSession {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let permit = self.permit.take();
        let open = self.open.clone();
        let run_id = self.options.run_id.clone();
        warn!(run = %run_id, "run session dropped without close; closing in background");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        warn!(run = %run_id, error = %e, "background session close failed");
                    }
                    open.fetch_sub(1, Ordering::SeqCst);
                    // the slot opens only after the close finished
                    drop(permit);
                });
            }
            Err(_) => {
                open.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{ScriptedBackend, ScriptedOutcome, SessionEvent};
    use crate::resolver::Target;
    use std::time::Instant;

    fn manager(backend: &ScriptedBackend) -> SessionManager {
        SessionManager::with_slots(Arc::new(backend.clone()), 1)
    }

    #[tokio::test]
    async fn test_close_releases_slot() {
        let backend = ScriptedBackend::new();
        let sessions = manager(&backend);
        let first = sessions.open(SessionOptions::for_run("a")).await.unwrap();
        assert_eq!(sessions.open_sessions(), 1);
        first.close().await.unwrap();
        assert_eq!(sessions.open_sessions(), 0);

        let second = sessions.open(SessionOptions::for_run("b")).await.unwrap();
        second.close().await.unwrap();
        assert_eq!(backend.max_concurrent_sessions(), 1);
    }

    #[tokio::test]
    async fn test_new_session_waits_for_previous_close() {
        let backend = ScriptedBackend::new().with_close_delay(Duration::from_millis(150));
        let sessions = manager(&backend);

        let first = sessions.open(SessionOptions::for_run("a")).await.unwrap();
        let closing = tokio::spawn(first.close());
        let second = sessions.open(SessionOptions::for_run("b")).await.unwrap();
        closing.await.unwrap().unwrap();
        second.close().await.unwrap();

        let events = backend.events().await;
        let closed_a = events.iter().find_map(|e| match e {
            SessionEvent::Closed { session, at } if session == "scripted-1" => Some(*at),
            _ => None,
        });
        let opened_b = events.iter().find_map(|e| match e {
            SessionEvent::Opened { session, at } if session == "scripted-2" => Some(*at),
            _ => None,
        });
        assert!(closed_a.unwrap() <= opened_b.unwrap());
        assert_eq!(backend.max_concurrent_sessions(), 1);
    }

    #[tokio::test]
    async fn test_dropped_session_is_closed_before_slot_reuse() {
        let backend = ScriptedBackend::new().with_close_delay(Duration::from_millis(100));
        let sessions = manager(&backend);

        let first = sessions.open(SessionOptions::for_run("a")).await.unwrap();
        drop(first);
        let started = Instant::now();
        let second = sessions.open(SessionOptions::for_run("b")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(90));
        assert_eq!(backend.open_sessions(), 1);
        second.close().await.unwrap();
        sessions.drain().await.unwrap();
        assert_eq!(sessions.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect() {
        let backend = ScriptedBackend::new().with_outcomes([ScriptedOutcome::Disconnect("gone".into())]);
        let sessions = manager(&backend);
        let mut session = sessions.open(SessionOptions::for_run("a")).await.unwrap();

        let click = ResolvedCommand::Click {
            target: Target::described("x"),
            double: false,
        };
        let err = session.execute(&click, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::SessionDisconnected(_)));

        session.reconnect().await.unwrap();
        assert_eq!(session.reconnects(), 1);
        assert_eq!(session.id(), Some("scripted-2"));
        assert!(session.execute(&click, Duration::from_secs(1)).await.unwrap().success);
        session.close().await.unwrap();
        assert_eq!(backend.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_failed_reconnect_is_disconnected() {
        let backend = ScriptedBackend::new();
        let sessions = manager(&backend);
        let mut session = sessions.open(SessionOptions::for_run("a")).await.unwrap();
        let backend = backend.failing_opens(1);
        let err = session.reconnect().await.unwrap_err();
        assert!(matches!(err, EngineError::SessionDisconnected(_)));
        drop(backend);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_timeout_is_a_failed_outcome() {
        let backend = ScriptedBackend::new().with_execute_delay(Duration::from_millis(800));
        let sessions = manager(&backend);
        let mut session = sessions.open(SessionOptions::for_run("a")).await.unwrap();
        let wait = ResolvedCommand::Wait {
            duration_ms: Some(1),
            text: None,
        };
        let outcome = session.execute(&wait, Duration::from_millis(20)).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("timeout"));
        session.close().await.unwrap();
    }
}
