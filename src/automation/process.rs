//! Driver subprocess backend speaking JSON lines over stdio.
//!
//! Requests: `{"id": n, "op": "open"|"snapshot"|"execute"|"close", ...}`.
//! Replies: `{"id": n, "ok": bool, "message"?, "error"?, "snapshot"?}`.
//! The snapshot may be aria text or a JSON document (see
//! [`crate::snapshot::parse_snapshot`]).

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{AutomationBackend, AutomationSession, BackendError, BackendResult, ExecutionOutcome, SessionOptions};
use crate::config;
use crate::resolver::ResolvedCommand;
use crate::snapshot::{Snapshot, parse_snapshot};

/// Default time to wait for a driver reply
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Time to wait for the driver to exit after `close`
const EXIT_GRACE: Duration = Duration::from_secs(5);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<DriverReply>>>>;

#[derive(Debug, Deserialize)]
struct DriverReply {
    id: u64,
    ok: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    snapshot: Option<serde_json::Value>,
    #[serde(default)]
    session: Option<String>,
}

/// Backend that spawns one driver process per session
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    program: String,
    args: Vec<String>,
    request_timeout: Duration,
}

impl ProcessBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Split a command line on whitespace: program then arguments
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).args(parts))
    }

    /// Backend for the configured driver command
    pub fn from_config() -> Option<Self> {
        Self::from_command_line(&config::driver_command())
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl AutomationBackend for ProcessBackend {
    async fn open_session(&self, options: &SessionOptions) -> BackendResult<Box<dyn AutomationSession>> {
        Ok(Box::new(self.spawn_session(options).await?))
    }

    fn name(&self) -> &str {
        &self.program
    }
}

impl ProcessBackend {
    /// Spawn the driver and complete the `open` handshake
    async fn spawn_session(&self, options: &SessionOptions) -> BackendResult<ProcessSession> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::Open(format!("failed to spawn '{}': {}", self.program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BackendError::Open("driver stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Open("driver stdout unavailable".to_string()))?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_replies(stdout, pending.clone(), alive.clone()));

        let mut session = ProcessSession {
            id: format!("{}-{}", self.program, options.run_id),
            child,
            stdin,
            pending,
            alive,
            reader,
            next_id: 1,
            request_timeout: self.request_timeout,
            closed: false,
        };

        let reply = session
            .request(serde_json::json!({ "op": "open", "options": options }), self.request_timeout)
            .await
            .map_err(|e| BackendError::Open(e.to_string()))?;
        if !reply.ok {
            let reason = reply.error.unwrap_or_else(|| "driver refused to open a session".to_string());
            session.shutdown().await;
            return Err(BackendError::Open(reason));
        }
        if let Some(id) = reply.session {
            session.id = id;
        }
        debug!(session = %session.id, program = %self.program, "driver session opened");
        Ok(session)
    }
}

/// Route replies to their waiting requests until the driver's stdout closes
async fn read_replies(stdout: tokio::process::ChildStdout, pending: Pending, alive: Arc<AtomicBool>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<DriverReply>(line) {
                    Ok(reply) => {
                        if let Some(tx) = pending.lock().await.remove(&reply.id) {
                            let _ = tx.send(reply);
                        }
                    }
                    Err(e) => warn!(error = %e, "ignoring malformed driver line"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "driver stdout read failed");
                break;
            }
        }
    }
    alive.store(false, Ordering::SeqCst);
    // dropping the senders wakes every waiting request with a disconnect
    pending.lock().await.clear();
}

struct ProcessSession {
    id: String,
    child: Child,
    stdin: ChildStdin,
    pending: Pending,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    next_id: u64,
    request_timeout: Duration,
    closed: bool,
}

impl ProcessSession {
    async fn request(&mut self, mut body: serde_json::Value, timeout: Duration) -> BackendResult<DriverReply> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(BackendError::Disconnected("driver process exited".to_string()));
        }
        let id = self.next_id;
        self.next_id += 1;
        body["id"] = serde_json::json!(id);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        // the reader may have drained `pending` between the check above and the insert
        if !self.alive.load(Ordering::SeqCst) {
            self.pending.lock().await.remove(&id);
            return Err(BackendError::Disconnected("driver process exited".to_string()));
        }

        let mut line = serde_json::to_string(&body).map_err(|e| BackendError::Protocol(e.to_string()))?;
        line.push('\n');
        if let Err(e) = self.write_line(&line).await {
            self.pending.lock().await.remove(&id);
            return Err(BackendError::Disconnected(format!("write to driver failed: {}", e)));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BackendError::Disconnected("driver process exited".to_string())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(BackendError::Timeout(timeout))
            }
        }
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await
    }

    async fn shutdown(&mut self) {
        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!(session = %self.id, %status, "driver exited"),
            _ => {
                if let Err(e) = self.child.kill().await {
                    warn!(session = %self.id, error = %e, "failed to kill driver");
                }
            }
        }
        self.reader.abort();
    }
}

#[async_trait]
impl AutomationSession for ProcessSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn capture_snapshot(&mut self) -> BackendResult<Snapshot> {
        let reply = self
            .request(serde_json::json!({ "op": "snapshot" }), self.request_timeout)
            .await?;
        if !reply.ok {
            return Err(BackendError::Protocol(
                reply.error.unwrap_or_else(|| "snapshot failed".to_string()),
            ));
        }
        let raw = match reply.snapshot {
            Some(serde_json::Value::String(text)) => text,
            Some(value) => value.to_string(),
            None => return Err(BackendError::Protocol("reply carries no snapshot".to_string())),
        };
        parse_snapshot(&raw).map_err(|e| BackendError::Protocol(e.to_string()))
    }

    async fn execute(&mut self, command: &ResolvedCommand, timeout: Duration) -> BackendResult<ExecutionOutcome> {
        let reply = self
            .request(serde_json::json!({ "op": "execute", "command": command }), timeout)
            .await?;
        Ok(ExecutionOutcome {
            success: reply.ok,
            message: reply.message.unwrap_or_default(),
            error: if reply.ok {
                None
            } else {
                Some(reply.error.unwrap_or_else(|| "driver reported failure".to_string()))
            },
        })
    }

    async fn close(&mut self) -> BackendResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.alive.load(Ordering::SeqCst) {
            if let Err(e) = self.request(serde_json::json!({ "op": "close" }), EXIT_GRACE).await {
                debug!(session = %self.id, error = %e, "driver close request failed");
            }
        }
        self.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Target;

    /// A shell driver: answers open, one snapshot, one execute, then close
    fn shell_driver(script: &str) -> ProcessBackend {
        ProcessBackend::new("sh")
            .arg("-c")
            .arg(script)
            .request_timeout(Duration::from_secs(5))
    }

    const HAPPY_DRIVER: &str = r#"
read line; printf '%s\n' '{"id":1,"ok":true,"session":"drv-1"}'
read line; printf '%s\n' '{"id":2,"ok":true,"snapshot":"- button \"登录\" [ref=e13]"}'
read line; printf '%s\n' '{"id":3,"ok":false,"error":"element not found"}'
read line; printf '%s\n' '{"id":4,"ok":true}'
"#;

    #[test]
    fn test_from_command_line() {
        let backend = ProcessBackend::from_command_line("node driver.js --headless").unwrap();
        assert_eq!(backend.program, "node");
        assert_eq!(backend.args, vec!["driver.js", "--headless"]);
        assert!(ProcessBackend::from_command_line("   ").is_none());
    }

    #[tokio::test]
    async fn test_driver_round_trip() {
        let backend = shell_driver(HAPPY_DRIVER);
        let mut session = backend.open_session(&SessionOptions::for_run("r1")).await.unwrap();
        assert_eq!(session.id(), "drv-1");

        let snapshot = session.capture_snapshot().await.unwrap();
        assert!(snapshot.contains_ref("e13"));

        let click = ResolvedCommand::Click {
            target: Target::by_ref("e13", None),
            double: false,
        };
        let outcome = session.execute(&click, Duration::from_secs(5)).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("element not found"));

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_exited_driver_is_a_disconnect() {
        let backend = shell_driver(r#"read line; printf '%s\n' '{"id":1,"ok":true}'; exit 0"#);
        let mut session = backend.open_session(&SessionOptions::for_run("r1")).await.unwrap();
        let err = session.capture_snapshot().await.unwrap_err();
        assert!(matches!(err, BackendError::Disconnected(_)));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_timeout_clears_pending_before_engine_deadline() {
        let backend = shell_driver(r#"read line; printf '%s\n' '{"id":1,"ok":true}'; read line; sleep 1"#);
        let mut session = backend.spawn_session(&SessionOptions::for_run("r1")).await.unwrap();
        let wait = ResolvedCommand::Wait {
            duration_ms: Some(1),
            text: None,
        };
        let timeout = Duration::from_millis(50);
        let result = tokio::time::timeout(crate::session::execute_deadline(timeout), session.execute(&wait, timeout)).await;

        assert!(matches!(result, Ok(Err(BackendError::Timeout(_)))));
        assert!(session.pending.lock().await.is_empty());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_open() {
        let backend = ProcessBackend::new("/nonexistent/ui-pilot-driver");
        let err = backend.open_session(&SessionOptions::for_run("r1")).await.err().unwrap();
        assert!(matches!(err, BackendError::Open(_)));
    }
}
