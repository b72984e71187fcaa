//! Grounding resolver: turns one instruction into a [`ResolvedCommand`].
//!
//! Resolution order:
//! 1. fast-path patterns (tab switch, explicit URL, go back, fixed wait)
//! 2. semantic resolution against the snapshot's candidates, raced against a timeout
//! 3. keyword heuristic whenever the semantic path is absent or unusable for this step
//!
//! Only a semantic backend that can never answer (bad credentials, unknown
//! model) makes resolution fail; every other problem degrades to the
//! heuristic.

pub mod command;
pub mod fast_path;
pub mod heuristic;
pub mod ranking;
pub mod semantic;

pub use command::{ActionKind, ResolvedCommand, TabSelector, Target, is_navigable_url, normalize_url};
pub use heuristic::{extract_input_text, resolve_heuristic};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config;
use crate::error::{EngineError, EngineResult};
use crate::llm::SemanticBackend;
use crate::plan::is_assertion;
use crate::snapshot::{Snapshot, extract_candidates};

/// Resolver settings
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Upper bound on candidates offered to the semantic backend
    pub max_candidates: usize,
    /// Timeout for one semantic call
    pub timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            max_candidates: cfg.engine.max_candidates,
            timeout: Duration::from_secs(cfg.llm.timeout),
        }
    }
}

/// Which strategy produced a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    FastPath,
    Semantic,
    Heuristic,
}

/// A resolved command and how it was obtained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub command: ResolvedCommand,
    pub source: ResolutionSource,
    /// Why the semantic path was skipped or rejected, when it was
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

impl Resolution {
    fn heuristic(instruction: &str, reason: impl Into<String>) -> Self {
        Self {
            command: resolve_heuristic(instruction),
            source: ResolutionSource::Heuristic,
            degraded: Some(reason.into()),
        }
    }
}

/// Resolves instructions against snapshots
#[derive(Clone)]
pub struct GroundingResolver {
    backend: Option<Arc<dyn SemanticBackend>>,
    config: ResolverConfig,
}

impl GroundingResolver {
    pub fn new(backend: Option<Arc<dyn SemanticBackend>>, config: ResolverConfig) -> Self {
        Self { backend, config }
    }

    /// Resolver with a semantic backend and default settings
    pub fn with_backend(backend: Arc<dyn SemanticBackend>) -> Self {
        Self::new(Some(backend), ResolverConfig::default())
    }

    /// Resolver that never calls a semantic backend
    pub fn heuristic_only() -> Self {
        Self::new(None, ResolverConfig::default())
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Resolve one instruction.
    ///
    /// Fails only for verification text (never executable) and for a semantic
    /// backend that reports itself unusable.
    pub async fn resolve(&self, instruction: &str, snapshot: Option<&Snapshot>) -> EngineResult<Resolution> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(EngineError::ActionValidation("empty instruction".to_string()));
        }
        if is_assertion(instruction) {
            return Err(EngineError::ActionValidation(format!(
                "verification step is not executable: {}",
                instruction
            )));
        }

        if let Some(command) = fast_path::match_fast_path(instruction) {
            debug!(instruction, command = %command.describe(), "fast path");
            return Ok(Resolution {
                command,
                source: ResolutionSource::FastPath,
                degraded: None,
            });
        }

        let Some(backend) = &self.backend else {
            return Ok(Resolution::heuristic(instruction, "no semantic backend"));
        };
        let Some(snapshot) = snapshot else {
            return Ok(Resolution::heuristic(instruction, "no snapshot"));
        };
        let candidates = extract_candidates(snapshot, self.config.max_candidates);
        if candidates.is_empty() {
            return Ok(Resolution::heuristic(instruction, "snapshot has no candidates"));
        }

        let ranked = ranking::rank(instruction, &candidates);
        let user_prompt = semantic::build_user_prompt(instruction, snapshot, &ranked);
        let call = backend.complete(semantic::SYSTEM_PROMPT, &user_prompt, self.config.timeout);

        let reply = match tokio::time::timeout(self.config.timeout, call).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) if err.is_unusable() => {
                warn!(backend = backend.name(), error = %err, "semantic backend unusable");
                return Err(err.into());
            }
            Ok(Err(err)) => {
                warn!(backend = backend.name(), error = %err, "semantic resolution failed, using heuristic");
                return Ok(Resolution::heuristic(instruction, err.to_string()));
            }
            Err(_) => {
                warn!(
                    backend = backend.name(),
                    timeout = ?self.config.timeout,
                    "semantic resolution timed out, using heuristic"
                );
                return Ok(Resolution::heuristic(
                    instruction,
                    format!("semantic resolution timed out after {:?}", self.config.timeout),
                ));
            }
        };

        let resolved = semantic::parse_response(&reply)
            .and_then(|draft| semantic::draft_to_command(draft, instruction, snapshot, &candidates));
        match resolved {
            Ok(command) => {
                info!(instruction, command = %command.describe(), "resolved");
                Ok(Resolution {
                    command,
                    source: ResolutionSource::Semantic,
                    degraded: None,
                })
            }
            Err(err) => {
                warn!(instruction, error = %err, "semantic command rejected, using heuristic");
                Ok(Resolution::heuristic(instruction, err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, LlmResult};
    use crate::snapshot::{ElementRole, SnapshotElement};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Reply {
        Text(&'static str),
        Unauthorized,
        Unavailable,
        Hang,
    }

    struct FakeBackend {
        reply: Reply,
        calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SemanticBackend for FakeBackend {
        async fn complete(&self, _system: &str, _user: &str, _timeout: Duration) -> LlmResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Reply::Text(text) => Ok(text.to_string()),
                Reply::Unauthorized => Err(LlmError::Unauthorized {
                    status: 401,
                    message: "bad key".into(),
                }),
                Reply::Unavailable => Err(LlmError::ConnectionFailed("refused".into())),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(String::new())
                }
            }
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    fn resolver(backend: Arc<FakeBackend>) -> GroundingResolver {
        GroundingResolver::new(
            Some(backend),
            ResolverConfig {
                max_candidates: 100,
                timeout: Duration::from_millis(100),
            },
        )
    }

    fn login_snapshot() -> Snapshot {
        Snapshot::new(vec![
            SnapshotElement::new("e11", ElementRole::Textbox, "").with_placeholder("请输入用户名"),
            SnapshotElement::new("e13", ElementRole::Button, "登录"),
        ])
    }

    #[tokio::test]
    async fn test_fast_path_skips_backend() {
        let backend = FakeBackend::new(Reply::Text("unused"));
        let resolution = resolver(backend.clone())
            .resolve("switch to the last tab", Some(&login_snapshot()))
            .await
            .unwrap();
        assert_eq!(resolution.source, ResolutionSource::FastPath);
        assert_eq!(resolution.command, ResolvedCommand::TabSwitch { tab: TabSelector::Last });
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_semantic_resolution() {
        let backend = FakeBackend::new(Reply::Text(
            r#"<command>{"action":"type","targetRef":"e11","payloadText":"admin"}</command>"#,
        ));
        let resolution = resolver(backend)
            .resolve("在用户名输入框输入 admin", Some(&login_snapshot()))
            .await
            .unwrap();
        assert_eq!(resolution.source, ResolutionSource::Semantic);
        assert_eq!(
            resolution.command,
            ResolvedCommand::Type {
                target: Target::by_ref("e11", Some("请输入用户名".into())),
                text: "admin".into(),
                submit: false,
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_reply_falls_back_to_heuristic() {
        let backend = FakeBackend::new(Reply::Text(r#"<command>{"action":"click","targetRef":"e404"}</command>"#));
        let resolution = resolver(backend)
            .resolve("点击登录按钮", Some(&login_snapshot()))
            .await
            .unwrap();
        assert_eq!(resolution.source, ResolutionSource::Heuristic);
        assert!(resolution.degraded.is_some());
        assert_eq!(resolution.command.target_ref(), None);
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_heuristic() {
        let backend = FakeBackend::new(Reply::Hang);
        let resolution = resolver(backend)
            .resolve("点击登录按钮", Some(&login_snapshot()))
            .await
            .unwrap();
        assert_eq!(resolution.source, ResolutionSource::Heuristic);
        assert!(resolution.degraded.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_unreachable_backend_degrades() {
        let backend = FakeBackend::new(Reply::Unavailable);
        let resolution = resolver(backend)
            .resolve("点击登录按钮", Some(&login_snapshot()))
            .await
            .unwrap();
        assert_eq!(resolution.source, ResolutionSource::Heuristic);
    }

    #[tokio::test]
    async fn test_unusable_backend_fails() {
        let backend = FakeBackend::new(Reply::Unauthorized);
        let err = resolver(backend)
            .resolve("点击登录按钮", Some(&login_snapshot()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ResolutionFailed(_)));
    }

    #[tokio::test]
    async fn test_no_snapshot_uses_heuristic() {
        let backend = FakeBackend::new(Reply::Text("unused"));
        let resolution = resolver(backend.clone()).resolve("点击登录按钮", None).await.unwrap();
        assert_eq!(resolution.source, ResolutionSource::Heuristic);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_assertions_are_never_resolved() {
        let err = GroundingResolver::heuristic_only()
            .resolve("验证页面显示欢迎语", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ActionValidation(_)));
    }
}
