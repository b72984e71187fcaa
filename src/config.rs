//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for ui-pilot, supporting:
//! - Environment variables for all tunable thresholds and budgets
//! - Defaults for every value so a bare environment works
//! - Typed sub-settings handed to each engine component
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `UI_PILOT_LLM_ENDPOINT` | Chat-completions endpoint URL | `http://127.0.0.1:8080/v1/chat/completions` |
//! | `UI_PILOT_LLM_MODEL` | Model name | `qwen3` |
//! | `UI_PILOT_LLM_API_KEY` | Optional bearer token | unset |
//! | `UI_PILOT_LLM_MAX_TOKENS` | Maximum tokens in a resolution response | `800` |
//! | `UI_PILOT_LLM_TIMEOUT` | Semantic resolution timeout in seconds | `90` |
//! | `UI_PILOT_LLM_CONNECT_TIMEOUT` | Connection timeout in seconds | `10` |
//! | `UI_PILOT_MAX_STEPS` | Step budget per run | `50` |
//! | `UI_PILOT_MAX_CANDIDATES` | Candidate elements offered for grounding | `100` |
//! | `UI_PILOT_RETRY_NAVIGATE` | Attempts for navigate commands | `2` |
//! | `UI_PILOT_RETRY_CLICK` | Attempts for click commands | `2` |
//! | `UI_PILOT_RETRY_TYPE` | Attempts for type/fill commands | `1` |
//! | `UI_PILOT_RETRY_DEFAULT` | Attempts for every other command | `2` |
//! | `UI_PILOT_RETRY_BASE_DELAY_MS` | Backoff base delay | `500` |
//! | `UI_PILOT_RETRY_DELAY_INCREMENT_MS` | Backoff growth per attempt | `500` |
//! | `UI_PILOT_MATCH_PARTIAL` | Keyword ratio for a `partial` match | `0.8` |
//! | `UI_PILOT_MATCH_CONTAINS` | Keyword ratio for a `contains` match | `0.5` |
//! | `UI_PILOT_SESSION_SLOTS` | Concurrent automation sessions per host | `1` |
//! | `UI_PILOT_DRIVER` | Automation driver command line | `ui-pilot-driver` |
//!
//! # Example
//!
//! ```bash
//! export UI_PILOT_LLM_ENDPOINT="http://localhost:11434/v1/chat/completions"
//! export UI_PILOT_LLM_MODEL="qwen2.5:14b"
//! export UI_PILOT_MAX_STEPS=80
//! ```

use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use crate::resolver::ActionKind;

// ============================================================================
// Default Values
// ============================================================================

/// Default chat-completions endpoint
pub const DEFAULT_LLM_ENDPOINT: &str = "http://127.0.0.1:8080/v1/chat/completions";

/// Default model name
pub const DEFAULT_LLM_MODEL: &str = "qwen3";

/// Default max tokens for a resolution response
pub const DEFAULT_LLM_MAX_TOKENS: u32 = 800;

/// Default semantic resolution timeout (seconds)
pub const DEFAULT_LLM_TIMEOUT: u64 = 90;

/// Default connection timeout (seconds)
pub const DEFAULT_LLM_CONNECT_TIMEOUT: u64 = 10;

/// Default step budget per run
pub const DEFAULT_MAX_STEPS: usize = 50;

/// Default bound on candidate elements
pub const DEFAULT_MAX_CANDIDATES: usize = 100;

pub const DEFAULT_RETRY_NAVIGATE: u32 = 2;
pub const DEFAULT_RETRY_CLICK: u32 = 2;
pub const DEFAULT_RETRY_TYPE: u32 = 1;
pub const DEFAULT_RETRY_DEFAULT: u32 = 2;

/// Default backoff base (milliseconds)
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Default backoff growth per attempt (milliseconds)
pub const DEFAULT_RETRY_DELAY_INCREMENT_MS: u64 = 500;

/// Keyword ratio at or above which an expectation is a `partial` match
pub const DEFAULT_MATCH_PARTIAL: f64 = 0.8;

/// Keyword ratio at or above which an expectation is a `contains` match
pub const DEFAULT_MATCH_CONTAINS: f64 = 0.5;

/// Keywords of this many chars or fewer are ignored
pub const DEFAULT_MIN_KEYWORD_CHARS: usize = 1;

/// Maximum length of the `actual` evidence string
pub const DEFAULT_EVIDENCE_MAX_CHARS: usize = 200;

/// Default number of concurrent session slots
pub const DEFAULT_SESSION_SLOTS: usize = 1;

/// Default automation driver command
pub const DEFAULT_DRIVER: &str = "ui-pilot-driver";

/// Per-action execution timeouts (seconds)
pub const DEFAULT_NAVIGATE_TIMEOUT: u64 = 30;
pub const DEFAULT_INTERACTION_TIMEOUT: u64 = 10;
pub const DEFAULT_ACTION_TIMEOUT: u64 = 15;
pub const DEFAULT_WAIT_SLACK: u64 = 5;

/// Snapshot capture timeout (seconds)
pub const DEFAULT_SNAPSHOT_TIMEOUT: u64 = 15;

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_LLM_ENDPOINT: &str = "UI_PILOT_LLM_ENDPOINT";
pub const ENV_LLM_MODEL: &str = "UI_PILOT_LLM_MODEL";
pub const ENV_LLM_API_KEY: &str = "UI_PILOT_LLM_API_KEY";
pub const ENV_LLM_MAX_TOKENS: &str = "UI_PILOT_LLM_MAX_TOKENS";
pub const ENV_LLM_TIMEOUT: &str = "UI_PILOT_LLM_TIMEOUT";
pub const ENV_LLM_CONNECT_TIMEOUT: &str = "UI_PILOT_LLM_CONNECT_TIMEOUT";
pub const ENV_MAX_STEPS: &str = "UI_PILOT_MAX_STEPS";
pub const ENV_MAX_CANDIDATES: &str = "UI_PILOT_MAX_CANDIDATES";
pub const ENV_RETRY_NAVIGATE: &str = "UI_PILOT_RETRY_NAVIGATE";
pub const ENV_RETRY_CLICK: &str = "UI_PILOT_RETRY_CLICK";
pub const ENV_RETRY_TYPE: &str = "UI_PILOT_RETRY_TYPE";
pub const ENV_RETRY_DEFAULT: &str = "UI_PILOT_RETRY_DEFAULT";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "UI_PILOT_RETRY_BASE_DELAY_MS";
pub const ENV_RETRY_DELAY_INCREMENT_MS: &str = "UI_PILOT_RETRY_DELAY_INCREMENT_MS";
pub const ENV_MATCH_PARTIAL: &str = "UI_PILOT_MATCH_PARTIAL";
pub const ENV_MATCH_CONTAINS: &str = "UI_PILOT_MATCH_CONTAINS";
pub const ENV_SESSION_SLOTS: &str = "UI_PILOT_SESSION_SLOTS";
pub const ENV_DRIVER: &str = "UI_PILOT_DRIVER";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for ui-pilot
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmSettings,
    pub engine: EngineSettings,
    pub retry: RetrySettings,
    pub verify: VerifySettings,
    pub session: SessionSettings,
}

/// Semantic backend settings
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    /// Resolution timeout (seconds)
    pub timeout: u64,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
}

/// Plan cursor and resolver settings
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_steps: usize,
    pub max_candidates: usize,
    pub snapshot_timeout: Duration,
}

/// Execution policy settings
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub navigate_attempts: u32,
    pub click_attempts: u32,
    pub type_attempts: u32,
    pub default_attempts: u32,
    /// Attempts granted to the re-resolve strategy once the standard one is spent
    pub alternative_attempts: u32,
    pub base_delay: Duration,
    pub delay_increment: Duration,
    pub timeouts: ActionTimeouts,
}

/// Execution timeouts per action kind
#[derive(Debug, Clone)]
pub struct ActionTimeouts {
    pub navigate: Duration,
    pub interaction: Duration,
    pub other: Duration,
    /// Added on top of an explicit wait duration
    pub wait_slack: Duration,
}

/// Outcome verifier thresholds
#[derive(Debug, Clone)]
pub struct VerifySettings {
    pub partial_ratio: f64,
    pub contains_ratio: f64,
    pub min_keyword_chars: usize,
    pub evidence_max_chars: usize,
}

/// Automation session settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub slots: usize,
    pub driver: String,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            llm: LlmSettings::from_env(),
            engine: EngineSettings::from_env(),
            retry: RetrySettings::from_env(),
            verify: VerifySettings::from_env(),
            session: SessionSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            llm: LlmSettings::defaults(),
            engine: EngineSettings::defaults(),
            retry: RetrySettings::defaults(),
            verify: VerifySettings::defaults(),
            session: SessionSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl LlmSettings {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var(ENV_LLM_ENDPOINT).unwrap_or_else(|_| DEFAULT_LLM_ENDPOINT.to_string()),
            model: env::var(ENV_LLM_MODEL).unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
            api_key: env::var(ENV_LLM_API_KEY).ok().filter(|k| !k.trim().is_empty()),
            max_tokens: env_parse(ENV_LLM_MAX_TOKENS, DEFAULT_LLM_MAX_TOKENS),
            timeout: env_parse(ENV_LLM_TIMEOUT, DEFAULT_LLM_TIMEOUT),
            connect_timeout: env_parse(ENV_LLM_CONNECT_TIMEOUT, DEFAULT_LLM_CONNECT_TIMEOUT),
        }
    }

    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_LLM_ENDPOINT.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            api_key: None,
            max_tokens: DEFAULT_LLM_MAX_TOKENS,
            timeout: DEFAULT_LLM_TIMEOUT,
            connect_timeout: DEFAULT_LLM_CONNECT_TIMEOUT,
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> Self {
        Self {
            max_steps: env_parse(ENV_MAX_STEPS, DEFAULT_MAX_STEPS),
            max_candidates: env_parse(ENV_MAX_CANDIDATES, DEFAULT_MAX_CANDIDATES),
            snapshot_timeout: Duration::from_secs(DEFAULT_SNAPSHOT_TIMEOUT),
        }
    }

    pub fn defaults() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_candidates: DEFAULT_MAX_CANDIDATES,
            snapshot_timeout: Duration::from_secs(DEFAULT_SNAPSHOT_TIMEOUT),
        }
    }
}

impl RetrySettings {
    pub fn from_env() -> Self {
        Self {
            navigate_attempts: env_parse(ENV_RETRY_NAVIGATE, DEFAULT_RETRY_NAVIGATE),
            click_attempts: env_parse(ENV_RETRY_CLICK, DEFAULT_RETRY_CLICK),
            type_attempts: env_parse(ENV_RETRY_TYPE, DEFAULT_RETRY_TYPE),
            default_attempts: env_parse(ENV_RETRY_DEFAULT, DEFAULT_RETRY_DEFAULT),
            alternative_attempts: 1,
            base_delay: Duration::from_millis(env_parse(
                ENV_RETRY_BASE_DELAY_MS,
                DEFAULT_RETRY_BASE_DELAY_MS,
            )),
            delay_increment: Duration::from_millis(env_parse(
                ENV_RETRY_DELAY_INCREMENT_MS,
                DEFAULT_RETRY_DELAY_INCREMENT_MS,
            )),
            timeouts: ActionTimeouts::defaults(),
        }
    }

    pub fn defaults() -> Self {
        Self {
            navigate_attempts: DEFAULT_RETRY_NAVIGATE,
            click_attempts: DEFAULT_RETRY_CLICK,
            type_attempts: DEFAULT_RETRY_TYPE,
            default_attempts: DEFAULT_RETRY_DEFAULT,
            alternative_attempts: 1,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            delay_increment: Duration::from_millis(DEFAULT_RETRY_DELAY_INCREMENT_MS),
            timeouts: ActionTimeouts::defaults(),
        }
    }

    /// Same budgets with no backoff, for tests and dry runs
    pub fn without_backoff(mut self) -> Self {
        self.base_delay = Duration::ZERO;
        self.delay_increment = Duration::ZERO;
        self
    }

    /// Attempt budget of the standard strategy for an action kind
    pub fn attempts_for(&self, kind: ActionKind) -> u32 {
        match kind {
            ActionKind::Navigate => self.navigate_attempts,
            ActionKind::Click => self.click_attempts,
            ActionKind::Type => self.type_attempts,
            _ => self.default_attempts,
        }
    }

    /// Delay before the given 1-based retry attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay + self.delay_increment * attempt
    }
}

impl ActionTimeouts {
    pub fn defaults() -> Self {
        Self {
            navigate: Duration::from_secs(DEFAULT_NAVIGATE_TIMEOUT),
            interaction: Duration::from_secs(DEFAULT_INTERACTION_TIMEOUT),
            other: Duration::from_secs(DEFAULT_ACTION_TIMEOUT),
            wait_slack: Duration::from_secs(DEFAULT_WAIT_SLACK),
        }
    }

    /// Execution timeout for an action kind; waits add their own duration
    pub fn for_kind(&self, kind: ActionKind, wait: Option<Duration>) -> Duration {
        match kind {
            ActionKind::Navigate | ActionKind::NavigateBack => self.navigate,
            ActionKind::Click
            | ActionKind::Type
            | ActionKind::SelectOption
            | ActionKind::Hover
            | ActionKind::PressKey => self.interaction,
            ActionKind::Wait => wait.unwrap_or_default() + self.wait_slack,
            ActionKind::TabSwitch => self.other,
        }
    }
}

impl VerifySettings {
    pub fn from_env() -> Self {
        Self {
            partial_ratio: env_parse(ENV_MATCH_PARTIAL, DEFAULT_MATCH_PARTIAL),
            contains_ratio: env_parse(ENV_MATCH_CONTAINS, DEFAULT_MATCH_CONTAINS),
            min_keyword_chars: DEFAULT_MIN_KEYWORD_CHARS,
            evidence_max_chars: DEFAULT_EVIDENCE_MAX_CHARS,
        }
    }

    pub fn defaults() -> Self {
        Self {
            partial_ratio: DEFAULT_MATCH_PARTIAL,
            contains_ratio: DEFAULT_MATCH_CONTAINS,
            min_keyword_chars: DEFAULT_MIN_KEYWORD_CHARS,
            evidence_max_chars: DEFAULT_EVIDENCE_MAX_CHARS,
        }
    }
}

impl SessionSettings {
    pub fn from_env() -> Self {
        Self {
            slots: env_parse(ENV_SESSION_SLOTS, DEFAULT_SESSION_SLOTS).max(1),
            driver: env::var(ENV_DRIVER).unwrap_or_else(|_| DEFAULT_DRIVER.to_string()),
        }
    }

    pub fn defaults() -> Self {
        Self {
            slots: DEFAULT_SESSION_SLOTS,
            driver: DEFAULT_DRIVER.to_string(),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Read and parse an environment variable, keeping the default on absence or garbage
fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| parse_value(&s))
        .unwrap_or(default)
}

fn parse_value<T: FromStr>(raw: &str) -> Option<T> {
    raw.trim().parse().ok()
}

/// Get the semantic backend endpoint (convenience function)
pub fn llm_endpoint() -> String {
    get().llm.endpoint.clone()
}

/// Get the automation driver command (convenience function)
pub fn driver_command() -> String {
    get().session.driver.clone()
}
