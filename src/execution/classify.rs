//! Error-text classification for retry decisions.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

static DISCONNECTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:disconnected|session (?:is )?closed|target (?:page, context or browser )?(?:has been )?closed|browser has been closed|connection closed|broken pipe|driver process exited|会话已关闭|连接断开)")
        .expect("disconnected pattern")
});

static RESOLUTION_FAILURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:semantic resolution failed|resolution failed|could not resolve|unable to resolve|cannot resolve|解析失败|无法解析)")
        .expect("resolution failure pattern")
});

static INVALID_ARGUMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:invalid|validation|malformed|unsupported|not allowed|missing required|requires a|bad argument|illegal|参数错误|参数无效|无效)")
        .expect("invalid argument pattern")
});

static NOT_FOUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:not found|no such element|no element|not visible|not attached|detached|not interactable|未找到|找不到|不存在)")
        .expect("not found pattern")
});

static TRANSIENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:timeout|timed out|network|transport|econnreset|econnrefused|connection refused|connection reset|net::err|navigation|navigating|frame was detached|temporarily|try again|超时|网络)")
        .expect("transient pattern")
});

/// Retry decision for a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Retryable,
    NonRetryable,
    Disconnected,
}

/// Classify an error message.
///
/// Connectivity loss wins, then the non-retryable families (semantic
/// resolution failure, invalid argument), then the retryable ones. Text
/// matching nothing is treated as retryable.
pub fn classify_error(message: &str) -> ErrorClass {
    if DISCONNECTED.is_match(message) {
        ErrorClass::Disconnected
    } else if RESOLUTION_FAILURE.is_match(message) || INVALID_ARGUMENT.is_match(message) {
        ErrorClass::NonRetryable
    } else {
        ErrorClass::Retryable
    }
}

/// Error kind recorded on a step that failed with this message
pub fn error_kind_for(message: &str) -> ErrorKind {
    if DISCONNECTED.is_match(message) {
        ErrorKind::SessionDisconnected
    } else if RESOLUTION_FAILURE.is_match(message) {
        ErrorKind::ResolutionFailed
    } else if INVALID_ARGUMENT.is_match(message) {
        ErrorKind::ActionValidation
    } else if NOT_FOUND.is_match(message) {
        ErrorKind::TargetNotFound
    } else if TRANSIENT.is_match(message) {
        ErrorKind::Transient
    } else {
        ErrorKind::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_families() {
        for msg in [
            "timeout after 10s",
            "Timed out waiting for selector",
            "net::ERR_CONNECTION_RESET",
            "element not found: e13",
            "navigation in progress",
            "操作超时",
        ] {
            assert_eq!(classify_error(msg), ErrorClass::Retryable, "{}", msg);
        }
    }

    #[test]
    fn test_non_retryable_families() {
        for msg in [
            "invalid action: navigate requires a url",
            "semantic resolution failed: 401",
            "could not resolve target",
            "unsupported key 'Hyper'",
        ] {
            assert_eq!(classify_error(msg), ErrorClass::NonRetryable, "{}", msg);
        }
    }

    #[test]
    fn test_disconnect_wins() {
        assert_eq!(classify_error("Target page, context or browser has been closed"), ErrorClass::Disconnected);
        assert_eq!(classify_error("session disconnected: pipe"), ErrorClass::Disconnected);
    }

    #[test]
    fn test_unknown_text_is_retryable() {
        assert_eq!(classify_error("something odd happened"), ErrorClass::Retryable);
        assert_eq!(error_kind_for("something odd happened"), ErrorKind::Internal);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(error_kind_for("element not found: e13"), ErrorKind::TargetNotFound);
        assert_eq!(error_kind_for("timeout after 10s"), ErrorKind::Transient);
        assert_eq!(error_kind_for("invalid action: x"), ErrorKind::ActionValidation);
        assert_eq!(error_kind_for("semantic resolution failed"), ErrorKind::ResolutionFailed);
    }
}
