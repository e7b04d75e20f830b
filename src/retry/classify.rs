//! Error classification by message pattern.
//!
//! Rules are checked in order; the first match wins and anything unmatched is
//! `General`.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::retry::state::Tier;

/// Kinds of execution failure, each with its own retry ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    AuthSession,
    Network,
    InterfaceElementMissing,
    InterfaceTiming,
    /// The task cannot be routed at all (no adapter or executor). Never retried.
    Configuration,
    General,
}

impl ErrorKind {
    /// Maximum retries allowed for this kind.
    pub fn retry_ceiling(&self) -> u32 {
        match self {
            Self::RateLimit | Self::AuthSession => 5,
            Self::Network | Self::General => 8,
            Self::InterfaceElementMissing => 5,
            Self::InterfaceTiming => 10,
            Self::Configuration => 0,
        }
    }

    /// Lowest tier a retry for this kind may use.
    pub fn tier_floor(&self) -> Tier {
        match self {
            Self::RateLimit | Self::AuthSession => Tier::Heavy,
            Self::Network | Self::General => Tier::Moderate,
            Self::InterfaceElementMissing | Self::InterfaceTiming | Self::Configuration => {
                Tier::Lightweight
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RateLimit => "rate_limit",
            Self::AuthSession => "auth_session",
            Self::Network => "network",
            Self::InterfaceElementMissing => "interface_element_missing",
            Self::InterfaceTiming => "interface_timing",
            Self::Configuration => "configuration",
            Self::General => "general",
        };
        write!(f, "{s}")
    }
}

/// One pattern rule.
#[derive(Debug, Clone)]
pub struct ClassifyRule {
    pub kind: ErrorKind,
    pub regex: Regex,
}

/// Maps raw error messages to [`ErrorKind`]s.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<ClassifyRule>,
}

impl ErrorClassifier {
    /// Classifier with the built-in patterns.
    pub fn default_rules() -> Self {
        let rule = |kind, pattern: &str| ClassifyRule {
            kind,
            regex: Regex::new(pattern).expect("built-in classifier pattern"),
        };

        Self {
            rules: vec![
                rule(
                    ErrorKind::Configuration,
                    r"(?i)(no adapter registered|no executor for)",
                ),
                rule(
                    ErrorKind::RateLimit,
                    r"(?i)(rate[\s_-]?limit|too many requests|\b429\b|quota|usage limit|上限)",
                ),
                rule(
                    ErrorKind::AuthSession,
                    concat!(
                        r"(?i)(log\s?in|sign\s?in|unauthori[sz]ed|\b401\b|\b403\b",
                        r"|session (expired|invalid)|認証|ログイン)",
                    ),
                ),
                rule(
                    ErrorKind::Network,
                    concat!(
                        r"(?i)(network|connection (reset|refused|closed|lost)|econn\w*",
                        r"|enotfound|etimedout|fetch failed|socket|dns|ネットワーク)",
                    ),
                ),
                rule(
                    ErrorKind::InterfaceElementMissing,
                    r"(?i)(element not found|no such element|selector|not found|見つかりません|要素)",
                ),
                rule(
                    ErrorKind::InterfaceTiming,
                    r"(?i)(timed? ?out|not ready|still generating|stale|タイムアウト)",
                ),
            ],
        }
    }

    /// Classifier with no rules; everything is `General`.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, kind: ErrorKind, pattern: &str) -> Result<(), regex::Error> {
        self.rules.push(ClassifyRule {
            kind,
            regex: Regex::new(pattern)?,
        });
        Ok(())
    }

    pub fn classify(&self, message: &str) -> ErrorKind {
        let kind = self
            .rules
            .iter()
            .find(|r| r.regex.is_match(message))
            .map(|r| r.kind)
            .unwrap_or(ErrorKind::General);
        debug!(%kind, message, "Classified error");
        kind
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::default_rules()
    }
}
