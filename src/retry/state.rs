//! Escalation tiers, retry policy and per-task retry state.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::retry::classify::ErrorKind;

/// Escalation tier: what to do before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Retry in the same worker.
    Lightweight,
    /// Reload the worker's context in place.
    Moderate,
    /// Tear the worker down and open a new one.
    Heavy,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lightweight => "lightweight",
            Self::Moderate => "moderate",
            Self::Heavy => "heavy",
        };
        write!(f, "{s}")
    }
}

/// Per-tier usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub lightweight: u32,
    pub moderate: u32,
    pub heavy: u32,
}

impl TierCounts {
    pub fn get(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Lightweight => self.lightweight,
            Tier::Moderate => self.moderate,
            Tier::Heavy => self.heavy,
        }
    }

    pub fn bump(&mut self, tier: Tier) {
        match tier {
            Tier::Lightweight => self.lightweight += 1,
            Tier::Moderate => self.moderate += 1,
            Tier::Heavy => self.heavy += 1,
        }
    }

    pub fn add(&mut self, other: &TierCounts) {
        self.lightweight += other.lightweight;
        self.moderate += other.moderate;
        self.heavy += other.heavy;
    }
}

/// A failure after classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

/// What the engine does after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { tier: Tier, delay: Duration },
    GiveUp { ceiling: u32 },
}

/// Tier ranges, backoff schedules and limits.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub lightweight_backoff: Vec<Duration>,
    pub moderate_backoff: Vec<Duration>,
    pub heavy_backoff: Vec<Duration>,
    /// Last attempt number served by the lightweight tier.
    pub lightweight_until: u32,
    /// Last attempt number served by the moderate tier.
    pub moderate_until: u32,
    /// Hard limit on attempts regardless of kind.
    pub max_attempts: u32,
    /// Identical consecutive kinds that force the heavy tier.
    pub consecutive_threshold: u32,
    /// How many recent errors a terminal failure carries.
    pub history_len: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let secs = Duration::from_secs;
        let mins = |m: u64| Duration::from_secs(m * 60);
        Self {
            lightweight_backoff: vec![secs(1), secs(2), secs(5), secs(10), secs(15)],
            moderate_backoff: vec![secs(30), secs(60), secs(120)],
            heavy_backoff: vec![mins(5), mins(15), mins(30), mins(60), mins(120)],
            lightweight_until: 5,
            moderate_until: 8,
            max_attempts: 20,
            consecutive_threshold: 5,
            history_len: 5,
        }
    }
}

impl RetryPolicy {
    /// Tier by attempt number alone.
    pub fn tier_for_attempt(&self, attempt: u32) -> Tier {
        if attempt <= self.lightweight_until {
            Tier::Lightweight
        } else if attempt <= self.moderate_until {
            Tier::Moderate
        } else {
            Tier::Heavy
        }
    }

    /// Transition table keyed by (kind, consecutive count, attempt count).
    pub fn next_tier(&self, kind: ErrorKind, consecutive: u32, attempt: u32) -> Tier {
        if consecutive >= self.consecutive_threshold {
            return Tier::Heavy;
        }
        self.tier_for_attempt(attempt).max(kind.tier_floor())
    }

    /// Delay for the `uses`-th entry into `tier`, clamped to the last entry.
    pub fn backoff(&self, tier: Tier, uses: u32) -> Duration {
        let schedule = match tier {
            Tier::Lightweight => &self.lightweight_backoff,
            Tier::Moderate => &self.moderate_backoff,
            Tier::Heavy => &self.heavy_backoff,
        };
        schedule
            .get(uses as usize)
            .or_else(|| schedule.last())
            .copied()
            .unwrap_or_default()
    }

    pub fn decide(&self, state: &RetryState) -> Decision {
        let Some(kind) = state.last_error_kind else {
            return Decision::Retry {
                tier: Tier::Lightweight,
                delay: self.backoff(Tier::Lightweight, 0),
            };
        };
        let ceiling = kind.retry_ceiling().min(self.max_attempts);
        if state.attempt_count > ceiling {
            return Decision::GiveUp { ceiling };
        }
        let tier = self.next_tier(kind, state.consecutive_error_count, state.attempt_count);
        Decision::Retry {
            tier,
            delay: self.backoff(tier, state.tier_counts.get(tier)),
        }
    }
}

/// Retry bookkeeping for one in-flight task.
#[derive(Debug, Clone)]
pub struct RetryState {
    /// Attempts made so far, including the first.
    pub attempt_count: u32,
    pub consecutive_error_count: u32,
    pub last_error_kind: Option<ErrorKind>,
    pub tier: Option<Tier>,
    pub tier_counts: TierCounts,
    recent: VecDeque<ClassifiedError>,
    history_len: usize,
}

impl RetryState {
    pub fn new(history_len: usize) -> Self {
        Self {
            attempt_count: 0,
            consecutive_error_count: 0,
            last_error_kind: None,
            tier: None,
            tier_counts: TierCounts::default(),
            recent: VecDeque::with_capacity(history_len),
            history_len,
        }
    }

    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt_count += 1;
        self.attempt_count
    }

    pub fn record_failure(
        &mut self,
        kind: ErrorKind,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) {
        if self.last_error_kind == Some(kind) {
            self.consecutive_error_count += 1;
        } else {
            self.consecutive_error_count = 1;
        }
        self.last_error_kind = Some(kind);

        self.recent.push_back(ClassifiedError {
            kind,
            message: message.into(),
            attempt: self.attempt_count,
            at,
        });
        while self.recent.len() > self.history_len {
            self.recent.pop_front();
        }
    }

    pub fn enter_tier(&mut self, tier: Tier) {
        self.tier = Some(tier);
        self.tier_counts.bump(tier);
    }

    /// The most recent classified errors, oldest first.
    pub fn recent_errors(&self) -> Vec<ClassifiedError> {
        self.recent.iter().cloned().collect()
    }
}
