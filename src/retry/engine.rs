//! Retry/escalation engine.
//!
//! Wraps one task's dispatch in the tier state machine: attempt, classify the
//! failure, wait out the tier's backoff, apply the tier's recovery action and
//! try again until success or the kind's ceiling.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::WorkerError;
use crate::retry::classify::{ErrorClassifier, ErrorKind};
use crate::retry::state::{ClassifiedError, Decision, RetryPolicy, RetryState, Tier, TierCounts};

/// One task's execution, with the recovery actions each tier needs.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Run the task once. `Err` carries the raw error message.
    async fn attempt(&self) -> Result<String, String>;

    /// Reload the hosting context in place (moderate tier).
    async fn refresh(&self) -> Result<(), WorkerError>;

    /// Replace the worker with a fresh one (heavy tier).
    async fn recreate(&self) -> Result<(), WorkerError>;
}

/// Aggregate counters across every task the engine has run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryMetrics {
    pub attempts: u64,
    pub successes: u64,
    pub terminal_failures: u64,
    pub tier_counts: TierCounts,
}

/// A task that eventually succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct RetrySuccess {
    pub response: String,
    pub attempts: u32,
    pub tier_counts: TierCounts,
    /// Failures seen before the success, most recent last.
    pub history: Vec<ClassifiedError>,
}

/// A task that exhausted its retries.
#[derive(Debug, Clone, Serialize)]
pub struct TerminalFailure {
    pub task_id: Uuid,
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
    pub ceiling: u32,
    pub tier_counts: TierCounts,
    /// Last classified errors, oldest first.
    pub recent_errors: Vec<ClassifiedError>,
    /// Engine-wide counters at the time of failure.
    pub metrics: RetryMetrics,
}

/// Runs dispatches through the escalation state machine.
pub struct RetryEngine {
    policy: RetryPolicy,
    classifier: ErrorClassifier,
    clock: Arc<dyn Clock>,
    metrics: Mutex<RetryMetrics>,
}

impl RetryEngine {
    pub fn new(policy: RetryPolicy, classifier: ErrorClassifier, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            classifier,
            clock,
            metrics: Mutex::new(RetryMetrics::default()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn metrics(&self) -> RetryMetrics {
        self.metrics.lock().map(|m| *m).unwrap_or_default()
    }

    fn update_metrics(&self, f: impl FnOnce(&mut RetryMetrics)) {
        if let Ok(mut metrics) = self.metrics.lock() {
            f(&mut metrics);
        }
    }

    /// Fail a task that cannot be routed, without attempting it.
    pub fn reject(&self, task_id: Uuid, message: impl Into<String>) -> TerminalFailure {
        let message = message.into();
        self.update_metrics(|m| m.terminal_failures += 1);
        error!(task_id = %task_id, error = %message, "Task rejected before dispatch");
        TerminalFailure {
            task_id,
            kind: ErrorKind::Configuration,
            message,
            attempts: 0,
            ceiling: ErrorKind::Configuration.retry_ceiling(),
            tier_counts: TierCounts::default(),
            recent_errors: Vec::new(),
            metrics: self.metrics(),
        }
    }

    /// Run `dispatch` until it succeeds or its error kind runs out of retries.
    pub async fn execute(
        &self,
        task_id: Uuid,
        dispatch: &dyn Dispatch,
    ) -> Result<RetrySuccess, TerminalFailure> {
        let mut state = RetryState::new(self.policy.history_len);

        loop {
            let attempt = state.begin_attempt();
            self.update_metrics(|m| m.attempts += 1);

            let message = match dispatch.attempt().await {
                Ok(response) => {
                    self.update_metrics(|m| m.successes += 1);
                    if attempt > 1 {
                        info!(task_id = %task_id, attempt, "Task succeeded after retry");
                    }
                    return Ok(RetrySuccess {
                        response,
                        attempts: attempt,
                        tier_counts: state.tier_counts,
                        history: state.recent_errors(),
                    });
                }
                Err(message) => message,
            };

            let kind = self.classifier.classify(&message);
            state.record_failure(kind, message.clone(), self.clock.now());

            let (tier, delay) = match self.policy.decide(&state) {
                Decision::GiveUp { ceiling } => {
                    self.update_metrics(|m| m.terminal_failures += 1);
                    error!(
                        task_id = %task_id,
                        %kind,
                        attempts = attempt,
                        ceiling,
                        error = %message,
                        "Task failed terminally"
                    );
                    return Err(TerminalFailure {
                        task_id,
                        kind,
                        message,
                        attempts: attempt,
                        ceiling,
                        tier_counts: state.tier_counts,
                        recent_errors: state.recent_errors(),
                        metrics: self.metrics(),
                    });
                }
                Decision::Retry { tier, delay } => (tier, delay),
            };

            state.enter_tier(tier);
            self.update_metrics(|m| m.tier_counts.bump(tier));
            warn!(
                task_id = %task_id,
                %kind,
                %tier,
                attempt,
                consecutive = state.consecutive_error_count,
                delay_secs = delay.as_secs(),
                error = %message,
                "Task attempt failed, escalating"
            );

            self.clock.sleep(delay).await;

            let recovery = match tier {
                Tier::Lightweight => Ok(()),
                Tier::Moderate => dispatch.refresh().await,
                Tier::Heavy => dispatch.recreate().await,
            };
            if let Err(e) = recovery {
                warn!(task_id = %task_id, %tier, error = %e, "Tier recovery action failed");
            }
        }
    }
}
