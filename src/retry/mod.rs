//! Retry and escalation.
//!
//! - `classify`: error message → [`ErrorKind`]
//! - `state`: tiers, policy tables and per-task retry state
//! - `engine`: the state machine driving one task's dispatch

pub mod classify;
pub mod engine;
pub mod state;

pub use classify::{ErrorClassifier, ErrorKind};
pub use engine::{Dispatch, RetryEngine, RetryMetrics, RetrySuccess, TerminalFailure};
pub use state::{ClassifiedError, Decision, RetryPolicy, RetryState, Tier, TierCounts};
