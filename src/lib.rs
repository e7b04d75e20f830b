//! gridrunner: grid worklist generation and batched AI worker execution.

pub mod clock;
pub mod config;
pub mod error;
pub mod grid;
pub mod retry;
pub mod scheduler;
pub mod sink;
pub mod tasks;
pub mod worker;
