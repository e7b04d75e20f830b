//! Batch scheduler: runs a task list across the worker pool.
//!
//! Tasks go out in fixed-size batches. Each batch opens its workers, dispatches
//! every task concurrently through the retry engine, waits for all of them,
//! releases the slots and only then moves on. A terminal failure anywhere in a
//! batch stops the run after that batch.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::WorkerError;
use crate::grid::CellAddress;
use crate::retry::{Dispatch, RetryEngine, RetryMetrics, TerminalFailure, TierCounts};
use crate::sink::{CellWrite, ResultSink};
use crate::tasks::{AiType, Task};
use crate::worker::{Slot, SpecialExecutor, WorkerHandle, WorkerPool};

/// Outcome of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub address: CellAddress,
    pub ai_type: AiType,
    pub slot: Option<Slot>,
    pub attempts: u32,
    pub tier_counts: TierCounts,
    pub response: Option<String>,
    pub failure: Option<TerminalFailure>,
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub results: Vec<TaskResult>,
    pub batches_completed: usize,
    /// True if a terminal failure stopped the run early.
    pub halted: bool,
    pub tasks_not_started: usize,
    pub metrics: RetryMetrics,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Answer-cell text for a terminal failure. Recognized as "not answered" so the
/// cell is picked up again by the next run.
pub fn error_marker(failure: &TerminalFailure) -> String {
    format!("ERROR: {} after {} attempts: {}", failure.kind, failure.attempts, failure.message)
}

/// Log-column line for a successful task.
pub fn log_line(task: &Task, attempts: u32, at: DateTime<Utc>) -> String {
    format!(
        "[{}] {} / {} / {} ({} attempt{})",
        at.format("%Y-%m-%d %H:%M:%S"),
        task.ai_type,
        task.model,
        task.function,
        attempts,
        if attempts == 1 { "" } else { "s" }
    )
}

pub struct BatchScheduler {
    pool: Arc<WorkerPool>,
    engine: Arc<RetryEngine>,
    special: Option<Arc<dyn SpecialExecutor>>,
    sink: Arc<dyn ResultSink>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl BatchScheduler {
    pub fn new(
        pool: Arc<WorkerPool>,
        engine: Arc<RetryEngine>,
        sink: Arc<dyn ResultSink>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            pool,
            engine,
            special: None,
            sink,
            clock,
            config,
        }
    }

    pub fn with_special_executor(mut self, executor: Arc<dyn SpecialExecutor>) -> Self {
        self.special = Some(executor);
        self
    }

    /// Run every task, batch by batch, stopping after the first batch with a
    /// terminal failure.
    pub async fn run(&self, tasks: Vec<Task>) -> RunReport {
        let batch_size = self.config.batch_size.clamp(1, Slot::ALL.len());
        let batches: Vec<&[Task]> = tasks.chunks(batch_size).collect();
        let mut report = RunReport::default();

        tracing::info!(tasks = tasks.len(), batches = batches.len(), "Starting run");

        for (index, batch) in batches.iter().enumerate() {
            let results = self.run_batch(index, batch).await;
            let failed = results.iter().filter(|r| !r.succeeded()).count();
            report.results.extend(results);
            report.batches_completed += 1;

            if failed > 0 {
                report.halted = true;
                report.tasks_not_started = batches[index + 1..].iter().map(|b| b.len()).sum();
                tracing::error!(
                    batch = index,
                    failed,
                    not_started = report.tasks_not_started,
                    "Batch had terminal failures, halting run"
                );
                break;
            }

            if index + 1 < batches.len() {
                self.clock.sleep(self.config.inter_batch_delay).await;
            }
        }

        report.metrics = self.engine.metrics();
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            batches = report.batches_completed,
            halted = report.halted,
            "Run finished"
        );
        report
    }

    async fn run_batch(&self, index: usize, batch: &[Task]) -> Vec<TaskResult> {
        tracing::info!(batch = index, size = batch.len(), "Starting batch");

        let mut dispatches = Vec::with_capacity(batch.len());
        let mut used_slots = Vec::new();
        for (position, task) in batch.iter().enumerate() {
            let slot = if task.is_special() {
                None
            } else {
                Slot::new(position)
            };
            let rejected = self.unroutable(task).await;
            let handle = match slot {
                Some(slot) if rejected.is_none() => {
                    used_slots.push(slot);
                    match self.pool.assign(slot, task.ai_type).await {
                        Ok(handle) => Some(handle),
                        Err(e) => {
                            tracing::warn!(
                                %slot,
                                ai_type = %task.ai_type,
                                error = %e,
                                "Worker assignment failed"
                            );
                            None
                        }
                    }
                }
                _ => None,
            };
            dispatches.push(TaskDispatch {
                pool: &self.pool,
                special: self.special.as_deref(),
                task,
                slot,
                rejected,
                handle: Mutex::new(handle),
            });
        }

        let handles: Vec<WorkerHandle> = dispatches.iter().filter_map(|d| d.current()).collect();
        let readiness = self.pool.check_readiness(&handles).await;
        let not_ready = readiness.iter().filter(|r| !r.passed).count();
        if not_ready > 0 {
            tracing::warn!(
                batch = index,
                not_ready,
                "Proceeding with workers that failed readiness"
            );
        }

        let results = join_all(dispatches.iter().map(|d| self.run_task(d))).await;

        for slot in used_slots {
            self.pool.release(slot).await;
        }
        results
    }

    /// Why `task` cannot be dispatched at all, if it can't.
    async fn unroutable(&self, task: &Task) -> Option<String> {
        if task.is_special() {
            return self
                .special
                .is_none()
                .then(|| format!("no executor for special operation {}", task.ai_type));
        }
        if self.pool.adapters().has(task.ai_type).await {
            return None;
        }
        Some(
            WorkerError::AdapterMissing {
                ai_type: task.ai_type.to_string(),
            }
            .to_string(),
        )
    }

    async fn run_task(&self, dispatch: &TaskDispatch<'_>) -> TaskResult {
        let task = dispatch.task;
        tracing::debug!(
            task_id = %task.id,
            row = task.row,
            column = task.column,
            ai_type = %task.ai_type,
            "Dispatching task"
        );

        let outcome = match &dispatch.rejected {
            Some(reason) => Err(self.engine.reject(task.id, reason.clone())),
            None => self.engine.execute(task.id, dispatch).await,
        };
        let finished_at = self.clock.now();

        let (result, writes) = match outcome {
            Ok(success) => {
                let line = log_line(task, success.attempts, finished_at);
                let mut writes = vec![CellWrite::new(
                    task.answer_address(),
                    success.response.clone(),
                )];
                writes.extend(
                    task.log_addresses()
                        .into_iter()
                        .map(|a| CellWrite::new(a, line.clone())),
                );
                let result = TaskResult {
                    task_id: task.id,
                    address: task.answer_address(),
                    ai_type: task.ai_type,
                    slot: dispatch.slot,
                    attempts: success.attempts,
                    tier_counts: success.tier_counts,
                    response: Some(success.response),
                    failure: None,
                    finished_at,
                };
                (result, writes)
            }
            Err(failure) => {
                let writes = vec![CellWrite::new(task.answer_address(), error_marker(&failure))];
                let result = TaskResult {
                    task_id: task.id,
                    address: task.answer_address(),
                    ai_type: task.ai_type,
                    slot: dispatch.slot,
                    attempts: failure.attempts,
                    tier_counts: failure.tier_counts,
                    response: None,
                    failure: Some(failure),
                    finished_at,
                };
                (result, writes)
            }
        };

        if let Err(e) = self.sink.write(writes).await {
            tracing::warn!(
                task_id = %task.id,
                address = %result.address,
                error = %e,
                "Result write failed"
            );
        }
        result
    }
}

/// One task bound to its slot, as seen by the retry engine.
struct TaskDispatch<'a> {
    pool: &'a WorkerPool,
    special: Option<&'a dyn SpecialExecutor>,
    task: &'a Task,
    slot: Option<Slot>,
    /// Set when the task has no adapter or executor to run on.
    rejected: Option<String>,
    handle: Mutex<Option<WorkerHandle>>,
}

impl TaskDispatch<'_> {
    fn current(&self) -> Option<WorkerHandle> {
        self.handle.lock().ok().and_then(|h| *h)
    }

    fn replace(&self, handle: Option<WorkerHandle>) {
        if let Ok(mut current) = self.handle.lock() {
            *current = handle;
        }
    }

    /// Bring the cached handle in line with the pool. The termination watcher
    /// may have replaced the worker in this slot, or dropped it.
    async fn sync(&self) -> Option<WorkerHandle> {
        let cached = self.current();
        let Some(slot) = self.slot else {
            return cached;
        };
        let occupant = self
            .pool
            .occupant(slot)
            .await
            .filter(|h| h.ai_type == self.task.ai_type);
        if occupant.map(|h| h.context) != cached.map(|h| h.context) {
            match occupant {
                Some(h) => {
                    tracing::info!(%slot, context = %h.context, "Adopting recovered worker");
                }
                None => tracing::debug!(%slot, "Cached worker is gone"),
            }
            self.replace(occupant);
        }
        occupant
    }
}

#[async_trait]
impl Dispatch for TaskDispatch<'_> {
    async fn attempt(&self) -> Result<String, String> {
        let task = self.task;
        let timeout = task.response_timeout();

        if task.is_special() {
            let Some(special) = self.special else {
                return Err(format!("no executor for special operation {}", task.ai_type));
            };
            return match tokio::time::timeout(timeout, special.execute(task)).await {
                Ok(outcome) => outcome.into_result(),
                Err(_) => Err(WorkerError::Timeout(timeout).to_string()),
            };
        }

        let Some(adapter) = self.pool.adapters().get(task.ai_type).await else {
            return Err(WorkerError::AdapterMissing {
                ai_type: task.ai_type.to_string(),
            }
            .to_string());
        };
        let Some(handle) = self.sync().await else {
            let slot = self.slot.map(|s| s.to_string()).unwrap_or_default();
            return Err(format!("worker not ready in slot {slot}"));
        };

        match tokio::time::timeout(timeout, adapter.execute_task(&handle, task)).await {
            Ok(outcome) => outcome.into_result(),
            Err(_) => Err(WorkerError::Timeout(timeout).to_string()),
        }
    }

    async fn refresh(&self) -> Result<(), WorkerError> {
        match self.sync().await {
            Some(handle) => self.pool.refresh(&handle).await,
            None if self.task.is_special() => Ok(()),
            None => self.recreate().await,
        }
    }

    async fn recreate(&self) -> Result<(), WorkerError> {
        let Some(slot) = self.slot else {
            return Ok(());
        };
        let before = self.current().map(|h| h.context);
        if let Some(adopted) = self.sync().await
            && Some(adopted.context) != before
        {
            // Already replaced by automatic recovery.
            return Ok(());
        }
        let handle = self.pool.assign(slot, self.task.ai_type).await?;
        self.replace(Some(handle));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GroupType;
    use crate::retry::ErrorKind;

    fn task(ai_type: AiType) -> Task {
        Task {
            id: Uuid::new_v4(),
            row: 5,
            column: 1,
            prompt_columns: vec![0],
            prompts: vec!["hello".into()],
            ai_type,
            model: "gpt-4o".into(),
            function: "normal".into(),
            log_columns: vec![0],
            group_index: 0,
            group_id: Uuid::new_v4(),
            group_type: GroupType::Single,
            group_position: None,
            sequence_order: 0,
            dependencies: vec![],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn error_marker_is_not_an_answer() {
        let failure = TerminalFailure {
            task_id: Uuid::new_v4(),
            kind: ErrorKind::General,
            message: "boom".into(),
            attempts: 9,
            ceiling: 8,
            tier_counts: TierCounts::default(),
            recent_errors: vec![],
            metrics: RetryMetrics::default(),
        };
        let marker = error_marker(&failure);
        assert_eq!(marker, "ERROR: general after 9 attempts: boom");
        assert!(!crate::tasks::answered::is_answered(&marker));
    }

    #[test]
    fn log_line_names_ai_and_attempts() {
        let at = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            log_line(&task(AiType::ChatGpt), 1, at),
            "[2026-01-02 03:04:05] chatgpt / gpt-4o / normal (1 attempt)"
        );
        assert!(log_line(&task(AiType::Claude), 3, at).ends_with("(3 attempts)"));
    }
}
