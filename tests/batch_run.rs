//! Integration tests for batched execution.
//!
//! Tasks are generated from a small sheet, then run through the real pool,
//! retry engine and scheduler against a stub host and scripted adapters. The
//! recording clock makes every backoff and delay instant.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use gridrunner::clock::RecordingClock;
use gridrunner::config::{GeneratorConfig, PoolConfig, SchedulerConfig};
use gridrunner::error::WorkerError;
use gridrunner::grid::{Analyzer, CellGrid, DataSource};
use gridrunner::retry::{ErrorClassifier, ErrorKind, RetryEngine, RetryPolicy};
use gridrunner::scheduler::{BatchScheduler, RunReport};
use gridrunner::sink::MemorySink;
use gridrunner::tasks::{AiType, Task, TaskGenerator};
use gridrunner::worker::{
    AdapterRegistry, ContextId, HostEvent, ReadinessReport, Slot, SlotRect, SpecialExecutor,
    TaskOutcome, WorkerAdapter, WorkerHandle, WorkerHost, WorkerPool, spawn_termination_watcher,
};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Host whose contexts open instantly and die on close.
#[derive(Default)]
struct StubHost {
    next_id: AtomicU64,
    alive: Mutex<HashSet<ContextId>>,
    opened: Mutex<Vec<(Slot, AiType)>>,
}

impl StubHost {
    fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    fn kill(&self, context: ContextId) {
        self.alive.lock().unwrap().remove(&context);
    }
}

#[async_trait]
impl WorkerHost for StubHost {
    async fn open(
        &self,
        slot: Slot,
        ai_type: AiType,
        _bounds: SlotRect,
    ) -> Result<ContextId, WorkerError> {
        let id = ContextId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.alive.lock().unwrap().insert(id);
        self.opened.lock().unwrap().push((slot, ai_type));
        Ok(id)
    }

    async fn close(&self, context: ContextId) -> Result<(), WorkerError> {
        self.alive.lock().unwrap().remove(&context);
        Ok(())
    }

    async fn is_alive(&self, context: ContextId) -> bool {
        self.alive.lock().unwrap().contains(&context)
    }

    async fn is_ready(&self, context: ContextId) -> bool {
        self.alive.lock().unwrap().contains(&context)
    }

    async fn reload(&self, _context: ContextId) -> Result<(), WorkerError> {
        Ok(())
    }
}

/// Answers every prompt, except those scripted to fail.
struct ScriptedAdapter {
    ai_type: AiType,
    /// Prompt → errors returned before succeeding.
    transient: Mutex<HashMap<String, VecDeque<String>>>,
    /// Prompt → error returned on every attempt.
    permanent: HashMap<String, String>,
    /// Prompt → (other prompt, calls of it to wait for) before answering.
    waits: HashMap<String, (String, usize)>,
    calls: Mutex<Vec<String>>,
    /// Prompts in the order their calls returned.
    finished: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    fn new(ai_type: AiType) -> Self {
        Self {
            ai_type,
            transient: Mutex::new(HashMap::new()),
            permanent: HashMap::new(),
            waits: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
        }
    }

    fn failing(mut self, prompt: &str, error: &str) -> Self {
        self.permanent.insert(prompt.to_string(), error.to_string());
        self
    }

    fn flaky(self, prompt: &str, errors: &[&str]) -> Self {
        self.transient.lock().unwrap().insert(
            prompt.to_string(),
            errors.iter().map(|e| e.to_string()).collect(),
        );
        self
    }

    fn waiting(mut self, prompt: &str, on: &str, calls: usize) -> Self {
        self.waits.insert(prompt.to_string(), (on.to_string(), calls));
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_of(&self, prompt: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|p| *p == prompt).count()
    }

    fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    fn answer(&self, prompt: &str) -> TaskOutcome {
        if let Some(error) = self.permanent.get(prompt) {
            return TaskOutcome::failed(error.clone());
        }
        let scripted = self
            .transient
            .lock()
            .unwrap()
            .get_mut(prompt)
            .and_then(|q| q.pop_front());
        match scripted {
            Some(error) => TaskOutcome::failed(error),
            None => TaskOutcome::succeeded(format!("answer to {prompt}")),
        }
    }
}

#[async_trait]
impl WorkerAdapter for ScriptedAdapter {
    fn ai_type(&self) -> AiType {
        self.ai_type
    }

    async fn execute_task(&self, _worker: &WorkerHandle, task: &Task) -> TaskOutcome {
        let prompt = task.prompts.join("\n");
        self.calls.lock().unwrap().push(prompt.clone());
        if let Some((on, count)) = self.waits.get(&prompt) {
            while self.calls_of(on) < *count {
                tokio::task::yield_now().await;
            }
        }
        let outcome = self.answer(&prompt);
        self.finished.lock().unwrap().push(prompt);
        outcome
    }

    async fn check_readiness(&self, _worker: &WorkerHandle) -> ReadinessReport {
        ReadinessReport {
            text_input: true,
            model_display: true,
            function_display: true,
        }
    }
}

/// Loses its first worker mid-task, then waits for the pool to replace it.
struct CrashingAdapter {
    host: OnceLock<Arc<StubHost>>,
    pool: OnceLock<Arc<WorkerPool>>,
    events: mpsc::Sender<HostEvent>,
    contexts: Mutex<Vec<ContextId>>,
}

#[async_trait]
impl WorkerAdapter for CrashingAdapter {
    fn ai_type(&self) -> AiType {
        AiType::Claude
    }

    async fn execute_task(&self, worker: &WorkerHandle, task: &Task) -> TaskOutcome {
        let first = {
            let mut contexts = self.contexts.lock().unwrap();
            contexts.push(worker.context);
            contexts.len() == 1
        };
        if !first {
            return TaskOutcome::succeeded(format!("answer to {}", task.prompts.join("\n")));
        }

        if let Some(host) = self.host.get() {
            host.kill(worker.context);
        }
        let _ = self
            .events
            .send(HostEvent::Terminated {
                context: worker.context,
            })
            .await;
        if let Some(pool) = self.pool.get() {
            while pool
                .occupant(worker.slot)
                .await
                .is_none_or(|h| h.context == worker.context)
            {
                tokio::task::yield_now().await;
            }
        }
        TaskOutcome::failed("page not ready")
    }

    async fn check_readiness(&self, _worker: &WorkerHandle) -> ReadinessReport {
        ReadinessReport {
            text_input: true,
            model_display: true,
            function_display: true,
        }
    }
}

struct StubReport;

#[async_trait]
impl SpecialExecutor for StubReport {
    async fn execute(&self, task: &Task) -> TaskOutcome {
        TaskOutcome::succeeded(format!("report for row {}", task.row + 1))
    }
}

/// Claude sheet: prompts in B, answers in C, work rows from row 9.
fn sheet(prompts: &[&str]) -> CellGrid {
    let mut rows = vec![vec![String::new(); 3]; 8];
    rows[1] = vec!["AI".into(), "Claude".into(), String::new()];
    rows[2] = vec!["menu".into(), "prompt".into(), "answer".into()];
    for prompt in prompts {
        rows.push(vec![String::new(), prompt.to_string(), String::new()]);
    }
    CellGrid::new(rows)
}

fn plan(prompts: &[&str]) -> Vec<Task> {
    let data = DataSource::new(sheet(prompts));
    let analysis = Analyzer::new(GeneratorConfig::default()).analyze(&data);
    TaskGenerator::new(data.grid(), &analysis).generate_all()
}

struct Harness {
    host: Arc<StubHost>,
    pool: Arc<WorkerPool>,
    clock: Arc<RecordingClock>,
    sink: Arc<MemorySink>,
    scheduler: BatchScheduler,
}

fn harness(adapter: Arc<dyn WorkerAdapter>) -> Harness {
    let host = Arc::new(StubHost::default());
    let clock = Arc::new(RecordingClock::new());
    let adapters = Arc::new(AdapterRegistry::new());
    adapters.register_sync(adapter);

    let pool = Arc::new(WorkerPool::new(
        host.clone(),
        adapters,
        clock.clone(),
        PoolConfig::default(),
    ));
    let engine = Arc::new(RetryEngine::new(
        RetryPolicy::default(),
        ErrorClassifier::default_rules(),
        clock.clone(),
    ));
    let sink = Arc::new(MemorySink::new());
    let scheduler = BatchScheduler::new(
        pool.clone(),
        engine,
        sink.clone(),
        clock.clone(),
        SchedulerConfig::default(),
    )
    .with_special_executor(Arc::new(StubReport));

    Harness {
        host,
        pool,
        clock,
        sink,
        scheduler,
    }
}

async fn run(harness: &Harness, tasks: Vec<Task>) -> RunReport {
    timeout(TEST_TIMEOUT, harness.scheduler.run(tasks))
        .await
        .expect("run timed out")
}

#[tokio::test]
async fn runs_all_batches_and_writes_answers() {
    let adapter = Arc::new(ScriptedAdapter::new(AiType::Claude));
    let h = harness(adapter.clone());
    let tasks = plan(&["Q1", "Q2", "Q3", "Q4"]);
    assert_eq!(tasks.len(), 4);

    let report = run(&h, tasks).await;

    assert_eq!(report.batches_completed, 2);
    assert_eq!(report.succeeded(), 4);
    assert!(!report.halted);
    assert_eq!(report.tasks_not_started, 0);
    assert_eq!(report.metrics.attempts, 4);

    assert_eq!(h.sink.value_at("C9").as_deref(), Some("answer to Q1"));
    assert_eq!(h.sink.value_at("C12").as_deref(), Some("answer to Q4"));
    let log = h.sink.value_at("A9").unwrap();
    assert!(log.contains("claude"), "log line: {log}");

    // Slots 0..2 for the first batch, slot 0 for the second.
    let slots: Vec<usize> = h.host.opened.lock().unwrap().iter().map(|(s, _)| s.index()).collect();
    assert_eq!(slots, vec![0, 1, 2, 0]);
    assert!(h.pool.active_slots().await.is_empty());
    // One inter-batch delay, nothing after the last batch.
    assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(2)]);
}

#[tokio::test]
async fn terminal_failure_halts_after_its_batch() {
    let adapter = Arc::new(
        ScriptedAdapter::new(AiType::Claude).failing("Q2", "send button not found"),
    );
    let h = harness(adapter.clone());
    let tasks = plan(&["Q1", "Q2", "Q3", "Q4", "Q5", "Q6", "Q7"]);

    let report = run(&h, tasks).await;

    assert!(report.halted);
    assert_eq!(report.batches_completed, 1);
    assert_eq!(report.tasks_not_started, 4);
    // The other tasks in the failing batch still ran to completion.
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);

    let failed = report.results.iter().find(|r| !r.succeeded()).unwrap();
    let failure = failed.failure.as_ref().unwrap();
    assert_eq!(failure.kind, ErrorKind::InterfaceElementMissing);
    assert_eq!(failure.attempts, 6);
    assert_eq!(failed.address.to_string(), "C10");

    let marker = h.sink.value_at("C10").unwrap();
    assert!(marker.starts_with("ERROR:"), "marker: {marker}");
    assert!(!adapter.calls().iter().any(|p| p == "Q4"));
    assert!(h.pool.active_slots().await.is_empty());
}

#[tokio::test]
async fn repeated_timing_errors_recreate_the_worker() {
    let adapter = Arc::new(ScriptedAdapter::new(AiType::Claude).flaky("Q1", &["timed out"; 5]));
    let h = harness(adapter.clone());

    let report = run(&h, plan(&["Q1"])).await;

    assert_eq!(report.succeeded(), 1);
    let result = &report.results[0];
    assert_eq!(result.attempts, 6);
    assert_eq!(result.tier_counts.heavy, 1);
    // Initial open plus one recreate, both in slot 0.
    assert_eq!(h.host.open_count(), 2);
    assert_eq!(h.sink.value_at("C9").as_deref(), Some("answer to Q1"));
    assert!(h.clock.sleeps().contains(&Duration::from_secs(300)));
}

#[tokio::test]
async fn special_tasks_skip_the_pool() {
    let adapter = Arc::new(ScriptedAdapter::new(AiType::Claude));
    let h = harness(adapter.clone());
    let mut tasks = plan(&["Q1", "Q2"]);
    tasks[1].ai_type = AiType::Report;

    let report = run(&h, tasks).await;

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.results[1].slot, None);
    assert_eq!(h.sink.value_at("C10").as_deref(), Some("report for row 10"));
    assert_eq!(h.host.open_count(), 1);
    assert_eq!(adapter.calls(), vec!["Q1".to_string()]);
}

#[tokio::test]
async fn missing_adapter_fails_terminally() {
    let adapter = Arc::new(ScriptedAdapter::new(AiType::Gemini));
    let h = harness(adapter);

    let report = run(&h, plan(&["Q1"])).await;

    assert!(report.halted);
    let failure = report.results[0].failure.as_ref().unwrap();
    assert_eq!(failure.kind, ErrorKind::Configuration);
    assert_eq!(failure.attempts, 0);
    assert!(failure.message.contains("claude"), "message: {}", failure.message);
    // Rejected before a worker was opened or any backoff was slept.
    assert_eq!(h.host.open_count(), 0);
    assert!(h.clock.sleeps().is_empty());
    assert_eq!(report.metrics.attempts, 0);
    assert!(h.sink.value_at("C9").unwrap().starts_with("ERROR: configuration"));
}

#[tokio::test]
async fn batch_waits_for_slow_tasks_before_halting() {
    let adapter = Arc::new(
        ScriptedAdapter::new(AiType::Claude)
            .failing("bad", "send button not found")
            .waiting("slow", "bad", 6),
    );
    let h = harness(adapter.clone());

    let report = run(&h, plan(&["slow", "bad", "ok", "later"])).await;

    assert!(report.halted);
    assert_eq!(report.tasks_not_started, 1);
    assert_eq!(report.results.len(), 3);
    assert!(report.results[0].succeeded());
    assert!(!report.results[1].succeeded());
    assert!(report.results[2].succeeded());
    // The slow task outlived every attempt of the failing one.
    assert_eq!(adapter.finished().last().map(String::as_str), Some("slow"));
    assert_eq!(h.sink.value_at("C9").as_deref(), Some("answer to slow"));
    assert!(!adapter.calls().iter().any(|p| p == "later"));
    assert!(h.pool.active_slots().await.is_empty());
}

#[tokio::test]
async fn task_adopts_worker_recovered_mid_attempt() {
    let (events, rx) = mpsc::channel(4);
    let adapter = Arc::new(CrashingAdapter {
        host: OnceLock::new(),
        pool: OnceLock::new(),
        events,
        contexts: Mutex::new(Vec::new()),
    });
    let h = harness(adapter.clone());
    let _ = adapter.host.set(h.host.clone());
    let _ = adapter.pool.set(h.pool.clone());
    let watcher = spawn_termination_watcher(h.pool.clone(), rx);

    let report = run(&h, plan(&["Q1"])).await;
    watcher.abort();

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.results[0].attempts, 2);
    // The retry ran on the recovered worker, not the dead one.
    assert_eq!(
        *adapter.contexts.lock().unwrap(),
        vec![ContextId(0), ContextId(1)]
    );
    // Recovery delay, then one lightweight backoff. No recreate of our own.
    assert_eq!(
        h.clock.sleeps(),
        vec![Duration::from_secs(3), Duration::from_secs(1)]
    );
    assert_eq!(h.host.open_count(), 2);
    assert_eq!(h.sink.value_at("C9").as_deref(), Some("answer to Q1"));
    assert!(h.pool.active_slots().await.is_empty());
}
