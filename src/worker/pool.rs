//! Worker pool: the slot table and the host protocol behind it.
//!
//! A slot holds at most one worker context. Assigning a slot first tears down
//! the current occupant and waits until the host confirms it is gone; only
//! then is the new context opened and polled until ready.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::PoolConfig;
use crate::error::WorkerError;
use crate::tasks::AiType;
use crate::worker::Slot;
use crate::worker::adapter::{AdapterRegistry, ReadinessReport};
use crate::worker::geometry::SlotRect;

/// Host-assigned identifier of one worker context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Events the host emits about contexts it manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// The context went away. Expected after `close`, unexpected otherwise.
    Terminated { context: ContextId },
}

/// Whatever actually creates worker contexts (browser windows, sessions, ...).
#[async_trait]
pub trait WorkerHost: Send + Sync {
    async fn open(
        &self,
        slot: Slot,
        ai_type: AiType,
        bounds: SlotRect,
    ) -> Result<ContextId, WorkerError>;

    async fn close(&self, context: ContextId) -> Result<(), WorkerError>;

    async fn is_alive(&self, context: ContextId) -> bool;

    /// True once the context has loaded and can accept input.
    async fn is_ready(&self, context: ContextId) -> bool;

    /// Reload the context in place.
    async fn reload(&self, context: ContextId) -> Result<(), WorkerError>;
}

/// A live worker occupying a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerHandle {
    pub slot: Slot,
    pub ai_type: AiType,
    pub context: ContextId,
    pub bounds: SlotRect,
}

/// Readiness probe result for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotReadiness {
    pub slot: Slot,
    pub ai_type: AiType,
    pub passed: bool,
    /// `None` when no adapter was registered or the probe timed out.
    pub report: Option<ReadinessReport>,
}

/// Owns the slot table for one run.
pub struct WorkerPool {
    host: Arc<dyn WorkerHost>,
    adapters: Arc<AdapterRegistry>,
    clock: Arc<dyn Clock>,
    config: PoolConfig,
    slots: Mutex<HashMap<Slot, WorkerHandle>>,
    /// Slots that already used their one automatic recovery.
    recovered: Mutex<HashSet<Slot>>,
}

impl WorkerPool {
    pub fn new(
        host: Arc<dyn WorkerHost>,
        adapters: Arc<AdapterRegistry>,
        clock: Arc<dyn Clock>,
        config: PoolConfig,
    ) -> Self {
        Self {
            host,
            adapters,
            clock,
            config,
            slots: Mutex::new(HashMap::new()),
            recovered: Mutex::new(HashSet::new()),
        }
    }

    pub fn adapters(&self) -> &Arc<AdapterRegistry> {
        &self.adapters
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Current occupant of `slot`.
    pub async fn occupant(&self, slot: Slot) -> Option<WorkerHandle> {
        self.slots.lock().await.get(&slot).copied()
    }

    pub async fn active_slots(&self) -> Vec<Slot> {
        let mut slots: Vec<_> = self.slots.lock().await.keys().copied().collect();
        slots.sort();
        slots
    }

    /// Open a worker of `ai_type` in `slot`, replacing any current occupant.
    pub async fn assign(&self, slot: Slot, ai_type: AiType) -> Result<WorkerHandle, WorkerError> {
        let previous = self.slots.lock().await.remove(&slot);
        if let Some(previous) = previous {
            tracing::debug!(%slot, context = %previous.context, "Closing previous occupant");
            self.teardown(&previous).await;
            self.await_release(slot, previous.context).await;
        }

        let bounds = self.config.display.slot_bounds(slot);
        let context = self
            .host
            .open(slot, ai_type, bounds)
            .await
            .map_err(|e| WorkerError::OpenFailed {
                slot,
                ai_type: ai_type.to_string(),
                reason: e.to_string(),
            })?;
        let handle = WorkerHandle {
            slot,
            ai_type,
            context,
            bounds,
        };
        self.slots.lock().await.insert(slot, handle);

        if let Err(e) = self.await_ready(&handle).await {
            self.release(slot).await;
            return Err(e);
        }

        tracing::info!(%slot, %ai_type, %context, "Worker assigned");
        Ok(handle)
    }

    /// Free `slot`. The table entry goes first so the teardown is never
    /// mistaken for an unexpected termination.
    pub async fn release(&self, slot: Slot) {
        let Some(handle) = self.slots.lock().await.remove(&slot) else {
            tracing::debug!(%slot, "Release of empty slot");
            return;
        };
        self.teardown(&handle).await;
        tracing::debug!(%slot, ai_type = %handle.ai_type, "Worker released");
    }

    /// Reload a worker in place and wait for it to become ready again.
    pub async fn refresh(&self, handle: &WorkerHandle) -> Result<(), WorkerError> {
        if self.occupant(handle.slot).await.map(|h| h.context) != Some(handle.context) {
            return Err(WorkerError::SlotEmpty { slot: handle.slot });
        }
        self.host
            .reload(handle.context)
            .await
            .map_err(|e| WorkerError::ReloadFailed {
                slot: handle.slot,
                reason: e.to_string(),
            })?;
        self.await_ready(handle).await?;
        tracing::info!(slot = %handle.slot, ai_type = %handle.ai_type, "Worker refreshed");
        Ok(())
    }

    /// Probe each worker through its AI type's adapter.
    pub async fn check_readiness(&self, handles: &[WorkerHandle]) -> Vec<SlotReadiness> {
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let report = match self.adapters.get(handle.ai_type).await {
                Some(adapter) => {
                    let check = adapter.check_readiness(handle);
                    tokio::time::timeout(self.config.probe_timeout, check).await.ok()
                }
                None => {
                    tracing::warn!(
                        slot = %handle.slot,
                        ai_type = %handle.ai_type,
                        "No adapter for readiness check"
                    );
                    None
                }
            };
            let passed = report.is_some_and(|r| r.is_ready());
            if !passed {
                tracing::warn!(
                    slot = %handle.slot,
                    ai_type = %handle.ai_type,
                    report = ?report,
                    "Readiness check failed"
                );
            }
            results.push(SlotReadiness {
                slot: handle.slot,
                ai_type: handle.ai_type,
                passed,
                report,
            });
        }
        results
    }

    /// React to a context that went away. Contexts no longer in the table were
    /// released on purpose and are ignored.
    ///
    /// Returns the replacement worker if a recovery was made.
    pub async fn handle_termination(
        &self,
        context: ContextId,
    ) -> Result<Option<WorkerHandle>, WorkerError> {
        let lost = {
            let mut slots = self.slots.lock().await;
            let slot = slots
                .iter()
                .find(|(_, h)| h.context == context)
                .map(|(slot, _)| *slot);
            slot.and_then(|slot| slots.remove(&slot))
        };
        let Some(lost) = lost else {
            tracing::debug!(%context, "Termination of released context");
            return Ok(None);
        };

        tracing::warn!(
            slot = %lost.slot,
            ai_type = %lost.ai_type,
            %context,
            "Worker terminated unexpectedly"
        );

        if !self.config.auto_recovery {
            return Ok(None);
        }
        if !self.recovered.lock().await.insert(lost.slot) {
            tracing::error!(
                slot = %lost.slot,
                ai_type = %lost.ai_type,
                "Worker terminated again after recovery; not recovering"
            );
            return Ok(None);
        }

        self.clock.sleep(self.config.recovery_delay).await;
        let handle = self.assign(lost.slot, lost.ai_type).await?;
        tracing::info!(slot = %lost.slot, ai_type = %lost.ai_type, "Worker recovered");
        Ok(Some(handle))
    }

    /// Close a worker's context. Failures are logged, never raised.
    async fn teardown(&self, handle: &WorkerHandle) {
        let closed = self
            .host
            .close(handle.context)
            .await
            .map_err(|e| WorkerError::TeardownFailed {
                slot: handle.slot,
                reason: e.to_string(),
            });
        if let Err(e) = closed {
            tracing::warn!(context = %handle.context, error = %e, "Worker teardown failed");
        }
    }

    async fn await_release(&self, slot: Slot, context: ContextId) {
        for _ in 0..self.config.settle_checks {
            if !self.host.is_alive(context).await {
                return;
            }
            self.clock.sleep(self.config.settle_interval).await;
        }
        tracing::warn!(%slot, %context, "Previous occupant still alive after settle window");
    }

    async fn await_ready(&self, handle: &WorkerHandle) -> Result<(), WorkerError> {
        for _ in 0..self.config.ready_checks {
            if self.host.is_ready(handle.context).await {
                return Ok(());
            }
            self.clock.sleep(self.config.ready_interval).await;
        }
        Err(WorkerError::NotReady {
            slot: handle.slot,
            attempts: self.config.ready_checks,
        })
    }
}

/// Feed host termination events into the pool until the channel closes.
pub fn spawn_termination_watcher(
    pool: Arc<WorkerPool>,
    mut events: mpsc::Receiver<HostEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                HostEvent::Terminated { context } => {
                    if let Err(e) = pool.handle_termination(context).await {
                        tracing::error!(%context, error = %e, "Worker recovery failed");
                    }
                }
            }
        }
        tracing::debug!("Termination watcher stopped");
    })
}
