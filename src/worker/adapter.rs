//! AI-type adapters and the registry that routes tasks to them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::tasks::{AiType, Task};
use crate::worker::pool::WorkerHandle;

/// Result of one execution through an adapter or special executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    pub response: Option<String>,
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn succeeded(response: impl Into<String>) -> Self {
        Self {
            success: true,
            response: Some(response.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(error.into()),
        }
    }

    /// Response on success, error message otherwise.
    pub fn into_result(self) -> Result<String, String> {
        if self.success {
            Ok(self.response.unwrap_or_default())
        } else {
            Err(self
                .error
                .unwrap_or_else(|| "execution failed without an error message".to_string()))
        }
    }
}

/// What a readiness probe found in a worker's interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub text_input: bool,
    pub model_display: bool,
    pub function_display: bool,
}

impl ReadinessReport {
    pub fn is_ready(&self) -> bool {
        self.text_input && self.model_display && self.function_display
    }
}

/// Drives one AI service's interface inside a worker context.
#[async_trait]
pub trait WorkerAdapter: Send + Sync {
    fn ai_type(&self) -> AiType;

    /// Submit the task's prompts and wait for the response.
    async fn execute_task(&self, worker: &WorkerHandle, task: &Task) -> TaskOutcome;

    async fn check_readiness(&self, worker: &WorkerHandle) -> ReadinessReport;
}

/// Runs non-AI special operations; needs no worker.
#[async_trait]
pub trait SpecialExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> TaskOutcome;
}

/// Registry of adapters keyed by AI type.
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<AiType, Arc<dyn WorkerAdapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
        }
    }

    /// Register an adapter, replacing any previous one for the same AI type.
    pub async fn register(&self, adapter: Arc<dyn WorkerAdapter>) {
        let ai_type = adapter.ai_type();
        if ai_type.is_special() {
            tracing::warn!(%ai_type, "Rejected adapter registration for a special operation");
            return;
        }
        self.adapters.write().await.insert(ai_type, adapter);
        tracing::debug!(%ai_type, "Registered adapter");
    }

    /// Register an adapter (sync version for startup).
    pub fn register_sync(&self, adapter: Arc<dyn WorkerAdapter>) {
        let ai_type = adapter.ai_type();
        if ai_type.is_special() {
            tracing::warn!(%ai_type, "Rejected adapter registration for a special operation");
            return;
        }
        if let Ok(mut adapters) = self.adapters.try_write() {
            adapters.insert(ai_type, adapter);
            tracing::debug!(%ai_type, "Registered adapter");
        }
    }

    pub async fn get(&self, ai_type: AiType) -> Option<Arc<dyn WorkerAdapter>> {
        self.adapters.read().await.get(&ai_type).cloned()
    }

    pub async fn has(&self, ai_type: AiType) -> bool {
        self.adapters.read().await.contains_key(&ai_type)
    }

    pub async fn ai_types(&self) -> Vec<AiType> {
        let mut types: Vec<_> = self.adapters.read().await.keys().copied().collect();
        types.sort_by_key(|t| t.to_string());
        types
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
