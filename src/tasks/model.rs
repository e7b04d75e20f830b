//! Task and AI type definitions.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::grid::{CellAddress, GroupType};

/// Wait bound for an ordinary response.
pub const NORMAL_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Wait bound for heavy-compute modes (deep research, agent runs).
pub const HEAVY_RESPONSE_TIMEOUT: Duration = Duration::from_secs(40 * 60);

/// Function names that run long enough to need the heavy wait bound.
const HEAVY_FUNCTIONS: &[&str] = &[
    "deep research",
    "ディープリサーチ",
    "agent",
    "エージェント",
];

/// AI services a task can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiType {
    #[default]
    ChatGpt,
    Claude,
    Gemini,
    Genspark,
    /// Non-AI special operation, handled by the special executor.
    Report,
}

impl AiType {
    pub const ALL: [AiType; 5] = [
        AiType::ChatGpt,
        AiType::Claude,
        AiType::Gemini,
        AiType::Genspark,
        AiType::Report,
    ];

    /// Parse a free-form label ("Claude", "ChatGPT-4o", "レポート化").
    pub fn from_label(label: &str) -> Option<Self> {
        let lowered = label.trim().to_lowercase();
        if lowered.is_empty() {
            return None;
        }
        if lowered.contains("chatgpt") || lowered.contains("gpt") || lowered.contains("openai") {
            Some(Self::ChatGpt)
        } else if lowered.contains("claude") {
            Some(Self::Claude)
        } else if lowered.contains("gemini") {
            Some(Self::Gemini)
        } else if lowered.contains("genspark") {
            Some(Self::Genspark)
        } else if lowered.contains("report") || lowered.contains("レポート") {
            Some(Self::Report)
        } else {
            None
        }
    }

    /// Special operations bypass the worker pool.
    pub fn is_special(&self) -> bool {
        matches!(self, Self::Report)
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::ChatGpt => "gpt-4o",
            Self::Claude => "claude-sonnet",
            Self::Gemini => "gemini-2.5-pro",
            Self::Genspark => "genspark-default",
            Self::Report => "",
        }
    }

    pub fn default_function(&self) -> &'static str {
        match self {
            Self::Genspark => "slides",
            _ => "none",
        }
    }
}

impl fmt::Display for AiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ChatGpt => "chatgpt",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Genspark => "genspark",
            Self::Report => "report",
        };
        write!(f, "{s}")
    }
}

/// A unit of work: one answer cell to fill.
///
/// Tasks are created by the generator and never mutated afterwards; outcomes
/// are tracked separately, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: Uuid,
    pub row: usize,
    /// Answer column.
    pub column: usize,
    pub prompt_columns: Vec<usize>,
    /// Raw prompt cell values for this row, in column order.
    pub prompts: Vec<String>,
    pub ai_type: AiType,
    pub model: String,
    pub function: String,
    pub log_columns: Vec<usize>,
    /// Index of the prompt group this task came from.
    pub group_index: usize,
    /// Shared by all variants of one multi-variant row.
    pub group_id: Uuid,
    pub group_type: GroupType,
    pub group_position: Option<usize>,
    pub sequence_order: usize,
    pub dependencies: Vec<usize>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn answer_address(&self) -> CellAddress {
        CellAddress::new(self.row, self.column)
    }

    pub fn log_addresses(&self) -> Vec<CellAddress> {
        self.log_columns
            .iter()
            .map(|&c| CellAddress::new(self.row, c))
            .collect()
    }

    pub fn is_special(&self) -> bool {
        self.ai_type.is_special()
    }

    pub fn is_heavy_compute(&self) -> bool {
        let function = self.function.to_lowercase();
        HEAVY_FUNCTIONS.iter().any(|f| function.contains(f))
    }

    /// How long to wait for this task's response before calling it a failure.
    pub fn response_timeout(&self) -> Duration {
        if self.is_heavy_compute() {
            HEAVY_RESPONSE_TIMEOUT
        } else {
            NORMAL_RESPONSE_TIMEOUT
        }
    }
}
