//! Worker system: fixed pool of positional AI worker contexts.
//!
//! Core components:
//! - `geometry`: display area and per-slot quadrant bounds
//! - `adapter`: per-AI-type adapters and their registry
//! - `pool`: slot table, close-before-reopen assignment, termination recovery

pub mod adapter;
pub mod geometry;
pub mod pool;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use adapter::{AdapterRegistry, ReadinessReport, SpecialExecutor, TaskOutcome, WorkerAdapter};
pub use geometry::{DisplayArea, SlotRect};
pub use pool::{
    ContextId, HostEvent, SlotReadiness, WorkerHandle, WorkerHost, WorkerPool,
    spawn_termination_watcher,
};

/// Number of worker slots.
pub const SLOT_COUNT: usize = 4;

/// One of the four positional worker slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Slot(u8);

impl Slot {
    pub const ALL: [Slot; SLOT_COUNT] = [Slot(0), Slot(1), Slot(2), Slot(3)];

    pub fn new(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Screen quadrant name.
    pub fn quadrant(&self) -> &'static str {
        match self.0 {
            0 => "top-left",
            1 => "top-right",
            2 => "bottom-left",
            _ => "bottom-right",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.quadrant())
    }
}
