//! Result sink: where answers and log lines are written back to the grid.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SinkError;
use crate::grid::CellAddress;

/// One cell value to write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellWrite {
    pub address: CellAddress,
    pub value: String,
}

impl CellWrite {
    pub fn new(address: CellAddress, value: impl Into<String>) -> Self {
        Self {
            address,
            value: value.into(),
        }
    }
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn write(&self, writes: Vec<CellWrite>) -> Result<(), SinkError>;
}

/// Keeps every write in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    writes: Mutex<Vec<CellWrite>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<CellWrite> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Latest value written to `address`, rendered like `B6`.
    pub fn value_at(&self, address: &str) -> Option<String> {
        self.writes()
            .into_iter()
            .rev()
            .find(|w| w.address.to_string() == address)
            .map(|w| w.value)
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn write(&self, writes: Vec<CellWrite>) -> Result<(), SinkError> {
        let mut stored = self
            .writes
            .lock()
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        stored.extend(writes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_sink_keeps_latest_value() {
        let sink = MemorySink::new();
        sink.write(vec![CellWrite::new(CellAddress::new(5, 1), "first")])
            .await
            .unwrap();
        sink.write(vec![
            CellWrite::new(CellAddress::new(5, 1), "second"),
            CellWrite::new(CellAddress::new(5, 0), "log"),
        ])
        .await
        .unwrap();

        assert_eq!(sink.value_at("B6").as_deref(), Some("second"));
        assert_eq!(sink.value_at("A6").as_deref(), Some("log"));
        assert_eq!(sink.value_at("C6"), None);
        assert_eq!(sink.writes().len(), 3);
    }
}
