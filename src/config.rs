//! Configuration types.
//!
//! Every knob has a default matching the documented behavior; `from_env`
//! applies `GRIDRUNNER_*` overrides on top.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::worker::DisplayArea;

/// Top-level run configuration.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub generator: GeneratorConfig,
    pub pool: PoolConfig,
    pub retry: RetryPolicy,
    pub scheduler: SchedulerConfig,
}

impl RunConfig {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<usize>("GRIDRUNNER_MIN_WORK_ROW")? {
            config.generator.min_work_row = v;
        }
        if let Some(v) = env_parse::<usize>("GRIDRUNNER_HEADER_SCAN_ROWS")? {
            config.generator.header_scan_rows = v;
        }
        if let Some(v) = env_parse::<usize>("GRIDRUNNER_ROW_DIRECTIVE_COLUMN")? {
            config.generator.row_directive_column = v;
        }
        if let Some(v) = env_parse::<bool>("GRIDRUNNER_AUTO_RECOVERY")? {
            config.pool.auto_recovery = v;
        }
        if let Some(v) = env_parse::<u64>("GRIDRUNNER_INTER_BATCH_DELAY_MS")? {
            config.scheduler.inter_batch_delay = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<usize>("GRIDRUNNER_BATCH_SIZE")? {
            if v == 0 || v > crate::worker::SLOT_COUNT {
                return Err(ConfigError::InvalidValue {
                    key: "GRIDRUNNER_BATCH_SIZE".into(),
                    message: format!("must be between 1 and {}", crate::worker::SLOT_COUNT),
                });
            }
            config.scheduler.batch_size = v;
        }
        if let Some(raw) = env_var("GRIDRUNNER_DISPLAY") {
            config.pool.display = parse_display(&raw)?;
        }

        Ok(config)
    }
}

/// Grid analysis and task generation settings.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// How many leading rows hold headers and column directives.
    pub header_scan_rows: usize,
    /// Work rows never start before this row index.
    pub min_work_row: usize,
    /// Column scanned for row directives.
    pub row_directive_column: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            header_scan_rows: 10,
            min_work_row: 8,
            row_directive_column: 0,
        }
    }
}

/// Worker pool timings and geometry.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Usable area of the primary display.
    pub display: DisplayArea,
    /// Interval between release-confirmation checks.
    pub settle_interval: Duration,
    /// Release-confirmation checks before giving up on a slot's old occupant.
    pub settle_checks: u32,
    /// Readiness polls after opening a worker.
    pub ready_checks: u32,
    pub ready_interval: Duration,
    /// Bound on one readiness round-trip.
    pub probe_timeout: Duration,
    /// Delay before recreating a worker that terminated unexpectedly.
    pub recovery_delay: Duration,
    pub auto_recovery: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            display: DisplayArea::default(),
            settle_interval: Duration::from_millis(500),
            settle_checks: 10,
            ready_checks: 30,
            ready_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(10),
            recovery_delay: Duration::from_secs(3),
            auto_recovery: true,
        }
    }
}

/// Batch scheduling settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            inter_batch_delay: Duration::from_secs(2),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
}

/// Parse `WIDTHxHEIGHT` or `WIDTHxHEIGHT+X+Y`.
fn parse_display(raw: &str) -> Result<DisplayArea, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: "GRIDRUNNER_DISPLAY".into(),
        message: format!("expected WIDTHxHEIGHT[+X+Y], got {raw:?}"),
    };
    let mut parts = raw.trim().split('+');
    let size = parts.next().ok_or_else(invalid)?;
    let (w, h) = size.split_once(['x', 'X']).ok_or_else(invalid)?;
    let width = w.parse().map_err(|_| invalid())?;
    let height = h.parse().map_err(|_| invalid())?;
    let x = parts.next().map(str::parse).transpose().map_err(|_| invalid())?;
    let y = parts.next().map(str::parse).transpose().map_err(|_| invalid())?;
    Ok(DisplayArea {
        x: x.unwrap_or(0),
        y: y.unwrap_or(0),
        width,
        height,
    })
}
