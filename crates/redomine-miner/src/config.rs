//! Configuration for the mining loop.

use std::time::Duration;

use redomine_core::{Scn, TableId};
use serde::Deserialize;

use crate::error::{MinerError, MinerResult};
use crate::metrics::{
    MinerMetrics, DEFAULT_LOW_WATER_MARK, DEFAULT_MAX_BATCH_SPAN, DEFAULT_SLEEP_MS,
    LOW_WATER_MARK_RANGE, MAX_BATCH_SPAN_RANGE, SLEEP_MS_RANGE,
};

/// Static configuration for one mining loop. The three tunables are seeded
/// into [`MinerMetrics`] at startup and stay adjustable at runtime through
/// the metrics knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    /// Position to mine from when the offset store has no resume position.
    #[serde(default)]
    pub start_scn: Scn,
    /// Tables to enable per-table log detail capture for.
    #[serde(default)]
    pub tables: Vec<TableId>,
    /// Maximum SCN span of one mining window.
    #[serde(default = "default_max_batch_span")]
    pub max_batch_span: u64,
    /// Sleep between polls when the source is quiet, in milliseconds.
    #[serde(default = "default_sleep_ms")]
    pub sleep_ms: u64,
    /// Fetch sizes below this trigger the inter-poll sleep.
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: u64,
    /// Upper bound on any single call against the source, in seconds.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    /// Delay before reopening a session after a connectivity failure, in
    /// milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

fn default_max_batch_span() -> u64 {
    DEFAULT_MAX_BATCH_SPAN
}

fn default_sleep_ms() -> u64 {
    DEFAULT_SLEEP_MS
}

fn default_low_water_mark() -> u64 {
    DEFAULT_LOW_WATER_MARK
}

fn default_operation_timeout_secs() -> u64 {
    30
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            start_scn: Scn::ZERO,
            tables: Vec::new(),
            max_batch_span: default_max_batch_span(),
            sleep_ms: default_sleep_ms(),
            low_water_mark: default_low_water_mark(),
            operation_timeout_secs: default_operation_timeout_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl MinerConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn validate(&self) -> MinerResult<()> {
        if !MAX_BATCH_SPAN_RANGE.contains(&self.max_batch_span) {
            return Err(MinerError::Config(format!(
                "max_batch_span {} outside {MAX_BATCH_SPAN_RANGE:?}",
                self.max_batch_span
            )));
        }
        if !SLEEP_MS_RANGE.contains(&self.sleep_ms) {
            return Err(MinerError::Config(format!(
                "sleep_ms {} outside {SLEEP_MS_RANGE:?}",
                self.sleep_ms
            )));
        }
        if !LOW_WATER_MARK_RANGE.contains(&self.low_water_mark) {
            return Err(MinerError::Config(format!(
                "low_water_mark {} outside {LOW_WATER_MARK_RANGE:?}",
                self.low_water_mark
            )));
        }
        if self.operation_timeout_secs == 0 {
            return Err(MinerError::Config(
                "operation_timeout_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn seed_metrics(&self, metrics: &MinerMetrics) {
        metrics.set_max_batch_span(self.max_batch_span);
        metrics.set_sleep_ms(self.sleep_ms);
        metrics.set_low_water_mark(self.low_water_mark);
    }
}
