//! Operational counters and tunables for the mining loop.
//!
//! One structure, atomic fields, exposed to the monitoring collaborator as a
//! read-only [`MetricsSnapshot`]. Writable knobs silently reject out-of-range
//! values so a bad remote write cannot destabilize the loop.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use redomine_core::Scn;
use serde::Serialize;
use tracing::debug;

pub const MAX_BATCH_SPAN_RANGE: RangeInclusive<u64> = 100..=10_000;
pub const SLEEP_MS_RANGE: RangeInclusive<u64> = 10..=2_000;
pub const LOW_WATER_MARK_RANGE: RangeInclusive<u64> = 50..=200;

pub const DEFAULT_MAX_BATCH_SPAN: u64 = 2_000;
pub const DEFAULT_SLEEP_MS: u64 = 500;
pub const DEFAULT_LOW_WATER_MARK: u64 = 50;

#[derive(Debug, Default)]
struct DurationTracker {
    last_micros: AtomicU64,
    total_micros: AtomicU64,
    count: AtomicU64,
}

impl DurationTracker {
    fn record(&self, d: Duration) {
        let micros = d.as_micros() as u64;
        self.last_micros.store(micros, Ordering::Relaxed);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn last_ms(&self) -> u64 {
        self.last_micros.load(Ordering::Relaxed) / 1_000
    }

    fn average_ms(&self) -> u64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            0
        } else {
            self.total_micros.load(Ordering::Relaxed) / count / 1_000
        }
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Live metrics for one mining loop.
#[derive(Debug)]
pub struct MinerMetrics {
    current_scn: AtomicU64,
    captured_rows: AtomicU64,
    switch_count: AtomicU64,
    reconnect_count: AtomicU64,
    query: DurationTracker,
    batch: DurationTracker,
    current_log_file: Mutex<String>,
    log_status: Mutex<Vec<(String, String)>>,
    max_batch_span: AtomicU64,
    sleep_ms: AtomicU64,
    low_water_mark: AtomicU64,
}

impl Default for MinerMetrics {
    fn default() -> Self {
        Self {
            current_scn: AtomicU64::new(0),
            captured_rows: AtomicU64::new(0),
            switch_count: AtomicU64::new(0),
            reconnect_count: AtomicU64::new(0),
            query: DurationTracker::default(),
            batch: DurationTracker::default(),
            current_log_file: Mutex::new(String::new()),
            log_status: Mutex::new(Vec::new()),
            max_batch_span: AtomicU64::new(DEFAULT_MAX_BATCH_SPAN),
            sleep_ms: AtomicU64::new(DEFAULT_SLEEP_MS),
            low_water_mark: AtomicU64::new(DEFAULT_LOW_WATER_MARK),
        }
    }
}

impl MinerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_current_scn(&self, scn: Scn) {
        self.current_scn.store(scn.as_u64(), Ordering::Relaxed);
    }

    pub fn add_captured_rows(&self, count: u64) {
        self.captured_rows.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_switch(&self) {
        self.switch_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_duration(&self, d: Duration) {
        self.query.record(d);
    }

    pub fn record_batch_duration(&self, d: Duration) {
        self.batch.record(d);
    }

    pub fn set_current_log_file(&self, name: &str) {
        *self.current_log_file.lock().expect("metrics lock poisoned") = name.to_string();
    }

    pub fn set_log_status(&self, status: Vec<(String, String)>) {
        *self.log_status.lock().expect("metrics lock poisoned") = status;
    }

    // Tunable knobs. Out-of-range writes are dropped, not clamped.

    pub fn max_batch_span(&self) -> u64 {
        self.max_batch_span.load(Ordering::Relaxed)
    }

    pub fn set_max_batch_span(&self, span: u64) {
        if MAX_BATCH_SPAN_RANGE.contains(&span) {
            self.max_batch_span.store(span, Ordering::Relaxed);
        } else {
            debug!(span, "ignoring out-of-range max batch span");
        }
    }

    pub fn sleep_ms(&self) -> u64 {
        self.sleep_ms.load(Ordering::Relaxed)
    }

    pub fn set_sleep_ms(&self, ms: u64) {
        if SLEEP_MS_RANGE.contains(&ms) {
            self.sleep_ms.store(ms, Ordering::Relaxed);
        } else {
            debug!(ms, "ignoring out-of-range sleep interval");
        }
    }

    pub fn low_water_mark(&self) -> u64 {
        self.low_water_mark.load(Ordering::Relaxed)
    }

    pub fn set_low_water_mark(&self, rows: u64) {
        if LOW_WATER_MARK_RANGE.contains(&rows) {
            self.low_water_mark.store(rows, Ordering::Relaxed);
        } else {
            debug!(rows, "ignoring out-of-range low-water mark");
        }
    }

    /// Read-only view for the monitoring collaborator.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            current_scn: Scn(self.current_scn.load(Ordering::Relaxed)),
            current_log_file: self
                .current_log_file
                .lock()
                .expect("metrics lock poisoned")
                .clone(),
            log_status: self.log_status.lock().expect("metrics lock poisoned").clone(),
            captured_rows: self.captured_rows.load(Ordering::Relaxed),
            switch_count: self.switch_count.load(Ordering::Relaxed),
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
            query_count: self.query.count(),
            last_query_ms: self.query.last_ms(),
            average_query_ms: self.query.average_ms(),
            batch_count: self.batch.count(),
            last_batch_ms: self.batch.last_ms(),
            average_batch_ms: self.batch.average_ms(),
            max_batch_span: self.max_batch_span(),
            sleep_ms: self.sleep_ms(),
            low_water_mark: self.low_water_mark(),
        }
    }
}

/// A consistent-enough copy of the metrics for external monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub current_scn: Scn,
    pub current_log_file: String,
    pub log_status: Vec<(String, String)>,
    pub captured_rows: u64,
    pub switch_count: u64,
    pub reconnect_count: u64,
    pub query_count: u64,
    pub last_query_ms: u64,
    pub average_query_ms: u64,
    pub batch_count: u64,
    pub last_batch_ms: u64,
    pub average_batch_ms: u64,
    pub max_batch_span: u64,
    pub sleep_ms: u64,
    pub low_water_mark: u64,
}
