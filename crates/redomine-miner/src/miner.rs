//! The mining loop: drives sessions against the source's log-mining facility
//! and turns captured rows into committed, commit-ordered change events.
//!
//! Two nested loops. The outer loop owns reconnection: any connectivity-level
//! fault tears the session down and opens a new one, resuming from the
//! persisted position. The inner loop advances the SCN window, watches for
//! log rotation, and feeds fetched rows through the result processor.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use redomine_core::{SchemaCatalog, Scn, TransactionBuffer};
use tracing::{debug, error, info, warn};

use crate::config::MinerConfig;
use crate::dispatch::{ChangeDispatcher, OffsetStore};
use crate::error::{MinerError, MinerResult, SourceError};
use crate::logfiles::{abandonment_watermark, LogFile, LogFileSet};
use crate::metrics::MinerMetrics;
use crate::processor::ResultProcessor;
use crate::session::{MiningSession, SourceConnector};
use crate::window;

/// The orchestrator. Owns the transaction buffer and metrics; everything
/// else is a collaborator reached through a trait.
pub struct LogMiner {
    connector: Box<dyn SourceConnector>,
    catalog: Box<dyn SchemaCatalog>,
    dispatcher: Box<dyn ChangeDispatcher>,
    offsets: Box<dyn OffsetStore>,
    buffer: TransactionBuffer,
    metrics: Arc<MinerMetrics>,
    config: MinerConfig,
    running: Arc<AtomicBool>,
    /// Persisted resume position: never advances while transactions are open.
    resume_scn: Scn,
    /// End of the last mined window: advances every iteration regardless.
    last_processed: Scn,
}

impl LogMiner {
    pub fn new(
        connector: Box<dyn SourceConnector>,
        catalog: Box<dyn SchemaCatalog>,
        dispatcher: Box<dyn ChangeDispatcher>,
        offsets: Box<dyn OffsetStore>,
        config: MinerConfig,
    ) -> Self {
        Self {
            connector,
            catalog,
            dispatcher,
            offsets,
            buffer: TransactionBuffer::new(),
            metrics: Arc::new(MinerMetrics::new()),
            config,
            running: Arc::new(AtomicBool::new(true)),
            resume_scn: Scn::ZERO,
            last_processed: Scn::ZERO,
        }
    }

    /// Shared handle to the live metrics, for the monitoring collaborator.
    pub fn metrics(&self) -> Arc<MinerMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn buffer(&self) -> &TransactionBuffer {
        &self.buffer
    }

    /// Flag checked at the top of both loops and around sleeps; clear it to
    /// stop the miner. Open transactions stay buffered in memory and are
    /// re-derived from the persisted position on restart.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Run until stopped or a fatal error. Transient connectivity failures
    /// reconnect and resume indefinitely; anything unclassified terminates
    /// the task, because correctness past an unknown failure cannot be
    /// guaranteed.
    pub async fn run(&mut self) -> MinerResult<()> {
        self.config.validate()?;
        self.config.seed_metrics(&self.metrics);

        self.resume_scn = self
            .offsets
            .load()
            .await
            .map_err(|e| MinerError::Offset(e.to_string()))?
            .unwrap_or(self.config.start_scn);
        self.last_processed = self.resume_scn;
        info!(resume = %self.resume_scn, "starting log mining");

        while self.is_running() {
            let session = match self.op(self.connector.connect()).await {
                Ok(session) => session,
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "cannot reach source, retrying");
                    self.metrics.record_reconnect();
                    self.pause(self.config.reconnect_delay()).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match self.mine(session.as_ref()).await {
                Ok(()) => {
                    // Clean shutdown requested.
                    if let Err(e) = self.op(session.end_mining()).await {
                        debug!(error = %e, "could not end mining session on shutdown");
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "connection to source lost, reconnecting");
                    self.metrics.record_reconnect();
                    self.pause(self.config.reconnect_delay()).await;
                }
                Err(e) => {
                    error!(error = %e, "mining stopped on unrecoverable error");
                    return Err(e);
                }
            }
        }

        info!(
            resume = %self.resume_scn,
            last_processed = %self.last_processed,
            buffer = ?self.buffer.stats(),
            "log mining stopped"
        );
        Ok(())
    }

    /// One session's worth of mining. Returns `Ok` only when the running
    /// flag was cleared.
    async fn mine(&mut self, session: &dyn MiningSession) -> MinerResult<()> {
        let online = self.op(session.online_log_files()).await?;
        let oldest_retained = online.iter().map(|f| f.first_change).min();
        match oldest_retained {
            Some(oldest) if oldest <= self.resume_scn => {}
            _ => {
                return Err(MinerError::OffsetOutOfRange {
                    resume: self.resume_scn,
                })
            }
        }
        self.metrics.set_log_status(log_status(&online));

        self.op(session.enable_table_logging(&self.config.tables))
            .await?;

        let mut files = LogFileSet::new();
        self.reconcile(session, &mut files, self.last_processed)
            .await?;

        let mut current_file = self.op(session.current_log_file()).await?;
        self.metrics.set_current_log_file(&current_file);

        while self.is_running() {
            let mut window_end = self
                .op(window::next_window_end(
                    session,
                    self.last_processed,
                    &self.metrics,
                ))
                .await?;

            let active = self.op(session.current_log_file()).await?;
            if active != current_file {
                self.handle_rotation(session, &mut files, &current_file, &active)
                    .await?;
                current_file = active;
                window_end = self
                    .op(window::next_window_end(
                        session,
                        self.last_processed,
                        &self.metrics,
                    ))
                    .await?;
            }

            self.op(session.start_mining(self.last_processed, window_end))
                .await?;

            let started = Instant::now();
            let rows = self
                .op(session.fetch(self.last_processed, window_end))
                .await?;
            self.metrics.record_query_duration(started.elapsed());

            let started = Instant::now();
            let seen = {
                let processor = ResultProcessor::new(
                    self.catalog.as_ref(),
                    &self.buffer,
                    self.dispatcher.as_ref(),
                    &self.metrics,
                );
                processor.process(rows).await?
            };
            self.metrics.record_batch_duration(started.elapsed());

            if (seen as u64) < self.metrics.low_water_mark() {
                self.pause(Duration::from_millis(self.metrics.sleep_ms()))
                    .await;
            }

            // Advance the persisted position only when nothing is buffered;
            // an open transaction's earlier rows must stay re-derivable
            // after a restart.
            if self.buffer.is_empty() {
                self.advance_resume(window_end).await?;
            }
            self.last_processed = window_end;
        }

        Ok(())
    }

    /// The active log file changed under us: the session would silently stop
    /// returning rows past the old file, so tear it down, rebuild the file
    /// set, and abandon transactions the remaining files cannot reconstruct.
    async fn handle_rotation(
        &mut self,
        session: &dyn MiningSession,
        files: &mut LogFileSet,
        from_file: &str,
        to_file: &str,
    ) -> MinerResult<()> {
        info!(from = from_file, to = to_file, "log switch detected, restarting mining session");
        self.metrics.record_switch();

        if let Err(e) = self.op(session.end_mining()).await {
            debug!(error = %e, "could not end mining session after log switch");
        }
        files.clear();

        let online = self.op(session.online_log_files()).await?;
        if let Some(watermark) = abandonment_watermark(&online, self.resume_scn) {
            let abandoned = self.buffer.abandon_older_than(watermark);
            if !abandoned.is_empty() {
                warn!(
                    count = abandoned.len(),
                    %watermark,
                    "abandoned transactions that aged out of retained logs"
                );
            }
            self.advance_resume(watermark).await?;
        }
        self.metrics.set_log_status(log_status(&online));

        self.reconcile(session, files, self.last_processed).await?;
        self.metrics.set_current_log_file(to_file);
        Ok(())
    }

    async fn reconcile(
        &self,
        session: &dyn MiningSession,
        files: &mut LogFileSet,
        window_start: Scn,
    ) -> MinerResult<()> {
        let reconciled = match tokio::time::timeout(
            self.config.operation_timeout(),
            files.reconcile(session, window_start),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(SourceError::timeout("log file reconciliation timed out").into())
            }
        };
        if !reconciled.added.is_empty() || !reconciled.removed.is_empty() {
            debug!(
                added = ?reconciled.added,
                removed = ?reconciled.removed,
                "reconciled mining file set"
            );
        }
        Ok(())
    }

    /// Move the persisted resume position forward, never backward.
    async fn advance_resume(&mut self, to: Scn) -> MinerResult<()> {
        let next = self.resume_scn.max(to);
        if next != self.resume_scn {
            self.resume_scn = next;
            self.offsets
                .store(next)
                .await
                .map_err(|e| MinerError::Offset(e.to_string()))?;
        }
        Ok(())
    }

    /// Bound a single source call so a hung connection cannot wedge the loop.
    async fn op<T>(
        &self,
        fut: impl Future<Output = Result<T, SourceError>>,
    ) -> Result<T, SourceError> {
        match tokio::time::timeout(self.config.operation_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::timeout("source call exceeded operation timeout")),
        }
    }

    /// Sleep in small slices so shutdown is not delayed by a long interval.
    async fn pause(&self, duration: Duration) {
        let mut remaining = duration;
        while self.is_running() && !remaining.is_zero() {
            let slice = remaining.min(Duration::from_millis(100));
            tokio::time::sleep(slice).await;
            remaining = remaining.saturating_sub(slice);
        }
    }
}

fn log_status(online: &[LogFile]) -> Vec<(String, String)> {
    online
        .iter()
        .map(|f| (f.name.clone(), f.status().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use redomine_core::{
        Column, ColumnType, MemoryCatalog, Operation, TableId, TableSchema, Value,
    };

    use crate::dispatch::{ChangeEvent, DispatchError, OffsetError};
    use crate::error::SourceErrorKind;
    use crate::session::{LogRow, RowKind};

    #[derive(Debug, Default)]
    struct FakeState {
        current_scn: u64,
        current_file: String,
        online: Vec<LogFile>,
        pending_rows: Vec<LogRow>,
        fail_next_fetch: Option<SourceErrorKind>,
        fail_next_connect: Option<SourceErrorKind>,
        connects: usize,
        fetches: usize,
        end_mining_calls: usize,
        added: Vec<String>,
        removed: Vec<String>,
    }

    #[derive(Clone)]
    struct FakeSource {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeSource {
        fn new(state: FakeState) -> Self {
            Self {
                state: Arc::new(Mutex::new(state)),
            }
        }
    }

    #[async_trait]
    impl SourceConnector for FakeSource {
        async fn connect(&self) -> Result<Box<dyn MiningSession>, SourceError> {
            let mut state = self.state.lock().unwrap();
            if let Some(kind) = state.fail_next_connect.take() {
                return Err(SourceError::new(kind, "injected connect failure"));
            }
            state.connects += 1;
            Ok(Box::new(FakeSource {
                state: Arc::clone(&self.state),
            }))
        }
    }

    #[async_trait]
    impl MiningSession for FakeSource {
        async fn current_scn(&self) -> Result<Scn, SourceError> {
            Ok(Scn(self.state.lock().unwrap().current_scn))
        }

        async fn current_log_file(&self) -> Result<String, SourceError> {
            Ok(self.state.lock().unwrap().current_file.clone())
        }

        async fn online_log_files(&self) -> Result<Vec<LogFile>, SourceError> {
            Ok(self.state.lock().unwrap().online.clone())
        }

        async fn add_log_file(&self, name: &str) -> Result<(), SourceError> {
            self.state.lock().unwrap().added.push(name.to_string());
            Ok(())
        }

        async fn remove_log_file(&self, name: &str) -> Result<(), SourceError> {
            self.state.lock().unwrap().removed.push(name.to_string());
            Ok(())
        }

        async fn start_mining(&self, _from: Scn, _to: Scn) -> Result<(), SourceError> {
            Ok(())
        }

        async fn end_mining(&self) -> Result<(), SourceError> {
            self.state.lock().unwrap().end_mining_calls += 1;
            Ok(())
        }

        async fn fetch(&self, from: Scn, to: Scn) -> Result<Vec<LogRow>, SourceError> {
            let mut state = self.state.lock().unwrap();
            state.fetches += 1;
            if let Some(kind) = state.fail_next_fetch.take() {
                return Err(SourceError::new(kind, "injected fetch failure"));
            }
            let (mine, keep): (Vec<LogRow>, Vec<LogRow>) = state
                .pending_rows
                .drain(..)
                .partition(|r| r.scn >= from && r.scn < to);
            state.pending_rows = keep;
            Ok(mine)
        }

        async fn enable_table_logging(&self, _tables: &[TableId]) -> Result<(), SourceError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingDispatcher {
        events: Mutex<Vec<ChangeEvent>>,
        fail_always: bool,
    }

    #[async_trait]
    impl ChangeDispatcher for RecordingDispatcher {
        async fn emit(&self, event: ChangeEvent) -> Result<(), DispatchError> {
            if self.fail_always {
                return Err(DispatchError("sink unavailable".into()));
            }
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryOffsets {
        initial: Option<Scn>,
        stored: Mutex<Vec<Scn>>,
    }

    #[async_trait]
    impl OffsetStore for MemoryOffsets {
        async fn load(&self) -> Result<Option<Scn>, OffsetError> {
            Ok(self.initial)
        }

        async fn store(&self, scn: Scn) -> Result<(), OffsetError> {
            self.stored.lock().unwrap().push(scn);
            Ok(())
        }
    }

    fn catalog() -> MemoryCatalog {
        let mut catalog = MemoryCatalog::new();
        catalog.insert(TableSchema::new(
            TableId::new("app", "t"),
            vec![
                Column::new("a", ColumnType::Integer),
                Column::new("b", ColumnType::String),
            ],
        ));
        catalog
    }

    fn dml_row(kind: RowKind, tx: &str, scn: u64, sql: &str) -> LogRow {
        LogRow {
            kind,
            sql: Some(sql.to_string()),
            transaction_id: tx.to_string(),
            table: Some(TableId::new("app", "t")),
            scn: Scn(scn),
            timestamp: Utc::now(),
        }
    }

    fn marker_row(kind: RowKind, tx: &str, scn: u64) -> LogRow {
        LogRow {
            kind,
            sql: None,
            transaction_id: tx.to_string(),
            table: None,
            scn: Scn(scn),
            timestamp: Utc::now(),
        }
    }

    fn single_log(first: u64) -> Vec<LogFile> {
        vec![LogFile {
            name: "redo01.log".into(),
            first_change: Scn(first),
            next_change: None,
        }]
    }

    fn test_config() -> MinerConfig {
        MinerConfig {
            sleep_ms: 10,
            operation_timeout_secs: 1,
            reconnect_delay_ms: 10,
            ..Default::default()
        }
    }

    fn miner(
        source: FakeSource,
        initial_offset: Option<Scn>,
    ) -> (LogMiner, Arc<RecordingDispatcher>, Arc<MemoryOffsets>) {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let offsets = Arc::new(MemoryOffsets {
            initial: initial_offset,
            ..Default::default()
        });
        let miner = LogMiner::new(
            Box::new(source),
            Box::new(catalog()),
            Box::new(SharedDispatcher(Arc::clone(&dispatcher))),
            Box::new(SharedOffsets(Arc::clone(&offsets))),
            test_config(),
        );
        (miner, dispatcher, offsets)
    }

    struct SharedDispatcher(Arc<RecordingDispatcher>);

    #[async_trait]
    impl ChangeDispatcher for SharedDispatcher {
        async fn emit(&self, event: ChangeEvent) -> Result<(), DispatchError> {
            self.0.emit(event).await
        }
    }

    struct SharedOffsets(Arc<MemoryOffsets>);

    #[async_trait]
    impl OffsetStore for SharedOffsets {
        async fn load(&self) -> Result<Option<Scn>, OffsetError> {
            self.0.load().await
        }

        async fn store(&self, scn: Scn) -> Result<(), OffsetError> {
            self.0.store(scn).await
        }
    }

    /// Spawn the miner, wait for `done` to hold, then stop it and hand the
    /// miner back for inspection.
    async fn run_until(
        mut miner: LogMiner,
        done: impl Fn() -> bool,
    ) -> (LogMiner, MinerResult<()>) {
        let flag = miner.running_flag();
        let handle = tokio::spawn(async move {
            let result = miner.run().await;
            (miner, result)
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(done(), "condition not reached before deadline");

        flag.store(false, Ordering::Relaxed);
        handle.await.expect("miner task panicked")
    }

    #[tokio::test]
    async fn test_commits_dispatch_in_commit_order() {
        let source = FakeSource::new(FakeState {
            current_scn: 200,
            current_file: "redo01.log".into(),
            online: single_log(0),
            pending_rows: vec![
                dml_row(RowKind::Insert, "tx1", 101, "INSERT INTO T (A) VALUES (1)"),
                dml_row(RowKind::Insert, "tx2", 102, "INSERT INTO T (A) VALUES (2)"),
                dml_row(RowKind::Update, "tx1", 103, "UPDATE T SET B='x' WHERE A=1"),
                marker_row(RowKind::Commit, "tx2", 104),
                marker_row(RowKind::Commit, "tx1", 105),
            ],
            ..Default::default()
        });
        let (miner, dispatcher, _offsets) = miner(source, None);

        let events_seen = {
            let dispatcher = Arc::clone(&dispatcher);
            move || dispatcher.events.lock().unwrap().len() >= 3
        };
        let (miner, result) = run_until(miner, events_seen).await;
        result.unwrap();

        let events = dispatcher.events.lock().unwrap();
        // tx2 committed first, then tx1's deltas in buffered order.
        assert_eq!(events[0].transaction_id, "tx2");
        assert_eq!(events[0].op, Operation::Insert);
        assert_eq!(events[1].transaction_id, "tx1");
        assert_eq!(events[1].sequence, 0);
        assert_eq!(events[1].op, Operation::Insert);
        assert_eq!(events[2].transaction_id, "tx1");
        assert_eq!(events[2].sequence, 1);
        assert_eq!(events[2].op, Operation::Update);
        assert_eq!(
            events[2].after.iter().find(|cv| cv.name == "B").map(|cv| &cv.value),
            Some(&Value::String("x".into()))
        );

        assert!(miner.buffer().is_empty());
        assert_eq!(miner.buffer().stats().committed_transactions, 2);
    }

    #[tokio::test]
    async fn test_offset_advances_only_when_buffer_empty() {
        let source = FakeSource::new(FakeState {
            current_scn: 200,
            current_file: "redo01.log".into(),
            online: single_log(0),
            pending_rows: vec![dml_row(
                RowKind::Insert,
                "open-tx",
                101,
                "INSERT INTO T (A) VALUES (1)",
            )],
            ..Default::default()
        });
        let state = Arc::clone(&source.state);
        let (miner, _dispatcher, offsets) = miner(source, None);

        let fetched_twice = move || state.lock().unwrap().fetches >= 2;
        let (miner, result) = run_until(miner, fetched_twice).await;
        result.unwrap();

        // The transaction never committed: nothing may be persisted.
        assert_eq!(miner.buffer().len(), 1);
        assert_eq!(miner.resume_scn, Scn::ZERO);
        assert!(offsets.stored.lock().unwrap().is_empty());
        // But the mining window itself kept moving.
        assert!(miner.last_processed > Scn::ZERO);
    }

    #[tokio::test]
    async fn test_committed_window_persists_offset() {
        let source = FakeSource::new(FakeState {
            current_scn: 150,
            current_file: "redo01.log".into(),
            online: single_log(0),
            pending_rows: vec![
                dml_row(RowKind::Insert, "tx1", 101, "INSERT INTO T (A) VALUES (1)"),
                marker_row(RowKind::Commit, "tx1", 102),
            ],
            ..Default::default()
        });
        let state = Arc::clone(&source.state);
        let (miner, _dispatcher, offsets) = miner(source, None);

        let fetched = move || state.lock().unwrap().fetches >= 1;
        let (miner, result) = run_until(miner, fetched).await;
        result.unwrap();

        assert_eq!(miner.resume_scn, Scn(150));
        assert!(offsets.stored.lock().unwrap().contains(&Scn(150)));
        // Window end was capped by the current SCN, not the batch span.
        assert_eq!(miner.last_processed, Scn(150));
    }

    #[tokio::test]
    async fn test_rolled_back_transaction_never_dispatches() {
        let source = FakeSource::new(FakeState {
            current_scn: 150,
            current_file: "redo01.log".into(),
            online: single_log(0),
            pending_rows: vec![
                dml_row(RowKind::Insert, "tx1", 101, "INSERT INTO T (A) VALUES (1)"),
                marker_row(RowKind::Rollback, "tx1", 102),
            ],
            ..Default::default()
        });
        let state = Arc::clone(&source.state);
        let (miner, dispatcher, _offsets) = miner(source, None);

        let fetched = move || state.lock().unwrap().fetches >= 1;
        let (miner, result) = run_until(miner, fetched).await;
        result.unwrap();

        assert!(dispatcher.events.lock().unwrap().is_empty());
        assert!(miner.buffer().is_empty());
        assert_eq!(miner.buffer().stats().rolled_back_transactions, 1);
    }

    #[tokio::test]
    async fn test_unparseable_row_dropped_transaction_intact() {
        let source = FakeSource::new(FakeState {
            current_scn: 150,
            current_file: "redo01.log".into(),
            online: single_log(0),
            pending_rows: vec![
                dml_row(RowKind::Insert, "tx1", 101, "INSERT INTO T (A) VALUES (1)"),
                dml_row(RowKind::Update, "tx1", 102, "UPDATE T, U SET A=2"),
                marker_row(RowKind::Commit, "tx1", 103),
            ],
            ..Default::default()
        });
        let (miner, dispatcher, _offsets) = miner(source, None);

        let events_seen = {
            let dispatcher = Arc::clone(&dispatcher);
            move || !dispatcher.events.lock().unwrap().is_empty()
        };
        let (_miner, result) = run_until(miner, events_seen).await;
        result.unwrap();

        let events = dispatcher.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].op, Operation::Insert);
    }

    #[tokio::test]
    async fn test_transient_fetch_failure_reconnects() {
        let source = FakeSource::new(FakeState {
            current_scn: 150,
            current_file: "redo01.log".into(),
            online: single_log(0),
            pending_rows: vec![
                dml_row(RowKind::Insert, "tx1", 101, "INSERT INTO T (A) VALUES (1)"),
                marker_row(RowKind::Commit, "tx1", 102),
            ],
            fail_next_fetch: Some(SourceErrorKind::ConnectionReset),
            ..Default::default()
        });
        let state = Arc::clone(&source.state);
        let (miner, dispatcher, _offsets) = miner(source, None);

        let events_seen = {
            let dispatcher = Arc::clone(&dispatcher);
            move || !dispatcher.events.lock().unwrap().is_empty()
        };
        let (miner, result) = run_until(miner, events_seen).await;
        result.unwrap();

        assert!(state.lock().unwrap().connects >= 2);
        assert_eq!(miner.metrics().snapshot().reconnect_count, 1);
        assert_eq!(dispatcher.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unclassified_error_is_fatal() {
        let source = FakeSource::new(FakeState {
            current_scn: 150,
            current_file: "redo01.log".into(),
            online: single_log(0),
            fail_next_fetch: Some(SourceErrorKind::Database(600)),
            ..Default::default()
        });
        let (mut miner, _dispatcher, _offsets) = miner(source, None);

        let result = miner.run().await;
        assert!(matches!(result, Err(MinerError::Source(_))));
        assert!(!result.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_resume_position_outside_retained_logs_is_fatal() {
        let source = FakeSource::new(FakeState {
            current_scn: 500,
            current_file: "redo02.log".into(),
            // Oldest retained file starts after the resume position.
            online: vec![LogFile {
                name: "redo02.log".into(),
                first_change: Scn(300),
                next_change: None,
            }],
            ..Default::default()
        });
        let (mut miner, _dispatcher, _offsets) = miner(source, Some(Scn(100)));

        let result = miner.run().await;
        assert!(matches!(
            result,
            Err(MinerError::OffsetOutOfRange { resume: Scn(100) })
        ));
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_fatal() {
        let source = FakeSource::new(FakeState {
            current_scn: 150,
            current_file: "redo01.log".into(),
            online: single_log(0),
            pending_rows: vec![
                dml_row(RowKind::Insert, "tx1", 101, "INSERT INTO T (A) VALUES (1)"),
                marker_row(RowKind::Commit, "tx1", 102),
            ],
            ..Default::default()
        });
        let dispatcher = Arc::new(RecordingDispatcher {
            fail_always: true,
            ..Default::default()
        });
        let mut miner = LogMiner::new(
            Box::new(source),
            Box::new(catalog()),
            Box::new(SharedDispatcher(dispatcher)),
            Box::new(MemoryOffsets::default()),
            test_config(),
        );

        let result = miner.run().await;
        assert!(matches!(result, Err(MinerError::Dispatch(_))));
    }

    #[tokio::test]
    async fn test_rotation_abandons_aged_out_transactions() {
        let source = FakeSource::new(FakeState {
            current_scn: 150,
            current_file: "redo01.log".into(),
            online: vec![
                LogFile {
                    name: "redo01.log".into(),
                    first_change: Scn(0),
                    next_change: Some(Scn(100)),
                },
                LogFile {
                    name: "redo02.log".into(),
                    first_change: Scn(100),
                    next_change: None,
                },
            ],
            // A transaction that starts in the oldest file and never commits.
            pending_rows: vec![dml_row(
                RowKind::Insert,
                "stuck-tx",
                50,
                "INSERT INTO T (A) VALUES (1)",
            )],
            ..Default::default()
        });
        let state = Arc::clone(&source.state);
        let (miner, dispatcher, offsets) = miner(source, None);

        // After the first window buffers the transaction, rotate the active
        // file and let redo01 drop out of the online set. All remaining
        // files are needed, so the watermark is redo02's end position.
        let (miner, result) = run_until(miner, {
            let state = Arc::clone(&state);
            let offsets = Arc::clone(&offsets);
            move || {
                {
                    let mut s = state.lock().unwrap();
                    if s.fetches >= 1 && s.current_file == "redo01.log" {
                        s.current_file = "redo02.log".into();
                        s.online = vec![
                            LogFile {
                                name: "redo02.log".into(),
                                first_change: Scn(100),
                                next_change: Some(Scn(200)),
                            },
                            LogFile {
                                name: "redo03.log".into(),
                                first_change: Scn(200),
                                next_change: None,
                            },
                        ];
                        s.current_scn = 250;
                    }
                }
                offsets.stored.lock().unwrap().contains(&Scn(200))
            }
        })
        .await;
        result.unwrap();

        assert!(dispatcher.events.lock().unwrap().is_empty());
        assert!(miner.buffer().is_empty());
        assert_eq!(miner.buffer().stats().abandoned_transactions, 1);
        assert!(miner.resume_scn >= Scn(200));
        assert_eq!(miner.metrics().snapshot().switch_count, 1);
        assert!(state.lock().unwrap().end_mining_calls >= 1);
    }
}
