//! Collaborator traits for the source database's log-mining interface.
//!
//! Connection establishment and driver plumbing live outside this crate; the
//! mining loop only sees these traits. Every call can fail with a classified
//! [`SourceError`] so the loop can tell reconnectable faults from fatal ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redomine_core::{Scn, TableId};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::logfiles::LogFile;

/// The kind of a row fetched from the mining view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    Insert,
    Update,
    Delete,
    Commit,
    Rollback,
    Ddl,
    Other,
}

impl RowKind {
    pub fn is_dml(self) -> bool {
        matches!(self, RowKind::Insert | RowKind::Update | RowKind::Delete)
    }
}

/// One captured row from a mining-window fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub kind: RowKind,
    /// Reconstructed SQL text; present for DML rows.
    pub sql: Option<String>,
    pub transaction_id: String,
    pub table: Option<TableId>,
    pub scn: Scn,
    pub timestamp: DateTime<Utc>,
}

/// Session-control and query interface against the source's mining facility.
///
/// A session maps to one driver-level connection. After a log switch the loop
/// ends mining and rebuilds the file set on the same session; after a
/// connectivity fault it drops the session and asks the connector for a new
/// one.
#[async_trait]
pub trait MiningSession: Send + Sync {
    /// The source's current position (live database state).
    async fn current_scn(&self) -> Result<Scn, SourceError>;

    /// Name of the log file currently marked active. Two successive probes
    /// disagreeing means a rotation happened.
    async fn current_log_file(&self) -> Result<String, SourceError>;

    /// All log files the source currently retains online.
    async fn online_log_files(&self) -> Result<Vec<LogFile>, SourceError>;

    /// Attach a log file to the mining session.
    async fn add_log_file(&self, name: &str) -> Result<(), SourceError>;

    /// Detach a log file from the mining session (not deleted from storage).
    async fn remove_log_file(&self, name: &str) -> Result<(), SourceError>;

    /// Start mining over `[from, to)` using the attached files.
    async fn start_mining(&self, from: Scn, to: Scn) -> Result<(), SourceError>;

    /// Tear the mining session down. Implementations should tolerate an
    /// already-closed session.
    async fn end_mining(&self) -> Result<(), SourceError>;

    /// Fetch all captured rows for the window, in the source's order:
    /// position-ascending, then within-transaction sequence-ascending.
    async fn fetch(&self, from: Scn, to: Scn) -> Result<Vec<LogRow>, SourceError>;

    /// Enable per-table log detail capture for the given tables. Idempotent
    /// on the source side.
    async fn enable_table_logging(&self, tables: &[TableId]) -> Result<(), SourceError>;
}

/// Opens mining sessions. The outer loop calls this again after every
/// connectivity failure.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn MiningSession>, SourceError>;
}
