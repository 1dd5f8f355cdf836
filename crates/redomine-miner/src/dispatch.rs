//! Downstream seams: the change-event sink and the resumable offset store.

use async_trait::async_trait;
use redomine_core::{ColumnValue, Operation, Scn, TableId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A committed row change handed to the downstream sink, in commit order.
///
/// `(table, transaction_id, sequence)` identifies the change within its
/// transaction; a sink that needs idempotence across the at-least-once
/// duplicate window can deduplicate on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: TableId,
    pub op: Operation,
    pub before: Vec<ColumnValue>,
    pub after: Vec<ColumnValue>,
    /// Position of the commit marker that released this change.
    pub commit_scn: Scn,
    pub transaction_id: String,
    /// Index of this change within its transaction.
    pub sequence: usize,
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct DispatchError(pub String);

/// Event sink. Errors are fatal to the mining loop: the resume position must
/// never advance past an undelivered change.
#[async_trait]
pub trait ChangeDispatcher: Send + Sync {
    async fn emit(&self, event: ChangeEvent) -> Result<(), DispatchError>;
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct OffsetError(pub String);

/// Persistence for the single monotonically non-decreasing resume position.
/// Storage format is the host's concern.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    async fn load(&self) -> Result<Option<Scn>, OffsetError>;
    async fn store(&self, scn: Scn) -> Result<(), OffsetError>;
}
