//! Continuous log mining against a source database.
//!
//! [`LogMiner`] drives the loop: it opens sessions through a
//! [`SourceConnector`], advances a bounded SCN window, buffers uncommitted
//! transactions, and hands committed changes to a [`ChangeDispatcher`] in
//! commit order. The persisted [`OffsetStore`] position only moves while no
//! transaction is open, so a restart replays whatever was in flight.

pub mod config;
pub mod dispatch;
mod error;
pub mod logfiles;
pub mod metrics;
mod miner;
mod processor;
pub mod session;
mod window;

pub use config::MinerConfig;
pub use dispatch::{ChangeDispatcher, ChangeEvent, DispatchError, OffsetError, OffsetStore};
pub use error::{MinerError, MinerResult, SourceError, SourceErrorKind};
pub use logfiles::{abandonment_watermark, LogFile, LogFileSet, Reconciliation};
pub use metrics::{MetricsSnapshot, MinerMetrics};
pub use miner::LogMiner;
pub use session::{LogRow, MiningSession, RowKind, SourceConnector};
