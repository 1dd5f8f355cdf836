use redomine_core::Scn;
use thiserror::Error;

/// Classified failure from the source database driver. The kind is derived
/// from the driver's structured error codes, never from message text, so the
/// transient-vs-fatal decision stays a pure function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    ConnectionReset,
    HostUnreachable,
    ProtocolFault,
    Timeout,
    /// A database-level error, keyed by the driver's error code.
    Database(u32),
    Unknown,
}

#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct SourceError {
    pub kind: SourceErrorKind,
    pub message: String,
}

impl SourceError {
    pub fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Timeout, message)
    }

    /// Connectivity-level faults are retried by the outer mining loop;
    /// everything else terminates the mining task.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            SourceErrorKind::ConnectionReset
                | SourceErrorKind::HostUnreachable
                | SourceErrorKind::ProtocolFault
                | SourceErrorKind::Timeout
        )
    }
}

#[derive(Debug, Error)]
pub enum MinerError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("resume position {resume} is older than all retained log files; reset the offset and re-snapshot")]
    OffsetOutOfRange { resume: Scn },

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("offset store error: {0}")]
    Offset(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl MinerError {
    /// Whether the outer loop may reconnect and resume instead of failing.
    pub fn is_transient(&self) -> bool {
        matches!(self, MinerError::Source(e) if e.is_transient())
    }
}

pub type MinerResult<T> = Result<T, MinerError>;
