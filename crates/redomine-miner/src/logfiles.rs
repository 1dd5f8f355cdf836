//! Keeps the set of log files attached to the mining session aligned with
//! the files that still cover the mining window.

use redomine_core::Scn;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MinerError, MinerResult};
use crate::session::MiningSession;

/// One online log file as reported by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFile {
    pub name: String,
    /// Oldest position the file covers.
    pub first_change: Scn,
    /// Position the file's coverage ends at; `None` while the file is the
    /// active one and still being written.
    pub next_change: Option<Scn>,
}

impl LogFile {
    pub fn is_current(&self) -> bool {
        self.next_change.is_none()
    }

    /// Whether the file's coverage intersects `[start, +inf)`.
    pub fn covers_from(&self, start: Scn) -> bool {
        match self.next_change {
            Some(end) => end > start,
            None => true,
        }
    }

    /// "CURRENT" for the file still being written, "RETAINED" otherwise.
    pub fn status(&self) -> &'static str {
        if self.is_current() {
            "CURRENT"
        } else {
            "RETAINED"
        }
    }
}

/// Files added to and removed from the live session by one reconcile pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// The loop's view of which files the live mining session currently has
/// attached. Rebuilt from scratch after every rotation.
#[derive(Debug, Default)]
pub struct LogFileSet {
    mined: Vec<LogFile>,
}

impl LogFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the files whose coverage intersects `[window_start, +inf)`,
    /// detach files that fell out of range, attach newly needed ones.
    ///
    /// An empty computed set is fatal: no retained file covers the requested
    /// position, so the resume offset has aged out of the log.
    pub async fn reconcile(
        &mut self,
        session: &dyn MiningSession,
        window_start: Scn,
    ) -> MinerResult<Reconciliation> {
        let online = session.online_log_files().await?;
        let needed: Vec<LogFile> = online
            .into_iter()
            .filter(|f| f.covers_from(window_start))
            .collect();
        if needed.is_empty() {
            return Err(MinerError::OffsetOutOfRange {
                resume: window_start,
            });
        }

        let mut result = Reconciliation::default();

        for file in &self.mined {
            if !needed.iter().any(|f| f.name == file.name) {
                session.remove_log_file(&file.name).await?;
                debug!(file = %file.name, "detached outdated log file from mining session");
                result.removed.push(file.name.clone());
            }
        }
        for file in &needed {
            if !self.mined.iter().any(|f| f.name == file.name) {
                session.add_log_file(&file.name).await?;
                debug!(file = %file.name, first_change = %file.first_change, "attached log file to mining session");
                result.added.push(file.name.clone());
            }
        }

        self.mined = needed;
        Ok(result)
    }

    /// Forget the attached set, e.g. after the session itself was torn down.
    pub fn clear(&mut self) {
        self.mined.clear();
    }

    pub fn mined_files(&self) -> &[LogFile] {
        &self.mined
    }

    /// Start of the oldest file attached to the session. Transactions that
    /// began before this position can no longer be fully reconstructed.
    pub fn oldest_first_change(&self) -> Option<Scn> {
        self.mined.iter().map(|f| f.first_change).min()
    }
}

/// Watermark for abandoning long-running transactions: once mining needs all
/// but at most one of the online files, the end position of the oldest mined
/// file is about to rotate out, and transactions older than it are
/// irrecoverable.
pub fn abandonment_watermark(online: &[LogFile], resume: Scn) -> Option<Scn> {
    let mined: Vec<&LogFile> = online.iter().filter(|f| f.covers_from(resume)).collect();
    if mined.is_empty() || online.len() - mined.len() > 1 {
        return None;
    }
    mined
        .iter()
        .map(|f| f.next_change.unwrap_or(Scn::MAX))
        .min()
}
