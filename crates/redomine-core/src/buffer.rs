//! In-memory store of not-yet-committed transactions.
//!
//! Deltas accumulate per transaction id until the commit or rollback marker
//! for that id is observed in the mining stream. Commit drains the deltas in
//! accumulation order for dispatch; rollback discards them. Transactions whose
//! earliest data has rotated out of the retained log files are abandoned:
//! their captured deltas are necessarily incomplete and must not be emitted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use tracing::{debug, warn};

use crate::delta::RowChangeDelta;
use crate::types::Scn;

#[derive(Debug)]
struct OpenTransaction {
    first_seen: Scn,
    deltas: Vec<RowChangeDelta>,
}

/// Counters describing buffer activity, readable by a monitoring collaborator
/// while the mining loop owns the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub open_transactions: usize,
    pub buffered_deltas: usize,
    pub committed_transactions: u64,
    pub rolled_back_transactions: u64,
    pub abandoned_transactions: u64,
}

/// The transactional buffer. All mutation goes through one mutex so a
/// concurrent metrics reader always observes a consistent map.
#[derive(Debug, Default)]
pub struct TransactionBuffer {
    transactions: Mutex<HashMap<String, OpenTransaction>>,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    abandoned: AtomicU64,
}

impl TransactionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta to the transaction, creating it on first sight. The
    /// first-seen position drives age-based abandonment.
    pub fn append(&self, tx_id: &str, scn: Scn, delta: RowChangeDelta) {
        let mut txs = self.transactions.lock().expect("buffer lock poisoned");
        txs.entry(tx_id.to_string())
            .or_insert_with(|| OpenTransaction {
                first_seen: scn,
                deltas: Vec::new(),
            })
            .deltas
            .push(delta);
    }

    /// Remove the transaction and hand back its deltas in accumulation order
    /// for dispatch. Returns `None` for an id with no buffered deltas (a
    /// commit marker for a transaction we never saw DML for).
    pub fn commit(&self, tx_id: &str) -> Option<Vec<RowChangeDelta>> {
        let tx = {
            let mut txs = self.transactions.lock().expect("buffer lock poisoned");
            txs.remove(tx_id)
        };
        match tx {
            Some(tx) => {
                self.committed.fetch_add(1, Ordering::Relaxed);
                Some(tx.deltas)
            }
            None => None,
        }
    }

    /// Discard the transaction without dispatch. Returns whether it existed.
    pub fn rollback(&self, tx_id: &str) -> bool {
        let removed = {
            let mut txs = self.transactions.lock().expect("buffer lock poisoned");
            txs.remove(tx_id)
        };
        match removed {
            Some(tx) => {
                debug!(
                    tx_id,
                    deltas = tx.deltas.len(),
                    "discarding rolled-back transaction"
                );
                self.rolled_back.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Force out transactions whose first-seen position precedes `watermark`:
    /// the log files covering their earlier rows have rotated away, so the
    /// buffered portion can never be completed. This is a counted, logged
    /// data-loss event, not an error. Returns the abandoned transaction ids.
    pub fn abandon_older_than(&self, watermark: Scn) -> Vec<String> {
        let mut txs = self.transactions.lock().expect("buffer lock poisoned");
        let stale: Vec<String> = txs
            .iter()
            .filter(|(_, tx)| tx.first_seen < watermark)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            if let Some(tx) = txs.remove(id) {
                warn!(
                    tx_id = %id,
                    first_seen = %tx.first_seen,
                    %watermark,
                    deltas = tx.deltas.len(),
                    "abandoning transaction older than retained logs; its changes are lost"
                );
                self.abandoned.fetch_add(1, Ordering::Relaxed);
            }
        }
        stale
    }

    /// No open transactions. The orchestrator only advances the persisted
    /// resume position past a window when this holds.
    pub fn is_empty(&self) -> bool {
        self.transactions
            .lock()
            .expect("buffer lock poisoned")
            .is_empty()
    }

    pub fn len(&self) -> usize {
        self.transactions
            .lock()
            .expect("buffer lock poisoned")
            .len()
    }

    /// First-seen position of the oldest open transaction, if any.
    pub fn oldest_first_seen(&self) -> Option<Scn> {
        self.transactions
            .lock()
            .expect("buffer lock poisoned")
            .values()
            .map(|tx| tx.first_seen)
            .min()
    }

    pub fn stats(&self) -> BufferStats {
        let txs = self.transactions.lock().expect("buffer lock poisoned");
        BufferStats {
            open_transactions: txs.len(),
            buffered_deltas: txs.values().map(|tx| tx.deltas.len()).sum(),
            committed_transactions: self.committed.load(Ordering::Relaxed),
            rolled_back_transactions: self.rolled_back.load(Ordering::Relaxed),
            abandoned_transactions: self.abandoned.load(Ordering::Relaxed),
        }
    }
}
