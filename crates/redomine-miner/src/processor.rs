//! Routes the raw rows of one mining-window fetch into the transaction
//! buffer and, on commit markers, out to the dispatcher.

use redomine_core::{dml, SchemaCatalog, TransactionBuffer};
use tracing::{debug, warn};

use crate::dispatch::{ChangeDispatcher, ChangeEvent};
use crate::error::{MinerError, MinerResult};
use crate::metrics::MinerMetrics;
use crate::session::{LogRow, RowKind};

/// Consumes fetched rows for one window. Row-level parse failures drop the
/// single row; dispatch failures abort the loop.
pub struct ResultProcessor<'a> {
    catalog: &'a dyn SchemaCatalog,
    buffer: &'a TransactionBuffer,
    dispatcher: &'a dyn ChangeDispatcher,
    metrics: &'a MinerMetrics,
}

impl<'a> ResultProcessor<'a> {
    pub fn new(
        catalog: &'a dyn SchemaCatalog,
        buffer: &'a TransactionBuffer,
        dispatcher: &'a dyn ChangeDispatcher,
        metrics: &'a MinerMetrics,
    ) -> Self {
        Self {
            catalog,
            buffer,
            dispatcher,
            metrics,
        }
    }

    /// Process one window's rows in fetch order. Returns the number of rows
    /// seen, which drives the adaptive sleep between polls.
    pub async fn process(&self, rows: Vec<LogRow>) -> MinerResult<usize> {
        let mut seen = 0usize;
        let mut captured = 0u64;

        for row in rows {
            seen += 1;
            match row.kind {
                RowKind::Insert | RowKind::Update | RowKind::Delete => {
                    if self.buffer_dml(&row) {
                        captured += 1;
                    }
                }
                RowKind::Commit => self.commit(&row).await?,
                RowKind::Rollback => {
                    if !self.buffer.rollback(&row.transaction_id) {
                        debug!(tx_id = %row.transaction_id, "rollback marker for unknown transaction");
                    }
                }
                RowKind::Ddl => {
                    debug!(scn = %row.scn, table = ?row.table, "skipping DDL row");
                }
                RowKind::Other => {
                    debug!(scn = %row.scn, "skipping row with unsupported operation");
                }
            }
        }

        self.metrics.add_captured_rows(captured);
        Ok(seen)
    }

    /// Parse one DML row and append its delta to the owning transaction.
    /// Returns whether the row was captured.
    fn buffer_dml(&self, row: &LogRow) -> bool {
        let Some(sql) = row.sql.as_deref() else {
            warn!(scn = %row.scn, tx_id = %row.transaction_id, "DML row without SQL text, dropping");
            return false;
        };
        let Some(table) = row.table.as_ref() else {
            warn!(scn = %row.scn, tx_id = %row.transaction_id, "DML row without table identity, dropping");
            return false;
        };

        let schema = match self.catalog.lookup(&table.owner, &table.name) {
            Ok(schema) => schema,
            Err(e) => {
                warn!(scn = %row.scn, %table, error = %e, "no schema for captured row, dropping");
                return false;
            }
        };

        match dml::parse(sql, schema) {
            Ok(delta) => {
                self.buffer.append(&row.transaction_id, row.scn, delta);
                true
            }
            Err(e) => {
                // Expected for statement shapes outside the supported DML
                // subset; the rest of the transaction stays intact.
                warn!(
                    scn = %row.scn,
                    tx_id = %row.transaction_id,
                    %table,
                    error = %e,
                    "cannot parse captured statement, dropping row"
                );
                false
            }
        }
    }

    /// Flush the committed transaction to the sink in buffered order.
    async fn commit(&self, row: &LogRow) -> MinerResult<()> {
        let Some(deltas) = self.buffer.commit(&row.transaction_id) else {
            debug!(tx_id = %row.transaction_id, "commit marker for transaction with no buffered changes");
            return Ok(());
        };

        debug!(
            tx_id = %row.transaction_id,
            commit_scn = %row.scn,
            deltas = deltas.len(),
            "dispatching committed transaction"
        );

        for (sequence, delta) in deltas.into_iter().enumerate() {
            let event = ChangeEvent {
                table: delta.table,
                op: delta.op,
                before: delta.before,
                after: delta.after,
                commit_scn: row.scn,
                transaction_id: row.transaction_id.clone(),
                sequence,
            };
            self.dispatcher
                .emit(event)
                .await
                .map_err(|e| MinerError::Dispatch(e.to_string()))?;
        }
        Ok(())
    }
}
