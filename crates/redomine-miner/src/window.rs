//! Mining-window advance: how far one fetch-and-process cycle may reach.

use redomine_core::Scn;

use crate::error::SourceError;
use crate::metrics::MinerMetrics;
use crate::session::MiningSession;

/// Compute the end of the next mining window: the source's current position,
/// capped at `last_processed + max_batch_span` so one iteration never scans
/// an unbounded span. Gradual windows also let the loop catch up predictably
/// after a long pause.
pub async fn next_window_end(
    session: &dyn MiningSession,
    last_processed: Scn,
    metrics: &MinerMetrics,
) -> Result<Scn, SourceError> {
    let current = session.current_scn().await?;
    metrics.set_current_scn(current);
    let capped = last_processed.saturating_add(metrics.max_batch_span());
    Ok(current.min(capped))
}
