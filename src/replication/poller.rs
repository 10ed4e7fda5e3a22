//! Execution event polling: cursor tracking over the source fill history.
//!
//! Pure over its inputs. The caller fetches the newest-first execution page
//! and persists the advanced cursor only after the downstream pipeline has
//! accepted the fills.

use tracing::{debug, warn};

use crate::models::Fill;

/// Result of scanning one execution page against the cursor.
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// New fills in chronological order, already filtered to replicable
    /// trades.
    pub fills: Vec<Fill>,

    /// Newest execution id seen in the page; the caller persists this as the
    /// cursor once the cycle completes.
    pub newest_id: Option<String>,

    /// True when the cursor was not found within the fetched page: the gap
    /// exceeded the page size and older fills may have been missed. Reported,
    /// never silently dropped; the reconciler heals whatever was lost.
    pub cursor_gap: bool,
}

/// Extract fills newer than `cursor` from a newest-first page.
pub fn new_fills(cursor: Option<&str>, page: &[Fill], allowlist: &[String]) -> PollOutcome {
    let mut outcome = PollOutcome::default();

    let Some(newest) = page.first() else {
        return outcome;
    };
    outcome.newest_id = Some(newest.exec_id.clone());

    // Without a cursor nothing is replayed; initial sync seeds it.
    let Some(cursor) = cursor else {
        return outcome;
    };

    if newest.exec_id == cursor {
        debug!("No new executions since cursor");
        return outcome;
    }

    let mut newer = Vec::new();
    let mut found_cursor = false;
    for fill in page {
        if fill.exec_id == cursor {
            found_cursor = true;
            break;
        }
        newer.push(fill.clone());
    }

    if !found_cursor {
        warn!(
            page_size = page.len(),
            cursor = %cursor,
            "Cursor not present in fetched executions; gap may exceed page size"
        );
        outcome.cursor_gap = true;
    }

    // Oldest first, so replication preserves the venue's ordering.
    newer.reverse();
    outcome.fills = newer
        .into_iter()
        .filter(|f| {
            if !f.is_trade() {
                debug!(symbol = %f.symbol, exec_type = %f.exec_type, "Skipping non-trade execution");
                return false;
            }
            if !allowlist.is_empty() && !allowlist.iter().any(|s| s == &f.symbol) {
                return false;
            }
            true
        })
        .collect();

    outcome
}
