use std::time::Duration;

use tracing::info;

use crate::error::StoreResult;
use crate::item::LogEntry;
use crate::store::LogStore;

/// Cursor that starts a pending-list scan from the beginning.
pub const SCAN_START: &str = "0-0";

/// Claim up to `batch_size` entries that have sat unacknowledged in the
/// group for at least `min_idle`, reassigning them to `consumer`.
///
/// Entries still within their idle threshold are left with their current
/// owner. Each pass scans from the start of the pending list; a backlog
/// larger than one batch drains over successive passes.
pub async fn reclaim_stale(
    store: &dyn LogStore,
    partition: &str,
    group: &str,
    consumer: &str,
    min_idle: Duration,
    batch_size: usize,
) -> StoreResult<Vec<LogEntry>> {
    let batch = store
        .claim_stale(partition, group, consumer, min_idle, SCAN_START, batch_size)
        .await?;

    if !batch.entries.is_empty() {
        info!(
            %partition,
            %group,
            %consumer,
            count = batch.entries.len(),
            "reclaimed stale pending entries"
        );
    }
    Ok(batch.entries)
}
