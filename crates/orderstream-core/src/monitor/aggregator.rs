use std::sync::Arc;

use futures::future::join_all;
use tracing::warn;

use crate::error::{StatsError, StoreError};
use crate::store::{DedupStore, LogStore};

use super::stats::{
    idle_seconds, sort_by_processed, ConsumerStat, GroupSnapshot, MonitorTarget, TargetReport,
};

/// Builds group snapshots from log metadata and processed counters.
/// Holds no state between cycles.
#[derive(Clone)]
pub struct StatsAggregator {
    log: Arc<dyn LogStore>,
    dedup: Arc<dyn DedupStore>,
}

impl StatsAggregator {
    pub fn new(log: Arc<dyn LogStore>, dedup: Arc<dyn DedupStore>) -> Self {
        Self { log, dedup }
    }

    /// Snapshot one group. Length, group metadata and consumer metadata are
    /// fetched concurrently, then all counters in one batched lookup.
    #[tracing::instrument(skip(self))]
    pub async fn snapshot(&self, partition: &str, group: &str) -> Result<GroupSnapshot, StatsError> {
        let (length, groups, consumers) = tokio::join!(
            self.log.stream_length(partition),
            self.log.group_info(partition),
            self.log.consumer_info(partition, group),
        );

        let not_found = || StatsError::GroupNotFound {
            partition: partition.to_string(),
            group: group.to_string(),
        };
        let info = groups?
            .into_iter()
            .find(|g| g.name == group)
            .ok_or_else(not_found)?;
        let consumers = match consumers {
            Ok(consumers) => consumers,
            // Group removed between the two queries.
            Err(StoreError::NoSuchGroup(_) | StoreError::NoSuchKey(_)) => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        let length = length?;

        let names: Vec<String> = consumers.iter().map(|c| c.name.clone()).collect();
        let counts = self.dedup.processed_counts(group, &names).await?;

        let mut stats: Vec<ConsumerStat> = consumers
            .into_iter()
            .zip(counts)
            .map(|(consumer, processed)| ConsumerStat {
                name: consumer.name,
                pending_count: consumer.pending,
                idle_seconds: idle_seconds(consumer.idle.as_millis()),
                processed_count: processed,
            })
            .collect();
        sort_by_processed(&mut stats);

        Ok(GroupSnapshot {
            partition: partition.to_string(),
            group: group.to_string(),
            stream_length: length,
            pending: info.pending,
            last_delivered_id: info.last_delivered_id,
            consumers: stats,
        })
    }

    /// Snapshot every `(partition, group)` pair concurrently. A failing pair
    /// is logged and reported in its own slot; the others are unaffected.
    pub async fn snapshot_all(&self, targets: &[MonitorTarget]) -> Vec<TargetReport> {
        let pairs: Vec<(&str, &str)> = targets
            .iter()
            .flat_map(|t| t.groups.iter().map(move |g| (t.partition.as_str(), g.as_str())))
            .collect();

        join_all(pairs.into_iter().map(|(partition, group)| async move {
            let result = self.snapshot(partition, group).await;
            if let Err(e) = &result {
                warn!(%partition, %group, error = %e, "snapshot failed");
            }
            TargetReport {
                partition: partition.to_string(),
                group: group.to_string(),
                result,
            }
        }))
        .await
    }
}
