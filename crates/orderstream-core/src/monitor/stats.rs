use serde::Serialize;

use crate::error::StatsError;

/// Per-consumer view, recomputed every aggregation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerStat {
    pub name: String,
    pub pending_count: u64,
    pub idle_seconds: u64,
    pub processed_count: u64,
}

/// Snapshot of one consumer group on one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSnapshot {
    pub partition: String,
    pub group: String,
    pub stream_length: u64,
    pub pending: u64,
    pub last_delivered_id: String,
    /// Sorted by `processed_count` descending; ties keep broker listing order.
    pub consumers: Vec<ConsumerStat>,
}

impl GroupSnapshot {
    pub fn total_processed(&self) -> u64 {
        self.consumers.iter().map(|c| c.processed_count).sum()
    }
}

/// A partition and the groups to report on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorTarget {
    pub partition: String,
    pub groups: Vec<String>,
}

impl MonitorTarget {
    pub fn new(partition: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            partition: partition.into(),
            groups,
        }
    }
}

/// Outcome for one `(partition, group)` pair of a multi-target cycle.
#[derive(Debug)]
pub struct TargetReport {
    pub partition: String,
    pub group: String,
    pub result: Result<GroupSnapshot, StatsError>,
}

/// Order consumers by processed count, highest first. Stable, so equal
/// counts keep their incoming order.
pub fn sort_by_processed(consumers: &mut [ConsumerStat]) {
    consumers.sort_by(|a, b| b.processed_count.cmp(&a.processed_count));
}

/// Idle milliseconds rounded to whole seconds.
pub fn idle_seconds(idle_ms: u128) -> u64 {
    ((idle_ms + 500) / 1000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(name: &str, processed: u64) -> ConsumerStat {
        ConsumerStat {
            name: name.to_string(),
            pending_count: 0,
            idle_seconds: 0,
            processed_count: processed,
        }
    }

    #[test]
    fn sort_is_descending_and_stable() {
        let mut consumers = vec![stat("a", 1), stat("b", 5), stat("c", 1), stat("d", 5)];
        sort_by_processed(&mut consumers);
        let names: Vec<&str> = consumers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn idle_rounds_to_nearest_second() {
        assert_eq!(idle_seconds(0), 0);
        assert_eq!(idle_seconds(499), 0);
        assert_eq!(idle_seconds(1500), 2);
        assert_eq!(idle_seconds(120_000), 120);
    }

    #[test]
    fn snapshot_serializes_as_json() {
        let snapshot = GroupSnapshot {
            partition: "orders".to_string(),
            group: "payments".to_string(),
            stream_length: 3,
            pending: 1,
            last_delivered_id: "3-0".to_string(),
            consumers: vec![stat("w1", 2)],
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["consumers"][0]["processed_count"], 2);
        assert_eq!(snapshot.total_processed(), 2);
    }
}
