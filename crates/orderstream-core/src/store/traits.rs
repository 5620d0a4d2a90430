use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::item::{Fields, LogEntry};

/// Entries reassigned by one claim call, plus the cursor to resume the
/// pending-list scan from (`0-0` once the scan has wrapped).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimBatch {
    pub next_cursor: String,
    pub entries: Vec<LogEntry>,
}

/// Group metadata as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub consumers: u64,
    pub pending: u64,
    pub last_delivered_id: String,
}

/// Per-consumer metadata as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerInfo {
    pub name: String,
    pub pending: u64,
    pub idle: Duration,
}

/// The partitioned, ordered log with broker-side consumer groups.
/// Implementations must be thread-safe.
#[async_trait]
pub trait LogStore: Send + Sync {
    // --- Consumer group operations ---

    /// Create `group` on `partition` positioned at the tail, creating the
    /// partition if absent. Fails with `GroupAlreadyExists` if it exists.
    async fn create_group(&self, partition: &str, group: &str) -> StoreResult<()>;

    /// Reassign pending entries idle for at least `min_idle` to `consumer`,
    /// scanning from `cursor` and claiming at most `count` entries.
    async fn claim_stale(
        &self,
        partition: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        cursor: &str,
        count: usize,
    ) -> StoreResult<ClaimBatch>;

    /// Deliver up to `count` never-delivered entries to `consumer`, waiting
    /// up to `block` for new data. A zero `block` does not wait.
    async fn read_group(
        &self,
        partition: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> StoreResult<Vec<LogEntry>>;

    /// Remove an entry from the group's pending set. Returns the number of
    /// entries acknowledged (0 if it was not pending).
    async fn ack(&self, partition: &str, group: &str, entry_id: &str) -> StoreResult<u64>;

    // --- Log operations ---

    /// Append an entry, trimming the partition to roughly `max_length`
    /// entries. Returns the broker-assigned entry id.
    async fn append(&self, partition: &str, max_length: usize, fields: &Fields)
        -> StoreResult<String>;

    /// Number of entries in the partition (0 if it does not exist).
    async fn stream_length(&self, partition: &str) -> StoreResult<u64>;

    // --- Introspection ---

    /// All groups on the partition (empty if the partition does not exist).
    async fn group_info(&self, partition: &str) -> StoreResult<Vec<GroupInfo>>;

    /// Consumers registered in the group, in broker listing order.
    async fn consumer_info(&self, partition: &str, group: &str) -> StoreResult<Vec<ConsumerInfo>>;
}

/// Idempotency markers and per-consumer processed counters.
/// All mutations are atomic on the store side; callers hold no locks.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Whether a dedup marker exists for the entry.
    async fn is_processed(&self, entry_id: &str) -> StoreResult<bool>;

    /// Atomically set the dedup marker if absent and, only if it was newly
    /// set, increment the `(group, consumer)` counter. Returns the new
    /// counter value, or `None` if the entry was already marked.
    async fn mark_processed(
        &self,
        entry_id: &str,
        group: &str,
        consumer: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<Option<u64>>;

    /// Processed counters for the given consumers, in the same order.
    /// Missing counters read as 0.
    async fn processed_counts(&self, group: &str, consumers: &[String]) -> StoreResult<Vec<u64>>;
}
