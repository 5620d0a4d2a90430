use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{StoreError, StoreResult};
use crate::item::{Fields, LogEntry};
use crate::store::keys;
use crate::store::traits::{ClaimBatch, ConsumerInfo, DedupStore, GroupInfo, LogStore};

/// Entry id in `{ms}-{seq}` notation, ordered numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
struct EntryId {
    ms: u64,
    seq: u64,
}

impl EntryId {
    const ZERO: EntryId = EntryId { ms: 0, seq: 0 };

    fn parse(raw: &str) -> StoreResult<Self> {
        let (ms, seq) = raw.split_once('-').unwrap_or((raw, "0"));
        match (ms.parse(), seq.parse()) {
            (Ok(ms), Ok(seq)) => Ok(EntryId { ms, seq }),
            _ => Err(StoreError::Protocol(format!(
                "invalid stream ID specified as stream command argument: {raw}"
            ))),
        }
    }

    /// Id for the next append after `self`.
    fn next_append(self) -> Self {
        EntryId {
            ms: self.ms + 1,
            seq: 0,
        }
    }

    /// Smallest id strictly greater than `self`.
    fn next_after(self) -> Self {
        EntryId {
            ms: self.ms,
            seq: self.seq + 1,
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// One row of a group's pending entries list.
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

struct GroupState {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingEntry>,
    /// Consumer name -> last interaction.
    consumers: BTreeMap<String, Instant>,
}

impl GroupState {
    fn touch(&mut self, consumer: &str, now: Instant) {
        self.consumers.insert(consumer.to_string(), now);
    }
}

#[derive(Default)]
struct StreamState {
    entries: BTreeMap<EntryId, Fields>,
    last_id: EntryId,
    groups: BTreeMap<String, GroupState>,
}

#[derive(Default)]
struct State {
    streams: HashMap<String, StreamState>,
    /// Marker key -> optional expiry.
    markers: HashMap<String, Option<Instant>>,
    counters: HashMap<String, u64>,
    injected_failures: usize,
}

impl State {
    fn group_mut(&mut self, partition: &str, group: &str) -> StoreResult<&mut StreamState> {
        match self.streams.get_mut(partition) {
            Some(stream) if stream.groups.contains_key(group) => Ok(stream),
            _ => Err(StoreError::NoSuchGroup(format!(
                "No such key '{partition}' or consumer group '{group}'"
            ))),
        }
    }

    fn take_injected_failure(&mut self) -> StoreResult<()> {
        if self.injected_failures > 0 {
            self.injected_failures -= 1;
            return Err(StoreError::Connection("injected failure".to_string()));
        }
        Ok(())
    }

    fn marker_live(&self, key: &str, now: Instant) -> bool {
        match self.markers.get(key) {
            Some(Some(expiry)) => *expiry > now,
            Some(None) => true,
            None => false,
        }
    }
}

struct Inner {
    state: Mutex<State>,
    appended: Notify,
}

/// In-process log and dedup store with consumer-group semantics: a delivery
/// cursor per group, a pending entries list with idle time and delivery
/// count, and atomic marker/counter updates.
///
/// Idle time is measured with `tokio::time::Instant`, so tests running on a
/// paused clock can age pending entries with `tokio::time::advance`. Cloning
/// shares the underlying state.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                appended: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` log operations fail with a connection error.
    /// Appends are never failed, so tests can keep feeding a failing consumer.
    pub fn fail_next(&self, count: usize) {
        self.lock().injected_failures += count;
    }

    /// Pending entries of a group as `(entry_id, consumer, delivery_count)`,
    /// lowest id first.
    pub fn pending_entries(&self, partition: &str, group: &str) -> Vec<(String, String, u64)> {
        let state = self.lock();
        state
            .streams
            .get(partition)
            .and_then(|stream| stream.groups.get(group))
            .map(|group| {
                group
                    .pending
                    .iter()
                    .map(|(id, entry)| (id.to_string(), entry.consumer.clone(), entry.delivery_count))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current value of a processed counter.
    pub fn processed_count(&self, group: &str, consumer: &str) -> u64 {
        let key = keys::processed_counter_key(group, consumer);
        self.lock().counters.get(&key).copied().unwrap_or(0)
    }

    /// Sum of the processed counters of every consumer in the group.
    pub fn total_processed(&self, group: &str) -> u64 {
        let prefix = keys::processed_counter_key(group, "");
        self.lock()
            .counters
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, count)| *count)
            .sum()
    }

    fn deliver_new(
        &self,
        partition: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> StoreResult<Vec<LogEntry>> {
        let mut state = self.lock();
        state.take_injected_failure()?;
        let now = Instant::now();
        let stream = state.group_mut(partition, group)?;
        let StreamState {
            entries, groups, ..
        } = stream;
        let Some(group_state) = groups.get_mut(group) else {
            return Ok(Vec::new());
        };

        group_state.touch(consumer, now);

        let from = group_state.last_delivered.next_after();
        let mut delivered = Vec::new();
        for (id, fields) in entries.range(from..).take(count) {
            group_state.pending.insert(
                *id,
                PendingEntry {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
            group_state.last_delivered = *id;
            delivered.push(LogEntry::new(id.to_string(), fields.clone()));
        }
        Ok(delivered)
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn create_group(&self, partition: &str, group: &str) -> StoreResult<()> {
        let mut state = self.lock();
        state.take_injected_failure()?;
        let stream = state.streams.entry(partition.to_string()).or_default();
        if stream.groups.contains_key(group) {
            return Err(StoreError::GroupAlreadyExists(
                "BUSYGROUP Consumer Group name already exists".to_string(),
            ));
        }
        let tail = stream.last_id;
        stream.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered: tail,
                pending: BTreeMap::new(),
                consumers: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn claim_stale(
        &self,
        partition: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        cursor: &str,
        count: usize,
    ) -> StoreResult<ClaimBatch> {
        let start = EntryId::parse(cursor)?;
        let mut state = self.lock();
        state.take_injected_failure()?;
        let now = Instant::now();
        let stream = state.group_mut(partition, group)?;
        let StreamState {
            entries, groups, ..
        } = stream;
        let Some(group_state) = groups.get_mut(group) else {
            return Ok(ClaimBatch::default());
        };

        group_state.touch(consumer, now);

        let mut claimed = Vec::new();
        let mut deleted = Vec::new();
        let mut next_cursor = EntryId::ZERO;
        for (id, pending) in group_state.pending.range_mut(start..) {
            if claimed.len() == count {
                next_cursor = *id;
                break;
            }
            if now.saturating_duration_since(pending.delivered_at) < min_idle {
                continue;
            }
            match entries.get(id) {
                Some(fields) => {
                    pending.consumer = consumer.to_string();
                    pending.delivered_at = now;
                    pending.delivery_count += 1;
                    claimed.push(LogEntry::new(id.to_string(), fields.clone()));
                }
                // Trimmed from the log while pending.
                None => deleted.push(*id),
            }
        }
        for id in deleted {
            group_state.pending.remove(&id);
        }

        Ok(ClaimBatch {
            next_cursor: next_cursor.to_string(),
            entries: claimed,
        })
    }

    async fn read_group(
        &self,
        partition: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> StoreResult<Vec<LogEntry>> {
        let deadline = Instant::now() + block;
        loop {
            let notified = self.inner.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let delivered = self.deliver_new(partition, group, consumer, count)?;
            if !delivered.is_empty() || block.is_zero() {
                return Ok(delivered);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, partition: &str, group: &str, entry_id: &str) -> StoreResult<u64> {
        let id = EntryId::parse(entry_id)?;
        let mut state = self.lock();
        state.take_injected_failure()?;
        let acked = state
            .streams
            .get_mut(partition)
            .and_then(|stream| stream.groups.get_mut(group))
            .and_then(|group| group.pending.remove(&id))
            .map_or(0, |_| 1);
        Ok(acked)
    }

    async fn append(
        &self,
        partition: &str,
        max_length: usize,
        fields: &Fields,
    ) -> StoreResult<String> {
        let id = {
            let mut state = self.lock();
            let stream = state.streams.entry(partition.to_string()).or_default();
            let id = stream.last_id.next_append();
            stream.last_id = id;
            stream.entries.insert(id, fields.clone());
            while stream.entries.len() > max_length {
                stream.entries.pop_first();
            }
            id
        };
        self.inner.appended.notify_waiters();
        Ok(id.to_string())
    }

    async fn stream_length(&self, partition: &str) -> StoreResult<u64> {
        let mut state = self.lock();
        state.take_injected_failure()?;
        Ok(state
            .streams
            .get(partition)
            .map_or(0, |stream| stream.entries.len() as u64))
    }

    async fn group_info(&self, partition: &str) -> StoreResult<Vec<GroupInfo>> {
        let mut state = self.lock();
        state.take_injected_failure()?;
        let Some(stream) = state.streams.get(partition) else {
            return Ok(Vec::new());
        };
        Ok(stream
            .groups
            .iter()
            .map(|(name, group)| GroupInfo {
                name: name.clone(),
                consumers: group.consumers.len() as u64,
                pending: group.pending.len() as u64,
                last_delivered_id: group.last_delivered.to_string(),
            })
            .collect())
    }

    async fn consumer_info(&self, partition: &str, group: &str) -> StoreResult<Vec<ConsumerInfo>> {
        let mut state = self.lock();
        state.take_injected_failure()?;
        let now = Instant::now();
        let stream = state.group_mut(partition, group)?;
        let Some(group_state) = stream.groups.get(group) else {
            return Ok(Vec::new());
        };
        Ok(group_state
            .consumers
            .iter()
            .map(|(name, seen_at)| ConsumerInfo {
                name: name.clone(),
                pending: group_state
                    .pending
                    .values()
                    .filter(|entry| &entry.consumer == name)
                    .count() as u64,
                idle: now.saturating_duration_since(*seen_at),
            })
            .collect())
    }
}

#[async_trait]
impl DedupStore for MemoryStore {
    async fn is_processed(&self, entry_id: &str) -> StoreResult<bool> {
        let state = self.lock();
        Ok(state.marker_live(&keys::marker_key(entry_id), Instant::now()))
    }

    async fn mark_processed(
        &self,
        entry_id: &str,
        group: &str,
        consumer: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<Option<u64>> {
        let mut state = self.lock();
        let now = Instant::now();
        let marker = keys::marker_key(entry_id);
        if state.marker_live(&marker, now) {
            return Ok(None);
        }
        state.markers.insert(marker, ttl.map(|ttl| now + ttl));

        let counter = state
            .counters
            .entry(keys::processed_counter_key(group, consumer))
            .or_insert(0);
        *counter += 1;
        Ok(Some(*counter))
    }

    async fn processed_counts(&self, group: &str, consumers: &[String]) -> StoreResult<Vec<u64>> {
        let state = self.lock();
        Ok(keys::processed_counter_keys(group, consumers)
            .iter()
            .map(|key| state.counters.get(key).copied().unwrap_or(0))
            .collect())
    }
}
