use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use crate::error::ProcessError;
use crate::events::{EventSink, ProcessedEvent};
use crate::item::{LogEntry, Outcome};
use crate::metrics::WorkerMetrics;
use crate::store::{DedupStore, LogStore};

/// Simulated processing latency, drawn uniformly from `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessingDelay {
    pub min: Duration,
    pub max: Duration,
}

impl ProcessingDelay {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// Pick the delay for one entry. A window with `max <= min` yields `min`.
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..max))
    }

    async fn wait(&self) {
        let delay = self.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Turns a delivered or claimed entry into a processed-or-skipped outcome
/// and acknowledges it.
///
/// The dedup marker and the consumer's counter are updated by a single
/// atomic store operation, so two consumers racing on the same reclaimed
/// entry count it once.
pub struct Processor {
    log: Arc<dyn LogStore>,
    dedup: Arc<dyn DedupStore>,
    events: Arc<dyn EventSink>,
    metrics: WorkerMetrics,
    partition: String,
    group: String,
    consumer: String,
    delay: ProcessingDelay,
    dedup_ttl: Option<Duration>,
}

impl Processor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log: Arc<dyn LogStore>,
        dedup: Arc<dyn DedupStore>,
        events: Arc<dyn EventSink>,
        metrics: WorkerMetrics,
        partition: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        delay: ProcessingDelay,
        dedup_ttl: Option<Duration>,
    ) -> Self {
        Self {
            log,
            dedup,
            events,
            metrics,
            partition: partition.into(),
            group: group.into(),
            consumer: consumer.into(),
            delay,
            dedup_ttl,
        }
    }

    /// Process one entry.
    ///
    /// A malformed payload or a store failure returns an error before the
    /// ack, leaving the entry pending for a later recovery pass. Processed
    /// and skipped entries are acknowledged exactly once.
    #[tracing::instrument(skip_all, fields(entry_id = %entry.id, consumer = %self.consumer))]
    pub async fn process(&self, entry: &LogEntry) -> Result<Outcome, ProcessError> {
        let item = entry.work_item()?;

        self.delay.wait().await;

        let outcome = if self.dedup.is_processed(&entry.id).await? {
            Outcome::Skipped
        } else {
            match self
                .dedup
                .mark_processed(&entry.id, &self.group, &self.consumer, self.dedup_ttl)
                .await?
            {
                Some(index) => Outcome::Processed { index },
                // Another consumer marked it between the check and the mark.
                None => Outcome::Skipped,
            }
        };

        match outcome {
            Outcome::Processed { index } => {
                debug!(entry_id = %entry.id, item_id = %item.id, index, "entry processed");
                self.metrics.record_processed(&self.group, &self.consumer);
            }
            Outcome::Skipped => {
                info!(entry_id = %entry.id, item_id = %item.id, "duplicate entry, skipping");
                self.metrics.record_skipped(&self.group, &self.consumer);
            }
        }

        self.events.record(ProcessedEvent {
            entry_id: entry.id.clone(),
            item_id: item.id,
            item_name: item.name,
            outcome,
        });

        self.log.ack(&self.partition, &self.group, &entry.id).await?;
        self.metrics.record_acked(&self.group, &self.consumer);
        Ok(outcome)
    }
}
