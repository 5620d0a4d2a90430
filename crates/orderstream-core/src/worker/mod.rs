//! The per-worker processing loop: bootstrap once, then alternate stale
//! recovery and fresh delivery until cancelled.

mod bootstrap;
mod processor;
mod recovery;
mod retry;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::{BootstrapError, StoreResult};
use crate::events::EventSink;
use crate::item::{LogEntry, Outcome};
use crate::metrics::WorkerMetrics;
use crate::store::{DedupStore, LogStore};

pub use bootstrap::{ensure_group, GroupStatus};
pub use processor::{ProcessingDelay, Processor};
pub use recovery::{reclaim_stale, SCAN_START};
pub use retry::RetryPolicy;

/// Everything the loop needs to know about its place in the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub partition: String,
    pub group: String,
    pub consumer: String,
    pub reclaim_idle: Duration,
    pub reclaim_batch_size: usize,
    pub read_batch_size: usize,
    pub block_timeout: Duration,
    pub retry_backoff: Duration,
    pub processing_delay: ProcessingDelay,
    pub dedup_ttl: Option<Duration>,
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let worker = &config.worker;
        Self {
            partition: config.stream.partition.clone(),
            group: config.stream.group.clone(),
            consumer: worker.consumer_name(),
            reclaim_idle: worker.reclaim_idle(),
            reclaim_batch_size: worker.reclaim_batch_size,
            read_batch_size: worker.read_batch_size,
            block_timeout: worker.block_timeout(),
            retry_backoff: worker.retry_backoff(),
            processing_delay: ProcessingDelay::new(
                Duration::from_millis(worker.processing_delay_min_ms),
                Duration::from_millis(worker.processing_delay_max_ms),
            ),
            dedup_ttl: worker.dedup_ttl(),
        }
    }
}

/// Counts from one loop iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationReport {
    pub claimed: usize,
    pub delivered: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl IterationReport {
    fn record(&mut self, outcome: Option<Outcome>) {
        match outcome {
            Some(Outcome::Processed { .. }) => self.processed += 1,
            Some(Outcome::Skipped) => self.skipped += 1,
            None => self.failed += 1,
        }
    }
}

/// One consumer in a group. Holds its store handles for its whole
/// lifetime; dropping the worker releases them.
pub struct Worker {
    log: Arc<dyn LogStore>,
    processor: Processor,
    settings: WorkerSettings,
    retry: RetryPolicy,
    metrics: WorkerMetrics,
}

impl Worker {
    pub fn new(
        log: Arc<dyn LogStore>,
        dedup: Arc<dyn DedupStore>,
        events: Arc<dyn EventSink>,
        settings: WorkerSettings,
    ) -> Self {
        Self::with_metrics(log, dedup, events, settings, WorkerMetrics::new())
    }

    pub fn with_metrics(
        log: Arc<dyn LogStore>,
        dedup: Arc<dyn DedupStore>,
        events: Arc<dyn EventSink>,
        settings: WorkerSettings,
        metrics: WorkerMetrics,
    ) -> Self {
        let processor = Processor::new(
            Arc::clone(&log),
            dedup,
            events,
            metrics.clone(),
            settings.partition.clone(),
            settings.group.clone(),
            settings.consumer.clone(),
            settings.processing_delay,
            settings.dedup_ttl,
        );
        Self {
            log,
            processor,
            retry: RetryPolicy::fixed(settings.retry_backoff),
            settings,
            metrics,
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Bootstrap the group, then loop until `shutdown` is cancelled.
    ///
    /// Only a bootstrap failure ends the loop with an error. Iteration
    /// errors are logged and retried after the fixed backoff.
    #[tracing::instrument(skip_all, fields(consumer = %self.settings.consumer))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), BootstrapError> {
        let s = &self.settings;
        ensure_group(self.log.as_ref(), &s.partition, &s.group).await?;
        info!(
            partition = %s.partition,
            group = %s.group,
            consumer = %s.consumer,
            "worker started"
        );

        while !shutdown.is_cancelled() {
            if let Err(e) = self.run_iteration(&shutdown).await {
                error!(
                    error = %e,
                    transient = e.is_transient(),
                    backoff_ms = self.retry.delay().as_millis() as u64,
                    "worker iteration failed, retrying"
                );
                self.metrics.record_loop_error(&s.group, &s.consumer);
                if !self.retry.wait(&shutdown).await {
                    break;
                }
            }
        }

        info!(consumer = %s.consumer, "worker stopped");
        Ok(())
    }

    /// One pass: reclaim stale entries and process them, then block for
    /// fresh entries and process those.
    ///
    /// Cancellation abandons the blocking read but never interrupts an
    /// entry already being processed.
    pub async fn run_iteration(&self, shutdown: &CancellationToken) -> StoreResult<IterationReport> {
        let s = &self.settings;
        let mut report = IterationReport::default();

        let claimed = reclaim_stale(
            self.log.as_ref(),
            &s.partition,
            &s.group,
            &s.consumer,
            s.reclaim_idle,
            s.reclaim_batch_size,
        )
        .await?;
        report.claimed = claimed.len();
        self.metrics
            .record_claimed(&s.group, &s.consumer, claimed.len() as u64);
        for entry in &claimed {
            report.record(self.process_isolated(entry).await);
        }

        let fresh = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(report),
            fresh = self.log.read_group(
                &s.partition,
                &s.group,
                &s.consumer,
                s.read_batch_size,
                s.block_timeout,
            ) => fresh?,
        };
        report.delivered = fresh.len();
        for entry in &fresh {
            report.record(self.process_isolated(entry).await);
        }

        Ok(report)
    }

    /// Process one entry, logging any failure instead of propagating it.
    async fn process_isolated(&self, entry: &LogEntry) -> Option<Outcome> {
        match self.processor.process(entry).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "entry left pending");
                self.metrics
                    .record_failed(&self.settings.group, &self.settings.consumer);
                None
            }
        }
    }
}
