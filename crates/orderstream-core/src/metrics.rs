use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;

/// OTel counters for the processing loop. Created once per worker and
/// labelled with the group and consumer on every recording.
#[derive(Clone)]
pub struct WorkerMetrics {
    pub entries_processed: Counter<u64>,
    pub entries_skipped: Counter<u64>,
    pub entries_claimed: Counter<u64>,
    pub entries_acked: Counter<u64>,
    pub entries_failed: Counter<u64>,
    pub loop_errors: Counter<u64>,
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerMetrics {
    /// Create metrics from the global meter provider. If no meter provider
    /// is configured, the instruments are no-op.
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("orderstream");
        Self::from_meter(&meter)
    }

    /// Create metrics from a specific meter (used in tests with in-memory exporter).
    pub fn from_meter(meter: &Meter) -> Self {
        Self {
            entries_processed: meter
                .u64_counter("orderstream.entries.processed")
                .with_description("Entries processed for the first time")
                .build(),
            entries_skipped: meter
                .u64_counter("orderstream.entries.skipped")
                .with_description("Entries acknowledged without processing (already marked)")
                .build(),
            entries_claimed: meter
                .u64_counter("orderstream.entries.claimed")
                .with_description("Stale pending entries reassigned to this consumer")
                .build(),
            entries_acked: meter
                .u64_counter("orderstream.entries.acked")
                .with_description("Entries acknowledged to the group")
                .build(),
            entries_failed: meter
                .u64_counter("orderstream.entries.failed")
                .with_description("Entries left pending after a processing error")
                .build(),
            loop_errors: meter
                .u64_counter("orderstream.loop.errors")
                .with_description("Loop iterations aborted by a store error")
                .build(),
        }
    }

    fn labels(group: &str, consumer: &str) -> [KeyValue; 2] {
        [
            KeyValue::new("group", group.to_string()),
            KeyValue::new("consumer", consumer.to_string()),
        ]
    }

    pub fn record_processed(&self, group: &str, consumer: &str) {
        self.entries_processed.add(1, &Self::labels(group, consumer));
    }

    pub fn record_skipped(&self, group: &str, consumer: &str) {
        self.entries_skipped.add(1, &Self::labels(group, consumer));
    }

    pub fn record_claimed(&self, group: &str, consumer: &str, count: u64) {
        if count > 0 {
            self.entries_claimed
                .add(count, &Self::labels(group, consumer));
        }
    }

    pub fn record_acked(&self, group: &str, consumer: &str) {
        self.entries_acked.add(1, &Self::labels(group, consumer));
    }

    pub fn record_failed(&self, group: &str, consumer: &str) {
        self.entries_failed.add(1, &Self::labels(group, consumer));
    }

    pub fn record_loop_error(&self, group: &str, consumer: &str) {
        self.loop_errors.add(1, &Self::labels(group, consumer));
    }
}
