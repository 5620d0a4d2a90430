//! Periodic cross-worker statistics.

mod aggregator;
mod stats;

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use aggregator::StatsAggregator;
pub use stats::{
    idle_seconds, sort_by_processed, ConsumerStat, GroupSnapshot, MonitorTarget, TargetReport,
};

/// Receives the reports of each refresh cycle, in target order.
pub trait SnapshotSink: Send + Sync {
    fn render(&self, reports: &[TargetReport]);
}

/// Refreshes snapshots for a fixed set of targets on a fixed interval.
pub struct Monitor {
    aggregator: StatsAggregator,
    targets: Vec<MonitorTarget>,
    interval: Duration,
}

impl Monitor {
    pub fn new(aggregator: StatsAggregator, targets: Vec<MonitorTarget>, interval: Duration) -> Self {
        Self {
            aggregator,
            targets,
            interval,
        }
    }

    /// One independent refresh cycle.
    pub async fn run_cycle(&self) -> Vec<TargetReport> {
        self.aggregator.snapshot_all(&self.targets).await
    }

    /// Render a cycle every interval until `shutdown` is cancelled. A slow
    /// cycle delays the next tick instead of bunching ticks up.
    pub async fn run(&self, sink: &dyn SnapshotSink, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let reports = self.run_cycle().await;
                    sink.render(&reports);
                }
            }
        }
        info!("monitor stopped");
    }
}
