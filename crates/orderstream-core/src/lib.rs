pub mod config;
pub mod error;
pub mod events;
pub mod item;
pub mod metrics;
pub mod monitor;
pub mod producer;
pub mod shutdown;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use config::AppConfig;
pub use error::{
    BootstrapError, ConfigError, ProcessError, ProduceError, StatsError, StoreError, StoreResult,
};
pub use events::{ChannelSink, EventSink, LogSink, ProcessedEvent};
pub use item::{Fields, LogEntry, Outcome, WorkItem};
pub use metrics::WorkerMetrics;
pub use monitor::{GroupSnapshot, Monitor, MonitorTarget, SnapshotSink, StatsAggregator};
pub use producer::Producer;
pub use store::{DedupStore, LogStore, MemoryStore, RedisStore};
pub use worker::{Worker, WorkerSettings};
