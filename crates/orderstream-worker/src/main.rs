use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use orderstream_core::shutdown::shutdown_signal;
use orderstream_core::telemetry::init_tracing;
use orderstream_core::{AppConfig, EventSink, ProcessedEvent, RedisStore, Worker, WorkerSettings};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "orderstream-worker", about = "Consume orders from a stream as part of a consumer group")]
struct Cli {
    /// Stream (log partition) to consume
    #[arg(long)]
    stream: Option<String>,

    /// Consumer group to join
    #[arg(long)]
    group: Option<String>,

    /// Consumer name within the group [default: worker-{pid}]
    #[arg(long)]
    name: Option<String>,

    /// Redis URL
    #[arg(long)]
    redis_url: Option<String>,

    /// Config file [default: orderstream.toml, then /etc/orderstream/orderstream.toml]
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn apply(self, config: &mut AppConfig) {
        if let Some(stream) = self.stream {
            config.stream.partition = stream;
        }
        if let Some(group) = self.group {
            config.stream.group = group;
        }
        if let Some(name) = self.name {
            config.worker.consumer_name = Some(name);
        }
        if let Some(url) = self.redis_url {
            config.redis.url = url;
        }
    }
}

/// Prints one line per finished entry.
struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn record(&self, event: ProcessedEvent) {
        println!("{}", event.display_line());
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (mut config, source) = match AppConfig::load(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    cli.apply(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    init_tracing(&config.telemetry);
    source.log();

    let store = match RedisStore::connect(&config.redis.url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(url = %config.redis.url, error = %e, "cannot connect to redis");
            std::process::exit(1);
        }
    };

    let settings = WorkerSettings::from_config(&config);
    info!(
        stream = %settings.partition,
        group = %settings.group,
        consumer = %settings.consumer,
        "joining consumer group"
    );
    let worker = Worker::new(store.clone(), store.clone(), Arc::new(ConsoleSink), settings);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let result = worker.run(shutdown).await;

    drop(worker);
    drop(store);
    info!("connection closed");

    result.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "orderstream-worker",
            "--stream",
            "orders:eu",
            "--group",
            "eu-workers",
            "--name",
            "w9",
        ]);
        let mut config = AppConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.stream.partition, "orders:eu");
        assert_eq!(config.stream.group, "eu-workers");
        assert_eq!(config.worker.consumer_name(), "w9");
        assert_eq!(config.redis.url, "redis://localhost:6379");
    }

    #[test]
    fn no_flags_keep_config() {
        let cli = Cli::parse_from(["orderstream-worker"]);
        let mut config = AppConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.stream.partition, "orders:stream");
        assert!(config.worker.consumer_name.is_none());
    }
}
