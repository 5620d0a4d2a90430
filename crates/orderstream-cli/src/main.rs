mod dashboard;

use std::io::Write as _;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use orderstream_core::config::ConfigSource;
use orderstream_core::monitor::TargetReport;
use orderstream_core::producer::sample_item;
use orderstream_core::shutdown::shutdown_signal;
use orderstream_core::telemetry::init_tracing;
use orderstream_core::{
    AppConfig, Monitor, MonitorTarget, Producer, RedisStore, SnapshotSink, StatsAggregator,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "orderstream", about = "Order stream producer and consumer-group monitor")]
struct Cli {
    /// Redis URL
    #[arg(long, global = true)]
    redis_url: Option<String>,

    /// Config file [default: orderstream.toml, then /etc/orderstream/orderstream.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append synthetic orders to a stream
    Produce {
        /// Stream to append to
        #[arg(long)]
        stream: Option<String>,

        /// Number of orders to append
        #[arg(long, default_value = "100")]
        count: u64,

        /// Pause between appends in milliseconds
        #[arg(long, default_value = "50")]
        delay_ms: u64,
    },

    /// Print a one-shot snapshot of a consumer group
    Stats {
        /// Stream name
        #[arg(long)]
        stream: Option<String>,

        /// Consumer group
        #[arg(long)]
        group: Option<String>,

        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Continuously display consumer group statistics
    Monitor {
        /// Stream for --group
        #[arg(long)]
        stream: Option<String>,

        /// Groups to watch on --stream (repeatable)
        #[arg(long, num_args = 1..)]
        group: Vec<String>,

        /// Additional STREAM=GROUP[,GROUP...] target (repeatable)
        #[arg(long, value_parser = parse_target)]
        target: Vec<MonitorTarget>,

        /// Refresh interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

/// Parse `STREAM=GROUP[,GROUP...]`.
fn parse_target(raw: &str) -> Result<MonitorTarget, String> {
    let (stream, groups) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected STREAM=GROUP[,GROUP...], got \"{raw}\""))?;
    if stream.is_empty() {
        return Err(format!("missing stream name in \"{raw}\""));
    }
    let groups: Vec<String> = groups
        .split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect();
    if groups.is_empty() {
        return Err(format!("no groups given for stream \"{stream}\""));
    }
    Ok(MonitorTarget::new(stream, groups))
}

/// Targets from the flags; falls back to the configured stream and group
/// when none are given.
fn monitor_targets(
    config: &AppConfig,
    stream: Option<String>,
    groups: Vec<String>,
    mut targets: Vec<MonitorTarget>,
) -> Vec<MonitorTarget> {
    let stream = stream.unwrap_or_else(|| config.stream.partition.clone());
    if !groups.is_empty() {
        targets.insert(0, MonitorTarget::new(stream, groups));
    } else if targets.is_empty() {
        targets.push(MonitorTarget::new(stream, vec![config.stream.group.clone()]));
    }
    targets
}

fn load_config(
    cli_config: Option<&std::path::Path>,
    redis_url: Option<String>,
) -> (AppConfig, ConfigSource) {
    let (mut config, source) = match AppConfig::load(cli_config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    if let Some(url) = redis_url {
        config.redis.url = url;
    }
    (config, source)
}

async fn connect(url: &str) -> Arc<RedisStore> {
    match RedisStore::connect(url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Error: cannot connect to redis at {url}: {e}");
            process::exit(1);
        }
    }
}

async fn cmd_produce(config: &AppConfig, stream: String, count: u64, delay: Duration) {
    let store = connect(&config.redis.url).await;
    let producer = Producer::new(store, config.stream.max_length);

    for n in 1..=count {
        let item = sample_item();
        match producer.append(&stream, &item).await {
            Ok(entry_id) => println!("#{n}  {entry_id}  {}  {}", item.id, item.name),
            Err(e) => {
                eprintln!("Error: append to \"{stream}\" failed: {e}");
                process::exit(1);
            }
        }
        if !delay.is_zero() && n < count {
            tokio::time::sleep(delay).await;
        }
    }
    info!(%stream, count, "produced orders");
}

async fn cmd_stats(config: &AppConfig, stream: String, group: String, json: bool) {
    let store = connect(&config.redis.url).await;
    let aggregator = StatsAggregator::new(store.clone(), store);

    match aggregator.snapshot(&stream, &group).await {
        Ok(snapshot) if json => match serde_json::to_string_pretty(&snapshot) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        },
        Ok(snapshot) => {
            let mut out = String::new();
            dashboard::render_snapshot(&mut out, &snapshot);
            print!("{out}");
        }
        Err(e) => {
            eprintln!("{}", dashboard::error_line(&e));
            process::exit(1);
        }
    }
}

/// Redraws the whole terminal each cycle.
struct ConsoleSink;

impl SnapshotSink for ConsoleSink {
    fn render(&self, reports: &[TargetReport]) {
        let out = dashboard::render_reports(reports);
        let mut stdout = std::io::stdout().lock();
        let _ = write!(stdout, "{}{out}", dashboard::CLEAR_SCREEN);
        let _ = stdout.flush();
    }
}

async fn cmd_monitor(config: &AppConfig, targets: Vec<MonitorTarget>, interval: Duration) {
    let store = connect(&config.redis.url).await;
    let monitor = Monitor::new(StatsAggregator::new(store.clone(), store), targets, interval);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    monitor.run(&ConsoleSink, shutdown).await;
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let (config, source) = load_config(cli.config.as_deref(), cli.redis_url);
    init_tracing(&config.telemetry);
    source.log();

    match cli.command {
        Commands::Produce {
            stream,
            count,
            delay_ms,
        } => {
            let stream = stream.unwrap_or_else(|| config.stream.partition.clone());
            cmd_produce(&config, stream, count, Duration::from_millis(delay_ms)).await
        }
        Commands::Stats {
            stream,
            group,
            json,
        } => {
            let stream = stream.unwrap_or_else(|| config.stream.partition.clone());
            let group = group.unwrap_or_else(|| config.stream.group.clone());
            cmd_stats(&config, stream, group, json).await
        }
        Commands::Monitor {
            stream,
            group,
            target,
            interval_ms,
        } => {
            let interval = interval_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.monitor.refresh_interval());
            if interval.is_zero() {
                eprintln!("Error: --interval-ms must be positive");
                process::exit(1);
            }
            let targets = monitor_targets(&config, stream, group, target);
            cmd_monitor(&config, targets, interval).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_with_several_groups() {
        let target = parse_target("orders:stream=payments, billing").unwrap();
        assert_eq!(target.partition, "orders:stream");
        assert_eq!(target.groups, vec!["payments", "billing"]);
    }

    #[test]
    fn target_requires_stream_and_groups() {
        assert!(parse_target("orders").is_err());
        assert!(parse_target("=payments").is_err());
        assert!(parse_target("orders=").is_err());
    }

    #[test]
    fn monitor_defaults_to_configured_pair() {
        let config = AppConfig::default();
        let targets = monitor_targets(&config, None, Vec::new(), Vec::new());
        assert_eq!(
            targets,
            vec![MonitorTarget::new(
                "orders:stream",
                vec!["payment-workers".to_string()]
            )]
        );
    }

    #[test]
    fn monitor_flags_combine() {
        let cli = Cli::parse_from([
            "orderstream",
            "monitor",
            "--stream",
            "orders:eu",
            "--group",
            "g1",
            "g2",
            "--target",
            "refunds=r1",
        ]);
        let Commands::Monitor {
            stream,
            group,
            target,
            ..
        } = cli.command
        else {
            panic!("expected monitor command");
        };
        let targets = monitor_targets(&AppConfig::default(), stream, group, target);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].partition, "orders:eu");
        assert_eq!(targets[0].groups, vec!["g1", "g2"]);
        assert_eq!(targets[1].partition, "refunds");
    }
}
