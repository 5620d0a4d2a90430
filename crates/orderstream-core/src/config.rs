use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::ConfigError;

/// Config files searched, in order, when no explicit path is given.
pub const CONFIG_SEARCH_PATHS: [&str; 2] = ["orderstream.toml", "/etc/orderstream/orderstream.toml"];

/// Top-level configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub stream: StreamConfig,
    pub worker: WorkerConfig,
    pub monitor: MonitorConfig,
    pub telemetry: TelemetryConfig,
}

/// Broker connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

/// Which log partition and consumer group to work on.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub partition: String,
    pub group: String,
    /// Approximate cap applied on every append.
    pub max_length: usize,
}

/// Processing loop tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Consumer name within the group. Defaults to `worker-{pid}`.
    pub consumer_name: Option<String>,
    /// Pending entries idle at least this long are claimed by the next
    /// recovery pass.
    pub reclaim_idle_ms: u64,
    pub reclaim_batch_size: usize,
    pub read_batch_size: usize,
    pub block_timeout_ms: u64,
    /// Fixed delay before retrying a failed loop iteration.
    pub retry_backoff_ms: u64,
    /// Simulated processing latency is drawn uniformly from
    /// `[processing_delay_min_ms, processing_delay_max_ms)`. Both 0 disables it.
    pub processing_delay_min_ms: u64,
    pub processing_delay_max_ms: u64,
    /// Optional expiry on dedup markers. None keeps markers forever.
    pub dedup_ttl_secs: Option<u64>,
}

/// Stats refresh loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub refresh_interval_ms: u64,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty in debug builds, JSON in release builds.
    #[default]
    Auto,
    Pretty,
    Json,
}

/// Logging configuration. `RUST_LOG` takes precedence over `log_level`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            partition: "orders:stream".to_string(),
            group: "payment-workers".to_string(),
            max_length: 10_000,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            consumer_name: None,
            reclaim_idle_ms: 120_000,
            reclaim_batch_size: 50,
            read_batch_size: 10,
            block_timeout_ms: 5_000,
            retry_backoff_ms: 1_000,
            processing_delay_min_ms: 100,
            processing_delay_max_ms: 400,
            dedup_ttl_secs: None,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 1_000,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Auto,
        }
    }
}

impl WorkerConfig {
    /// Configured consumer name, or one derived from the process id.
    pub fn consumer_name(&self) -> String {
        self.consumer_name
            .clone()
            .unwrap_or_else(|| format!("worker-{}", std::process::id()))
    }

    pub fn reclaim_idle(&self) -> Duration {
        Duration::from_millis(self.reclaim_idle_ms)
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn dedup_ttl(&self) -> Option<Duration> {
        self.dedup_ttl_secs.map(Duration::from_secs)
    }
}

impl MonitorConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

/// Where [`AppConfig::load`] took its values from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => info!(path = %path.display(), "loaded configuration"),
            ConfigSource::Defaults => info!("no config file found, using defaults"),
        }
    }
}

impl AppConfig {
    /// Parse a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `explicit` if given, otherwise from the first existing
    /// search path, otherwise defaults. Environment overrides are applied
    /// on top and the result is validated.
    ///
    /// Runs before logging is configured, so the caller logs the returned
    /// [`ConfigSource`] once tracing is up.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, ConfigSource), ConfigError> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => CONFIG_SEARCH_PATHS
                .into_iter()
                .map(PathBuf::from)
                .find(|path| path.exists()),
        };
        let (mut config, source) = match path {
            Some(path) => (Self::from_file(&path)?, ConfigSource::File(path)),
            None => (Self::default(), ConfigSource::Defaults),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok((config, source))
    }

    /// Apply `REDIS_URL`, `STREAM`, `GROUP`, `MAX_STREAM_LENGTH` and
    /// `RECLAIM_IDLE_MS` overrides from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("REDIS_URL") {
            self.redis.url = url;
        }
        if let Some(stream) = lookup("STREAM") {
            self.stream.partition = stream;
        }
        if let Some(group) = lookup("GROUP") {
            self.stream.group = group;
        }
        if let Some(raw) = lookup("MAX_STREAM_LENGTH") {
            self.stream.max_length = parse_env("MAX_STREAM_LENGTH", &raw)?;
        }
        if let Some(raw) = lookup("RECLAIM_IDLE_MS") {
            self.worker.reclaim_idle_ms = parse_env("RECLAIM_IDLE_MS", &raw)?;
        }
        Ok(())
    }

    /// Reject values the worker and monitor loops cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.partition.is_empty() {
            return Err(ConfigError::InvalidValue(
                "stream.partition must not be empty".to_string(),
            ));
        }
        if self.stream.group.is_empty() {
            return Err(ConfigError::InvalidValue(
                "stream.group must not be empty".to_string(),
            ));
        }
        if self.stream.max_length == 0 {
            return Err(ConfigError::InvalidValue(
                "stream.max_length must be positive".to_string(),
            ));
        }
        if self.worker.reclaim_batch_size == 0 || self.worker.read_batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "worker batch sizes must be positive".to_string(),
            ));
        }
        if self.worker.processing_delay_min_ms > self.worker.processing_delay_max_ms {
            return Err(ConfigError::InvalidValue(format!(
                "worker.processing_delay_min_ms ({}) exceeds processing_delay_max_ms ({})",
                self.worker.processing_delay_min_ms, self.worker.processing_delay_max_ms
            )));
        }
        if self.monitor.refresh_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "monitor.refresh_interval_ms must be positive".to_string(),
            ));
        }
        if matches!(&self.worker.consumer_name, Some(name) if name.is_empty()) {
            return Err(ConfigError::InvalidValue(
                "worker.consumer_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw:?} is not a valid number")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn default_config_values() {
        let config = AppConfig::default();
        assert_eq!(config.redis.url, "redis://localhost:6379");
        assert_eq!(config.stream.partition, "orders:stream");
        assert_eq!(config.stream.group, "payment-workers");
        assert_eq!(config.stream.max_length, 10_000);
        assert_eq!(config.worker.reclaim_idle_ms, 120_000);
        assert_eq!(config.worker.reclaim_batch_size, 50);
        assert_eq!(config.worker.read_batch_size, 10);
        assert_eq!(config.worker.block_timeout_ms, 5_000);
        assert_eq!(config.worker.retry_backoff_ms, 1_000);
        assert_eq!(config.monitor.refresh_interval_ms, 1_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn consumer_name_defaults_to_process_id() {
        let config = WorkerConfig::default();
        assert_eq!(
            config.consumer_name(),
            format!("worker-{}", std::process::id())
        );
    }

    #[test]
    fn toml_parsing_with_overrides() {
        let toml_str = r#"
            [stream]
            partition = "payments"
            group = "billing"

            [worker]
            consumer_name = "worker-7"
            reclaim_idle_ms = 5000
            dedup_ttl_secs = 3600

            [telemetry]
            log_format = "json"
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.stream.partition, "payments");
        assert_eq!(config.stream.group, "billing");
        assert_eq!(config.worker.consumer_name(), "worker-7");
        assert_eq!(config.worker.reclaim_idle(), Duration::from_secs(5));
        assert_eq!(config.worker.dedup_ttl(), Some(Duration::from_secs(3600)));
        assert_eq!(config.telemetry.log_format, LogFormat::Json);
        // Unset sections keep their defaults
        assert_eq!(config.worker.read_batch_size, 10);
        assert_eq!(config.redis.url, "redis://localhost:6379");
    }

    #[test]
    fn toml_parsing_empty_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.stream.partition, "orders:stream");
        assert_eq!(config.worker.reclaim_batch_size, 50);
    }

    #[test]
    fn env_overrides_apply() {
        let env = HashMap::from([
            ("REDIS_URL", "redis://cache:6380"),
            ("STREAM", "orders:eu"),
            ("GROUP", "eu-workers"),
            ("MAX_STREAM_LENGTH", "500"),
            ("RECLAIM_IDLE_MS", "30000"),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.redis.url, "redis://cache:6380");
        assert_eq!(config.stream.partition, "orders:eu");
        assert_eq!(config.stream.group, "eu-workers");
        assert_eq!(config.stream.max_length, 500);
        assert_eq!(config.worker.reclaim_idle_ms, 30_000);
    }

    #[test]
    fn non_numeric_env_override_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(|key| (key == "RECLAIM_IDLE_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let mut config = AppConfig::default();
        config.worker.read_batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn validate_rejects_inverted_delay_window() {
        let mut config = AppConfig::default();
        config.worker.processing_delay_min_ms = 500;
        config.worker.processing_delay_max_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orderstream.toml");
        std::fs::write(&path, "[monitor]\nrefresh_interval_ms = 250\n").unwrap();
        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.monitor.refresh_interval(), Duration::from_millis(250));
    }

    #[test]
    fn from_file_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[worker\n").unwrap();
        match AppConfig::from_file(&path) {
            Err(ConfigError::Parse { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn load_reports_explicit_file_as_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orderstream.toml");
        std::fs::write(&path, "[stream]\ngroup = \"billing\"\n").unwrap();
        let (_, source) = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(source, ConfigSource::File(path));
    }

    #[test]
    fn load_with_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(ConfigError::Read { .. })
        ));
    }
}
