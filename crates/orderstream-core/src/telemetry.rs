use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, TelemetryConfig};

/// Initialize the tracing subscriber for structured logging.
///
/// - `LogFormat::Auto`: pretty output in debug builds, JSON in release builds
/// - `LogFormat::Pretty` / `LogFormat::Json`: forced
///
/// `RUST_LOG` takes precedence over the configured level. Output goes to
/// stderr so stdout stays free for per-entry lines and the dashboard.
pub fn init_tracing(config: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let json = match config.log_format {
        LogFormat::Auto => !cfg!(debug_assertions),
        LogFormat::Pretty => false,
        LogFormat::Json => true,
    };

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    }
}
