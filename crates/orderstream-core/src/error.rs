use std::path::PathBuf;

/// Low-level store errors (broker round trips, reply decoding).
/// This is the error type for the `LogStore` and `DedupStore` traits. Store
/// operations fail with infrastructure errors or with the broker's own
/// group-state errors, never with processing errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("consumer group already exists: {0}")]
    GroupAlreadyExists(String),

    #[error("no such consumer group: {0}")]
    NoSuchGroup(String),

    #[error("no such key: {0}")]
    NoSuchKey(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl StoreError {
    /// Connection-level failures are worth retrying; everything else is a
    /// statement about broker state that a retry will not change.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        let message = err.to_string();
        // Server error codes outside the known set surface as extension errors,
        // so match on the rendered message as well as the parsed code.
        if err.code() == Some("BUSYGROUP") || message.contains("BUSYGROUP") {
            StoreError::GroupAlreadyExists(message)
        } else if err.code() == Some("NOGROUP") || message.contains("NOGROUP") {
            StoreError::NoSuchGroup(message)
        } else if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
        {
            StoreError::Connection(message)
        } else if message.contains("no such key") {
            StoreError::NoSuchKey(message)
        } else {
            StoreError::Protocol(message)
        }
    }
}

// --- Per-operation error types ---

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("malformed entry {entry_id}: {reason}")]
    MalformedEntry { entry_id: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("group {group} not found in stream {partition}")]
    GroupNotFound { partition: String, group: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum ProduceError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("error reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidValue(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
