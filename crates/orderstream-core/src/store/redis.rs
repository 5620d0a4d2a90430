use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamInfoConsumersReply,
    StreamInfoGroupsReply, StreamMaxlen, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, Script};
use tracing::{info, warn};

use crate::error::{StoreError, StoreResult};
use crate::item::{Fields, LogEntry};
use crate::store::keys;
use crate::store::traits::{ClaimBatch, ConsumerInfo, DedupStore, GroupInfo, LogStore};

/// Sets the dedup marker only if absent and bumps the consumer's counter only
/// when the marker was newly written. KEYS[1] = marker, KEYS[2] = counter,
/// ARGV[1] = marker TTL in seconds (0 = no expiry).
const MARK_PROCESSED_LUA: &str = r#"
local fresh
if ARGV[1] == "0" then
    fresh = redis.call("SET", KEYS[1], "1", "NX")
else
    fresh = redis.call("SET", KEYS[1], "1", "NX", "EX", ARGV[1])
end
if not fresh then
    return false
end
return redis.call("INCR", KEYS[2])
"#;

/// Log and dedup store backed by Redis streams and string keys.
///
/// Wraps a [`ConnectionManager`]: a command that fails because the
/// connection dropped returns a connection error, and the manager
/// reconnects in the background so the next command goes to a fresh
/// connection. The store is `Clone` and every clone shares the managed
/// connection. A blocking group read occupies it until it returns, so
/// processes that read and inspect concurrently should hold separate stores.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    mark_script: Script,
}

impl RedisStore {
    /// Connect to the Redis server at `url` (e.g. `redis://localhost:6379`).
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(%url, "connected to redis");
        Ok(Self {
            conn,
            mark_script: Script::new(MARK_PROCESSED_LUA),
        })
    }
}

/// Convert a broker entry into a typed entry. Non-string field values are
/// dropped with a warning.
fn to_log_entry(raw: StreamId) -> LogEntry {
    let mut fields = HashMap::with_capacity(raw.map.len());
    for (key, value) in raw.map {
        match redis::from_redis_value::<String>(&value) {
            Ok(value) => {
                fields.insert(key, value);
            }
            Err(e) => warn!(entry_id = %raw.id, field = %key, error = %e, "dropping non-string field"),
        }
    }
    LogEntry::new(raw.id, fields)
}

fn millis(duration: Duration) -> usize {
    usize::try_from(duration.as_millis()).unwrap_or(usize::MAX)
}

#[async_trait]
impl LogStore for RedisStore {
    async fn create_group(&self, partition: &str, group: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let () = conn.xgroup_create_mkstream(partition, group, "$").await?;
        Ok(())
    }

    async fn claim_stale(
        &self,
        partition: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        cursor: &str,
        count: usize,
    ) -> StoreResult<ClaimBatch> {
        let mut conn = self.conn.clone();
        let options = StreamAutoClaimOptions::default().count(count);
        let reply: StreamAutoClaimReply = conn
            .xautoclaim_options(partition, group, consumer, millis(min_idle), cursor, options)
            .await?;

        Ok(ClaimBatch {
            next_cursor: reply.next_stream_id,
            entries: reply.claimed.into_iter().map(to_log_entry).collect(),
        })
    }

    async fn read_group(
        &self,
        partition: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> StoreResult<Vec<LogEntry>> {
        let mut conn = self.conn.clone();
        let mut options = StreamReadOptions::default().group(group, consumer).count(count);
        if !block.is_zero() {
            options = options.block(millis(block));
        }

        // A nil reply means the block timeout elapsed with nothing new.
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[partition], &[">"], &options)
            .await?;

        Ok(reply
            .map(|reply| {
                reply
                    .keys
                    .into_iter()
                    .filter(|key| key.key == partition)
                    .flat_map(|key| key.ids)
                    .map(to_log_entry)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ack(&self, partition: &str, group: &str, entry_id: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let acked: u64 = conn.xack(partition, group, &[entry_id]).await?;
        Ok(acked)
    }

    async fn append(
        &self,
        partition: &str,
        max_length: usize,
        fields: &Fields,
    ) -> StoreResult<String> {
        let mut conn = self.conn.clone();
        let items: Vec<(&str, &str)> = fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        let id: String = conn
            .xadd_maxlen(partition, StreamMaxlen::Approx(max_length), "*", items.as_slice())
            .await?;
        Ok(id)
    }

    async fn stream_length(&self, partition: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let length: u64 = conn.xlen(partition).await?;
        Ok(length)
    }

    async fn group_info(&self, partition: &str) -> StoreResult<Vec<GroupInfo>> {
        let mut conn = self.conn.clone();
        let reply: StreamInfoGroupsReply = match conn.xinfo_groups(partition).await {
            Ok(reply) => reply,
            Err(e) => {
                return match StoreError::from(e) {
                    StoreError::NoSuchKey(_) => Ok(Vec::new()),
                    other => Err(other),
                }
            }
        };

        Ok(reply
            .groups
            .into_iter()
            .map(|group| GroupInfo {
                name: group.name,
                consumers: group.consumers as u64,
                pending: group.pending as u64,
                last_delivered_id: group.last_delivered_id,
            })
            .collect())
    }

    async fn consumer_info(&self, partition: &str, group: &str) -> StoreResult<Vec<ConsumerInfo>> {
        let mut conn = self.conn.clone();
        let reply: StreamInfoConsumersReply = conn.xinfo_consumers(partition, group).await?;

        Ok(reply
            .consumers
            .into_iter()
            .map(|consumer| ConsumerInfo {
                name: consumer.name,
                pending: consumer.pending as u64,
                idle: Duration::from_millis(consumer.idle as u64),
            })
            .collect())
    }
}

#[async_trait]
impl DedupStore for RedisStore {
    async fn is_processed(&self, entry_id: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(keys::marker_key(entry_id)).await?;
        Ok(exists)
    }

    async fn mark_processed(
        &self,
        entry_id: &str,
        group: &str,
        consumer: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<Option<u64>> {
        let mut conn = self.conn.clone();
        let ttl_secs = ttl.map_or(0, |ttl| ttl.as_secs().max(1));
        let index: Option<u64> = self
            .mark_script
            .key(keys::marker_key(entry_id))
            .key(keys::processed_counter_key(group, consumer))
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(index)
    }

    async fn processed_counts(&self, group: &str, consumers: &[String]) -> StoreResult<Vec<u64>> {
        if consumers.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let counter_keys = keys::processed_counter_keys(group, consumers);
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&counter_keys)
            .query_async(&mut conn)
            .await?;
        Ok(raw
            .iter()
            .map(|value| keys::parse_count(value.as_deref()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use redis::Value;
    use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    /// Reply to one command, or `None` to hang up on the client.
    type Handler = dyn Fn(usize, &[String]) -> Option<String> + Send + Sync;

    /// Minimal RESP2 server on a loopback port. `handler` receives the
    /// 1-based connection number and the command with its name uppercased.
    /// Client handshake commands are answered with `+OK`.
    async fn fake_redis<F>(handler: F) -> String
    where
        F: Fn(usize, &[String]) -> Option<String> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler: Arc<Handler> = Arc::new(handler);
        tokio::spawn(async move {
            let mut connection = 0;
            while let Ok((socket, _)) = listener.accept().await {
                connection += 1;
                tokio::spawn(serve(socket, connection, Arc::clone(&handler)));
            }
        });
        format!("redis://{addr}")
    }

    async fn serve(socket: TcpStream, connection: usize, handler: Arc<Handler>) {
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);
        while let Some(mut args) = read_command(&mut reader).await {
            args[0] = args[0].to_ascii_uppercase();
            let reply = match args[0].as_str() {
                "CLIENT" | "PING" => Some("+OK\r\n".to_string()),
                _ => (*handler)(connection, &args),
            };
            let Some(reply) = reply else { return };
            if write.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        }
    }

    async fn read_command<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<Vec<String>> {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let count: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            line.clear();
            reader.read_line(&mut line).await.ok()?;
            let len: usize = line.trim_end().strip_prefix('$')?.parse().ok()?;
            let mut buf = vec![0; len + 2];
            reader.read_exact(&mut buf).await.ok()?;
            buf.truncate(len);
            args.push(String::from_utf8(buf).ok()?);
        }
        Some(args)
    }

    fn bulk(value: &str) -> String {
        format!("${}\r\n{value}\r\n", value.len())
    }

    fn array(items: &[String]) -> String {
        let mut out = format!("*{}\r\n", items.len());
        for item in items {
            out.push_str(item);
        }
        out
    }

    fn unexpected(args: &[String]) -> Option<String> {
        Some(format!("-ERR unexpected command {}\r\n", args[0]))
    }

    #[test]
    fn non_string_values_are_dropped() {
        let raw = StreamId {
            id: "5-0".to_string(),
            map: HashMap::from([
                ("data".to_string(), Value::BulkString(b"{}".to_vec())),
                ("trace".to_string(), Value::Nil),
            ]),
        };
        let entry = to_log_entry(raw);
        assert_eq!(entry.id, "5-0");
        assert_eq!(entry.fields.get("data").map(String::as_str), Some("{}"));
        assert!(!entry.fields.contains_key("trace"));
    }

    #[tokio::test]
    async fn reconnects_after_dropped_connection() {
        // The first connection is cut mid-command; later ones answer.
        let url = fake_redis(|connection, args| match args[0].as_str() {
            "XLEN" if connection == 1 => None,
            "XLEN" => Some(":7\r\n".to_string()),
            _ => unexpected(args),
        })
        .await;
        let store = RedisStore::connect(&url).await.unwrap();

        let err = store.stream_length("orders:stream").await.unwrap_err();
        assert!(err.is_transient(), "{err}");

        let mut length = None;
        for _ in 0..20 {
            match store.stream_length("orders:stream").await {
                Ok(n) => {
                    length = Some(n);
                    break;
                }
                Err(e) => assert!(e.is_transient(), "{e}"),
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(length, Some(7));
    }

    #[tokio::test]
    async fn timed_out_group_read_is_empty() {
        let url = fake_redis(|_, args| match args[0].as_str() {
            "XREADGROUP" => Some("*-1\r\n".to_string()),
            _ => unexpected(args),
        })
        .await;
        let store = RedisStore::connect(&url).await.unwrap();

        let entries = store
            .read_group("orders:stream", "payments", "w1", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn group_read_keeps_last_duplicate_field() {
        let url = fake_redis(|_, args| match args[0].as_str() {
            "XREADGROUP" => {
                let fields = array(&[bulk("data"), bulk("first"), bulk("data"), bulk("second")]);
                let entry = array(&[bulk("1-0"), fields]);
                let stream = array(&[bulk("orders:stream"), array(&[entry])]);
                Some(array(&[stream]))
            }
            _ => unexpected(args),
        })
        .await;
        let store = RedisStore::connect(&url).await.unwrap();

        let entries = store
            .read_group("orders:stream", "payments", "w1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "1-0");
        assert_eq!(entries[0].fields.get("data").map(String::as_str), Some("second"));
    }

    #[tokio::test]
    async fn missing_partition_has_no_groups() {
        let url = fake_redis(|_, args| match args[0].as_str() {
            "XINFO" => Some("-ERR no such key\r\n".to_string()),
            _ => unexpected(args),
        })
        .await;
        let store = RedisStore::connect(&url).await.unwrap();

        assert!(store.group_info("orders:missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_processed_maps_script_reply() {
        // KEYS[1] is the marker; an existing marker makes the script return nil.
        let url = fake_redis(|_, args| match args[0].as_str() {
            "EVALSHA" if args[3] == keys::marker_key("1-0") => Some("$-1\r\n".to_string()),
            "EVALSHA" if args[4] == keys::processed_counter_key("payments", "w1") => {
                Some(format!(":{}\r\n", if args[5] == "90" { 4 } else { 3 }))
            }
            _ => unexpected(args),
        })
        .await;
        let store = RedisStore::connect(&url).await.unwrap();

        assert_eq!(store.mark_processed("1-0", "payments", "w1", None).await.unwrap(), None);
        assert_eq!(
            store.mark_processed("2-0", "payments", "w1", None).await.unwrap(),
            Some(3)
        );
        assert_eq!(
            store
                .mark_processed("3-0", "payments", "w1", Some(Duration::from_secs(90)))
                .await
                .unwrap(),
            Some(4)
        );
    }
}
