//! Key layout in the dedup/stats keyspace.
//!
//! Keys are colon-separated. Group and consumer names are embedded verbatim,
//! matching what existing dashboards and workers already read and write.

/// Dedup marker: `processed:{entry_id}`.
pub fn marker_key(entry_id: &str) -> String {
    format!("processed:{entry_id}")
}

/// Processed counter: `stats:processed:{group}:{consumer}`.
pub fn processed_counter_key(group: &str, consumer: &str) -> String {
    format!("stats:processed:{group}:{consumer}")
}

/// Counter keys for a list of consumers, in order.
pub fn processed_counter_keys(group: &str, consumers: &[String]) -> Vec<String> {
    consumers
        .iter()
        .map(|consumer| processed_counter_key(group, consumer))
        .collect()
}

/// Parse a stored counter value. Unreadable values count as 0.
pub fn parse_count(raw: Option<&str>) -> u64 {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}
