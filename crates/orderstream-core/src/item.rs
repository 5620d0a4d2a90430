use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProcessError;

/// Field map of a log entry, decoded once at the store boundary.
pub type Fields = HashMap<String, String>;

/// An order. Serialized as JSON into the `data` field of a log entry and
/// never mutated after it has been appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItem {
    pub id: String,
    pub customer: String,
    pub name: String,
    pub amount: i64,
    pub timestamp: DateTime<Utc>,
}

impl WorkItem {
    /// Encode the item as the field map of a new log entry.
    pub fn to_fields(&self) -> Result<Fields, serde_json::Error> {
        let data = serde_json::to_string(self)?;
        Ok(HashMap::from([(LogEntry::DATA_FIELD.to_string(), data)]))
    }
}

/// A delivered or claimed log entry. `id` is broker-assigned and ordered
/// within its partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: String,
    pub fields: Fields,
}

impl LogEntry {
    /// Field holding the serialized `WorkItem`.
    pub const DATA_FIELD: &'static str = "data";

    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Decode the `WorkItem` payload. A missing `data` field and an
    /// undeserializable payload are both `MalformedEntry`.
    pub fn work_item(&self) -> Result<WorkItem, ProcessError> {
        let raw = self
            .fields
            .get(Self::DATA_FIELD)
            .ok_or_else(|| ProcessError::MalformedEntry {
                entry_id: self.id.clone(),
                reason: "missing data field".to_string(),
            })?;

        serde_json::from_str(raw).map_err(|e| ProcessError::MalformedEntry {
            entry_id: self.id.clone(),
            reason: e.to_string(),
        })
    }
}

/// Result of running one entry through the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// First completion for this entry; carries the consumer's new processed count.
    Processed { index: u64 },
    /// A dedup marker already existed; the entry was acknowledged without counting.
    Skipped,
}
