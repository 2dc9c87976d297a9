//! Record Data Structure
//!
//! A [`SinkRecord`] is a single message consumed from the upstream log and
//! handed to the sink for materialization. Each record carries its position
//! (`offset`) within its partition; offsets are monotonically non-decreasing
//! and drive the offset-range naming of committed files.
//!
//! Uses `bytes::Bytes` for the key and value so records can be cloned and
//! buffered without copying payloads.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single record delivered by the upstream log for writing to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkRecord {
    /// Topic the record was consumed from.
    pub topic: String,

    /// Partition within the topic.
    pub partition: u32,

    /// Offset within the partition.
    pub offset: u64,

    /// Timestamp in milliseconds since epoch.
    pub timestamp: u64,

    /// Optional record key.
    pub key: Option<Bytes>,

    /// Record value (payload).
    pub value: Bytes,
}

impl SinkRecord {
    pub fn new(
        topic: impl Into<String>,
        partition: u32,
        offset: u64,
        timestamp: u64,
        key: Option<Bytes>,
        value: Bytes,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            timestamp,
            key,
            value,
        }
    }
}
