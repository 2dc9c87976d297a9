//! Partition Identity
//!
//! A `(topic, partition)` pair names one ordered, independently-assignable
//! substream of the upstream log. The pair is stable for the lifetime of the
//! partition within a process and is used as the key for every piece of
//! per-partition state in the sink.

use serde::{Deserialize, Serialize};

/// Identity of a single partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    /// Topic name.
    pub topic: String,

    /// Partition ID within the topic.
    pub partition: u32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl std::fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}
