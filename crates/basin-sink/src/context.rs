//! Upstream Control Surface
//!
//! The sink never polls the upstream log itself; the surrounding framework
//! delivers batches and exposes this narrow control interface back to the
//! pipeline. Pause and resume are idempotent delivery toggles, `seek` sets
//! the next delivery position after recovery, and `request_backoff` is an
//! advisory delay before the next poll.
//!
//! Implementations report operations on partitions the worker does not own
//! as [`SinkError::IllegalWorkerState`](crate::SinkError::IllegalWorkerState),
//! which the pipeline treats as non-retryable.

use std::collections::HashSet;

use basin_core::TopicPartition;

use crate::error::Result;

/// Control surface of the upstream log client.
pub trait SinkContext: Send + Sync {
    /// Partitions currently assigned to this task.
    fn assignment(&self) -> HashSet<TopicPartition>;

    /// Suspend delivery for `tp`. Idempotent.
    fn pause(&self, tp: &TopicPartition) -> Result<()>;

    /// Resume delivery for `tp`. Idempotent.
    fn resume(&self, tp: &TopicPartition) -> Result<()>;

    /// Set the next delivery position for `tp`.
    fn seek(&self, tp: &TopicPartition, offset: u64) -> Result<()>;

    /// Ask the upstream to delay its next poll.
    fn request_backoff(&self, ms: u64);
}
