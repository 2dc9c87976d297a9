//! Basin Sink
//!
//! The write side of Basin: ingests an ordered, partitioned log of records
//! from an upstream message bus and materializes them in a distributed file
//! store as immutable, offset-named files, exactly once.
//!
//! ## Architecture
//!
//! - **Config**: [`SinkConfig`] parses the task configuration once at startup.
//! - **Context**: [`SinkContext`] is the control surface of the upstream log
//!   client (pause/resume/seek/backoff); the framework implements it.
//! - **Writer**: [`SinkWriter`] owns the assigned partitions and drives each
//!   one's state machine: WAL replay on recovery, buffered writes into temp
//!   artifacts, atomic commits under offset-range names.
//!
//! ## Guarantees
//!
//! For every partition, committed files cover strictly increasing, contiguous
//! offset ranges with no gaps or overlaps, and each consumed record lands in
//! exactly one committed file - across crashes, retries, and partition
//! reassignment.

pub mod config;
pub mod context;
pub mod error;
pub mod writer;

pub use config::SinkConfig;
pub use context::SinkContext;
pub use error::{Result, SinkError};
pub use writer::{SinkWriter, WriteState};
