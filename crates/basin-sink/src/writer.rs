//! Sink Write Pipeline
//!
//! Implements the per-partition state machine and the [`SinkWriter`]
//! coordinator that drives it.
//!
//! ## Pipeline Flow
//!
//! ```text
//! write(batch)
//!     ↓
//! buffer per partition
//!     ↓
//! recover()              ← WAL replay + offset reset, once per assignment
//!     ↓
//! drain()                ← write records into an open temp artifact
//!     ↓ flush.size reached
//! close temp → WAL.append(temp, dest) → Storage.commit → high water advances
//! ```
//!
//! Every state transition happens only after its step succeeds, so a storage
//! failure leaves the state variable at the failing step and the next `write`
//! call resumes exactly there. Failed partitions back off individually;
//! healthy partitions keep making progress.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use basin_core::{SinkRecord, TopicPartition};
use basin_storage::naming;
use basin_storage::storage::Storage;
use basin_storage::wal::Wal;
use basin_storage::writer::{RecordWriter, RecordWriterProvider};

use crate::config::SinkConfig;
use crate::context::SinkContext;
use crate::error::{Result, SinkError};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Linear progression of the per-partition pipeline.
///
/// The recovery states precede the write states; ordering is significant:
/// `state < WriteState::WriteStarted` means the partition has not finished
/// recovery yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WriteState {
    RecoveryStarted,
    RecoveryPartitionPaused,
    WalCreated,
    WalApplied,
    WalTruncated,
    OffsetReset,
    WriteStarted,
    WritePartitionPaused,
    ShouldRotate,
    TempFileClosed,
    WalAppended,
    FileCommitted,
}

impl WriteState {
    fn next(self) -> WriteState {
        match self {
            WriteState::RecoveryStarted => WriteState::RecoveryPartitionPaused,
            WriteState::RecoveryPartitionPaused => WriteState::WalCreated,
            WriteState::WalCreated => WriteState::WalApplied,
            WriteState::WalApplied => WriteState::WalTruncated,
            WriteState::WalTruncated => WriteState::OffsetReset,
            WriteState::OffsetReset => WriteState::WriteStarted,
            WriteState::WriteStarted => WriteState::WritePartitionPaused,
            WriteState::WritePartitionPaused => WriteState::ShouldRotate,
            WriteState::ShouldRotate => WriteState::TempFileClosed,
            WriteState::TempFileClosed => WriteState::WalAppended,
            WriteState::WalAppended => WriteState::FileCommitted,
            WriteState::FileCommitted => WriteState::WritePartitionPaused,
        }
    }
}

/// All runtime state for one assigned partition.
///
/// Fields are co-located in a single struct so the whole partition can be
/// created on assignment and dropped on revocation atomically.
struct PartitionState {
    tp: TopicPartition,
    state: WriteState,
    buffer: VecDeque<SinkRecord>,
    writer: Option<Box<dyn RecordWriter>>,
    temp_path: Option<String>,
    temp_start: Option<u64>,
    wal: Option<Box<dyn Wal>>,
    high_water: Option<u64>,
    records_in_temp: u64,
    recovered: bool,
    failure_time: Option<Instant>,
}

impl PartitionState {
    fn new(tp: TopicPartition) -> Self {
        Self {
            tp,
            state: WriteState::RecoveryStarted,
            buffer: VecDeque::new(),
            writer: None,
            temp_path: None,
            temp_start: None,
            wal: None,
            high_water: None,
            records_in_temp: 0,
            recovered: false,
            failure_time: None,
        }
    }

    /// Buffer an incoming record.
    ///
    /// After recovery the upstream is positioned at `high_water + 1`, so a
    /// record at or below the high-water mark is a replay of data already in
    /// a committed file and is dropped here.
    fn enqueue(&mut self, record: SinkRecord) {
        if self.recovered {
            if let Some(hw) = self.high_water {
                if record.offset <= hw {
                    return;
                }
            }
        }
        self.buffer.push_back(record);
    }

    fn wal_mut(&mut self) -> Result<&mut dyn Wal> {
        if self.wal.is_none() {
            return Err(SinkError::IllegalWorkerState(format!(
                "no open WAL for {}",
                self.tp
            )));
        }
        Ok(self.wal.as_deref_mut().unwrap())
    }

    /// Run the recovery sub-machine to completion.
    ///
    /// Each step advances the state only on success; a failure leaves the
    /// state at the failing step and the next attempt resumes there.
    async fn recover(
        &mut self,
        storage: &Arc<dyn Storage>,
        context: &dyn SinkContext,
        topics_dir: &str,
    ) -> Result<()> {
        while self.state < WriteState::WriteStarted {
            match self.state {
                WriteState::RecoveryStarted => {
                    context.pause(&self.tp)?;
                }
                WriteState::RecoveryPartitionPaused => {
                    if self.wal.is_none() {
                        self.wal = Some(storage.open_wal(&self.tp).await?);
                    }
                }
                WriteState::WalCreated => {
                    if !self.recovered {
                        let storage = storage.as_ref();
                        self.wal_mut()?.apply(storage).await?;
                    }
                }
                WriteState::WalApplied => {
                    if !self.recovered {
                        self.wal_mut()?.truncate().await?;
                    }
                }
                WriteState::WalTruncated => {
                    if !self.recovered {
                        self.read_offsets(storage.as_ref(), topics_dir).await?;
                        if let Some(hw) = self.high_water {
                            context.seek(&self.tp, hw + 1)?;
                        }
                    }
                }
                WriteState::OffsetReset => {
                    context.resume(&self.tp)?;
                    self.recovered = true;
                }
                _ => unreachable!("recovery entered in state {:?}", self.state),
            }
            self.state = self.state.next();
        }

        info!(
            topic = %self.tp.topic,
            partition = self.tp.partition,
            high_water = ?self.high_water,
            "Partition recovered"
        );
        Ok(())
    }

    /// Initialize the high-water mark from the committed files in the store.
    async fn read_offsets(&mut self, storage: &dyn Storage, topics_dir: &str) -> Result<()> {
        let dir = naming::directory_name(topics_dir, &self.tp);
        for name in storage.list(&dir).await? {
            if let Some((_start, end)) = naming::parse_committed(&name) {
                if self.high_water.map_or(true, |hw| end > hw) {
                    self.high_water = Some(end);
                }
            }
        }
        Ok(())
    }

    /// Run the write sub-machine until the buffer drains.
    ///
    /// Exits only from `WriteStarted`/`WritePartitionPaused` with an empty
    /// buffer, so a rotation triggered by the last buffered record still runs
    /// to commit before the drain finishes.
    async fn drain(
        &mut self,
        storage: &Arc<dyn Storage>,
        provider: &dyn RecordWriterProvider,
        context: &dyn SinkContext,
        config: &SinkConfig,
    ) -> Result<()> {
        loop {
            match self.state {
                WriteState::WriteStarted => {
                    if self.buffer.is_empty() {
                        break;
                    }
                    context.pause(&self.tp)?;
                    self.state = self.state.next();
                }
                WriteState::WritePartitionPaused => {
                    if self.buffer.is_empty() {
                        break;
                    }
                    self.write_next(storage, provider, config).await?;
                    if self.records_in_temp >= config.flush_size as u64 {
                        self.state = self.state.next();
                    }
                }
                WriteState::ShouldRotate => {
                    self.close_temp_file().await?;
                    self.state = self.state.next();
                }
                WriteState::TempFileClosed => {
                    let (temp, dest) = self.pending_commit(provider, config)?;
                    self.wal_mut()?.append(&temp, &dest).await?;
                    self.state = self.state.next();
                }
                WriteState::WalAppended => {
                    self.commit_file(storage.as_ref(), provider, config).await?;
                    self.state = self.state.next();
                }
                WriteState::FileCommitted => {
                    self.state = WriteState::WritePartitionPaused;
                }
                _ => {
                    return Err(SinkError::IllegalWorkerState(format!(
                        "{:?} is not a valid state to write records for {}",
                        self.state, self.tp
                    )))
                }
            }
        }

        context.resume(&self.tp)?;
        self.state = WriteState::WriteStarted;
        Ok(())
    }

    /// Write the head of the buffer, opening a writer and temp artifact if
    /// none is open.
    async fn write_next(
        &mut self,
        storage: &Arc<dyn Storage>,
        provider: &dyn RecordWriterProvider,
        config: &SinkConfig,
    ) -> Result<()> {
        let record = match self.buffer.front() {
            Some(record) => record.clone(),
            None => return Ok(()),
        };

        if self.writer.is_none() {
            let temp = naming::temp_file_name(&config.topics_dir, &self.tp);
            let writer = provider
                .new_writer(Arc::clone(storage), &temp, &record)
                .await?;
            self.temp_path = Some(temp);
            self.temp_start = Some(match self.high_water {
                Some(hw) => hw + 1,
                None => record.offset,
            });
            self.records_in_temp = 0;
            self.writer = Some(writer);
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.write(now_ms(), &record).await?;
        }
        self.buffer.pop_front();
        self.records_in_temp += 1;
        Ok(())
    }

    /// Close the open record writer, materializing the temp artifact.
    ///
    /// On failure the writer is kept so the close can be retried.
    async fn close_temp_file(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.close().await {
                self.writer = Some(writer);
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Temp and committed paths for the rotation currently in flight.
    fn pending_commit(
        &self,
        provider: &dyn RecordWriterProvider,
        config: &SinkConfig,
    ) -> Result<(String, String)> {
        let temp = self.temp_path.clone().ok_or_else(|| {
            SinkError::IllegalWorkerState(format!("no open temp artifact for {}", self.tp))
        })?;
        let start = self.temp_start.ok_or_else(|| {
            SinkError::IllegalWorkerState(format!("no start offset recorded for {}", self.tp))
        })?;
        let end = start + self.records_in_temp - 1;
        let dest = naming::committed_file_name(
            &config.topics_dir,
            &self.tp,
            start,
            end,
            provider.extension(),
        );
        Ok((temp, dest))
    }

    /// Promote the closed temp artifact to its committed name and advance the
    /// high-water mark.
    async fn commit_file(
        &mut self,
        storage: &dyn Storage,
        provider: &dyn RecordWriterProvider,
        config: &SinkConfig,
    ) -> Result<()> {
        let (temp, dest) = self.pending_commit(provider, config)?;
        storage.commit(&temp, &dest).await?;

        let start = self.temp_start.take().ok_or_else(|| {
            SinkError::IllegalWorkerState(format!("no start offset recorded for {}", self.tp))
        })?;
        let end = start + self.records_in_temp - 1;
        self.high_water = Some(end);
        self.records_in_temp = 0;
        self.temp_path = None;

        info!(
            topic = %self.tp.topic,
            partition = self.tp.partition,
            file = %dest,
            start_offset = start,
            end_offset = end,
            "Committed file"
        );
        Ok(())
    }

    /// Best-effort rotation of whatever is open, used on revocation and
    /// shutdown: close the temp artifact, record the intent, commit.
    ///
    /// An open writer that has not written any record yet is abandoned; there
    /// is no offset range to commit it under.
    async fn flush_pending(
        &mut self,
        storage: &dyn Storage,
        provider: &dyn RecordWriterProvider,
        config: &SinkConfig,
    ) -> Result<()> {
        let mut writer = match self.writer.take() {
            Some(writer) => writer,
            None => return Ok(()),
        };
        if self.records_in_temp == 0 {
            self.temp_path = None;
            self.temp_start = None;
            return Ok(());
        }

        writer.close().await?;
        let (temp, dest) = self.pending_commit(provider, config)?;
        self.wal_mut()?.append(&temp, &dest).await?;
        self.commit_file(storage, provider, config).await?;
        Ok(())
    }

    async fn close_wal(&mut self) -> Result<()> {
        if let Some(mut wal) = self.wal.take() {
            if let Err(e) = wal.close().await {
                return Err(basin_storage::Error::Wal(format!(
                    "error closing {}: {}",
                    wal.log_file(),
                    e
                ))
                .into());
            }
        }
        Ok(())
    }
}

/// Coordinator for all partitions assigned to one sink task.
///
/// The surrounding framework calls `write`, `on_assigned`, `on_revoked`, and
/// `close` serially; there is no internal concurrency.
pub struct SinkWriter {
    config: SinkConfig,
    storage: Arc<dyn Storage>,
    writer_provider: Arc<dyn RecordWriterProvider>,
    context: Arc<dyn SinkContext>,
    partitions: HashMap<TopicPartition, PartitionState>,
}

impl SinkWriter {
    /// Create a sink writer for the context's current assignment.
    pub async fn new(
        config: SinkConfig,
        storage: Arc<dyn Storage>,
        writer_provider: Arc<dyn RecordWriterProvider>,
        context: Arc<dyn SinkContext>,
    ) -> Result<Self> {
        storage.mkdirs(&config.topics_dir).await?;

        let mut partitions = HashMap::new();
        for tp in context.assignment() {
            partitions.insert(tp.clone(), PartitionState::new(tp));
        }

        Ok(Self {
            config,
            storage,
            writer_provider,
            context,
            partitions,
        })
    }

    /// Ingest a batch of records and drive every assigned partition forward.
    ///
    /// Partitions inside their backoff window are skipped this round. A
    /// retryable failure on one partition never blocks the others.
    pub async fn write(&mut self, records: Vec<SinkRecord>) -> Result<()> {
        for record in records {
            let tp = TopicPartition::new(record.topic.clone(), record.partition);
            match self.partitions.get_mut(&tp) {
                Some(partition) => partition.enqueue(record),
                None => warn!(
                    topic = %tp.topic,
                    partition = tp.partition,
                    offset = record.offset,
                    "Dropping record for unassigned partition"
                ),
            }
        }

        let assigned: Vec<TopicPartition> = self.partitions.keys().cloned().collect();
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);
        for tp in assigned {
            let Some(partition) = self.partitions.get_mut(&tp) else {
                continue;
            };
            if let Some(failed_at) = partition.failure_time {
                if failed_at.elapsed() < backoff {
                    continue;
                }
                partition.failure_time = None;
            }
            self.execute(&tp).await?;
        }
        Ok(())
    }

    /// Drive one partition: recovery first if needed, then the drain.
    async fn execute(&mut self, tp: &TopicPartition) -> Result<()> {
        let Some(partition) = self.partitions.get_mut(tp) else {
            return Ok(());
        };

        if partition.state < WriteState::WriteStarted {
            match partition
                .recover(&self.storage, self.context.as_ref(), &self.config.topics_dir)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_retryable() => {
                    if e.is_fenced() {
                        error!(
                            topic = %tp.topic,
                            partition = tp.partition,
                            error = %e,
                            "Another writer holds the WAL; partition is unrecoverable for this task"
                        );
                    } else {
                        warn!(
                            topic = %tp.topic,
                            partition = tp.partition,
                            error = %e,
                            "Recovery failed, backing off"
                        );
                    }
                    partition.failure_time = Some(Instant::now());
                    self.context.request_backoff(self.config.retry_backoff_ms);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        match partition
            .drain(
                &self.storage,
                self.writer_provider.as_ref(),
                self.context.as_ref(),
                &self.config,
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_retryable() => {
                warn!(
                    topic = %tp.topic,
                    partition = tp.partition,
                    state = ?partition.state,
                    error = %e,
                    "Write pipeline error, backing off"
                );
                partition.failure_time = Some(Instant::now());
                self.context.request_backoff(self.config.retry_backoff_ms);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Next offset the upstream should commit for each partition:
    /// `high_water + 1` wherever a high-water mark is defined.
    pub fn committed_offsets(&self) -> HashMap<TopicPartition, u64> {
        self.partitions
            .iter()
            .filter_map(|(tp, partition)| partition.high_water.map(|hw| (tp.clone(), hw + 1)))
            .collect()
    }

    /// Apply a new assignment: tear down partitions that left, initialize
    /// partitions that arrived.
    pub async fn on_assigned(&mut self, assignment: &[TopicPartition]) {
        let dropped: Vec<TopicPartition> = self
            .partitions
            .keys()
            .filter(|tp| !assignment.contains(tp))
            .cloned()
            .collect();
        for tp in dropped {
            self.teardown_partition(&tp).await;
        }

        for tp in assignment {
            if !self.partitions.contains_key(tp) {
                self.partitions
                    .insert(tp.clone(), PartitionState::new(tp.clone()));
            }
        }
    }

    /// Tear down revoked partitions, preserving any open work best-effort.
    pub async fn on_revoked(&mut self, revoked: &[TopicPartition]) {
        for tp in revoked {
            self.teardown_partition(tp).await;
        }
    }

    /// Commit open work, close the WAL, and drop all state for a partition.
    /// Errors are logged, not raised.
    async fn teardown_partition(&mut self, tp: &TopicPartition) {
        let Some(mut partition) = self.partitions.remove(tp) else {
            return;
        };

        if let Err(e) = partition
            .flush_pending(
                self.storage.as_ref(),
                self.writer_provider.as_ref(),
                &self.config,
            )
            .await
        {
            error!(
                topic = %tp.topic,
                partition = tp.partition,
                error = %e,
                "Error rotating temp artifact during revocation"
            );
        }
        if let Err(e) = partition.close_wal().await {
            error!(
                topic = %tp.topic,
                partition = tp.partition,
                error = %e,
                "Error closing WAL during revocation"
            );
        }

        info!(
            topic = %tp.topic,
            partition = tp.partition,
            "Partition state dropped"
        );
    }

    /// Synchronous teardown of the whole task: best-effort commit of every
    /// open temp artifact, close all WALs, close storage. All failures are
    /// aggregated into a single error.
    pub async fn close(&mut self) -> Result<()> {
        let mut failures: Vec<String> = Vec::new();

        let assigned: Vec<TopicPartition> = self.partitions.keys().cloned().collect();
        for tp in assigned {
            let Some(mut partition) = self.partitions.remove(&tp) else {
                continue;
            };
            if let Err(e) = partition
                .flush_pending(
                    self.storage.as_ref(),
                    self.writer_provider.as_ref(),
                    &self.config,
                )
                .await
            {
                error!(
                    topic = %tp.topic,
                    partition = tp.partition,
                    error = %e,
                    "Error rotating temp artifact when closing task"
                );
                failures.push(format!("{}: {}", tp, e));
            }
            if let Err(e) = partition.close_wal().await {
                error!(
                    topic = %tp.topic,
                    partition = tp.partition,
                    error = %e,
                    "Error closing WAL when closing task"
                );
                failures.push(format!("{} WAL: {}", tp, e));
            }
        }

        if let Err(e) = self.storage.close().await {
            error!(url = %self.storage.url(), error = %e, "Error closing storage");
            failures.push(format!("storage {}: {}", self.storage.url(), e));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SinkError::Shutdown(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn record(offset: u64) -> SinkRecord {
        SinkRecord::new("t", 0, offset, 0, None, Bytes::from("v"))
    }

    // ---------------------------------------------------------------
    // WriteState
    // ---------------------------------------------------------------

    #[test]
    fn test_state_progression_is_linear() {
        let mut state = WriteState::RecoveryStarted;
        let expected = [
            WriteState::RecoveryPartitionPaused,
            WriteState::WalCreated,
            WriteState::WalApplied,
            WriteState::WalTruncated,
            WriteState::OffsetReset,
            WriteState::WriteStarted,
            WriteState::WritePartitionPaused,
            WriteState::ShouldRotate,
            WriteState::TempFileClosed,
            WriteState::WalAppended,
            WriteState::FileCommitted,
        ];
        for next in expected {
            state = state.next();
            assert_eq!(state, next);
        }
        assert_eq!(state.next(), WriteState::WritePartitionPaused);
    }

    #[test]
    fn test_recovery_states_precede_write_states() {
        assert!(WriteState::RecoveryStarted < WriteState::WriteStarted);
        assert!(WriteState::OffsetReset < WriteState::WriteStarted);
        assert!(WriteState::WriteStarted < WriteState::FileCommitted);
    }

    // ---------------------------------------------------------------
    // Buffering
    // ---------------------------------------------------------------

    #[test]
    fn test_enqueue_buffers_in_order() {
        let mut partition = PartitionState::new(TopicPartition::new("t", 0));
        partition.enqueue(record(5));
        partition.enqueue(record(6));
        assert_eq!(partition.buffer.len(), 2);
        assert_eq!(partition.buffer.front().map(|r| r.offset), Some(5));
    }

    #[test]
    fn test_enqueue_drops_replays_after_recovery() {
        let mut partition = PartitionState::new(TopicPartition::new("t", 0));
        partition.recovered = true;
        partition.high_water = Some(9);

        partition.enqueue(record(8));
        partition.enqueue(record(9));
        partition.enqueue(record(10));
        assert_eq!(partition.buffer.len(), 1);
        assert_eq!(partition.buffer.front().map(|r| r.offset), Some(10));
    }

    #[test]
    fn test_enqueue_keeps_everything_before_recovery() {
        let mut partition = PartitionState::new(TopicPartition::new("t", 0));
        partition.enqueue(record(3));
        partition.enqueue(record(4));
        assert_eq!(partition.buffer.len(), 2);
    }
}
