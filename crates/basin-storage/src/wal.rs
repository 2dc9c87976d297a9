//! Write-Ahead Log of Rename Intents
//!
//! Each partition owns an append-only log recording the intent to promote a
//! temp artifact to its committed, offset-named path. The commit sequence is
//!
//! ```text
//! close temp → WAL.append(temp, dest) → Storage.commit(temp, dest)
//! ```
//!
//! so a crash anywhere in the sequence is repaired by replaying the log:
//! [`Wal::apply`] re-issues the rename when `dest` is missing and clears the
//! garbage temp when it is not. Applying twice produces the same store state
//! as applying once.
//!
//! ## File Format
//!
//! A WAL file is a sequence of length-prefixed, checksummed entries:
//!
//! ```text
//! ┌────────────┬──────────┬──────────┬──────────┬───────────┬───────────┐
//! │ Entry Size │ CRC32    │ Temp Len │ Temp     │ Dest Len  │ Dest      │
//! │ (4 bytes)  │(4 bytes) │(4 bytes) │(N bytes) │ (4 bytes) │ (M bytes) │
//! └────────────┴──────────┴──────────┴──────────┴───────────┴───────────┘
//! ```
//!
//! Entries with a CRC mismatch and a partial entry at the tail are skipped
//! with a warning on replay.
//!
//! ## Exclusive Writer
//!
//! Opening a WAL takes an OS-level exclusive lock on a sibling `.lock` file.
//! The lock is released on [`Wal::close`] or when the owning process dies, so
//! a crashed writer never fences out its replacement.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use basin_core::TopicPartition;

use crate::error::{Error, Result};
use crate::storage::Storage;

/// Per-partition log of `(temp, dest)` rename intents.
#[async_trait]
pub trait Wal: Send {
    /// Record the intent to promote `temp` to `dest`. Durable before return.
    async fn append(&mut self, temp: &str, dest: &str) -> Result<()>;

    /// Replay all entries in order against `storage`. Idempotent.
    async fn apply(&mut self, storage: &dyn Storage) -> Result<()>;

    /// Empty the log. Durable before return.
    async fn truncate(&mut self) -> Result<()>;

    /// Release the exclusive writer lease.
    async fn close(&mut self) -> Result<()>;

    /// Path of the backing log file, for diagnostics.
    fn log_file(&self) -> &str;
}

/// One recorded rename intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    pub temp: String,
    pub dest: String,
}

/// File-backed [`Wal`] for a single partition.
pub struct FileWal {
    tp: TopicPartition,
    path: PathBuf,
    path_display: String,
    file: File,
    lock_file: std::fs::File,
    closed: bool,
}

impl FileWal {
    /// Open or create the WAL for `tp` under `dir`, fencing other writers.
    pub async fn open(dir: &Path, tp: &TopicPartition) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let path = dir.join(format!("{}-{}.wal", tp.topic, tp.partition));
        let lock_path = dir.join(format!("{}-{}.wal.lock", tp.topic, tp.partition));

        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)?;
        if fs2::FileExt::try_lock_exclusive(&lock_file).is_err() {
            return Err(Error::WalFenced(format!(
                "{} already has a WAL writer ({})",
                tp,
                lock_path.display()
            )));
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let size = file.metadata().await?.len();

        info!(
            topic = %tp.topic,
            partition = tp.partition,
            path = %path.display(),
            size,
            "WAL opened"
        );

        let path_display = path.display().to_string();
        Ok(Self {
            tp: tp.clone(),
            path,
            path_display,
            file,
            lock_file,
            closed: false,
        })
    }

    /// Read every decodable entry currently in the log.
    async fn read_entries(&self) -> Result<Vec<WalEntry>> {
        let file = File::open(&self.path).await?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();

        loop {
            let mut size_buf = [0u8; 4];
            match reader.read_exact(&mut size_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let entry_size = u32::from_le_bytes(size_buf) as usize;
            let mut entry_buf = vec![0u8; entry_size];
            match reader.read_exact(&mut entry_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    warn!(
                        topic = %self.tp.topic,
                        partition = self.tp.partition,
                        "Partial entry at end of WAL, ignoring"
                    );
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            match decode_entry(&entry_buf) {
                Some(entry) => entries.push(entry),
                None => {
                    warn!(
                        topic = %self.tp.topic,
                        partition = self.tp.partition,
                        "Corrupted WAL entry (CRC mismatch), skipping"
                    );
                }
            }
        }

        Ok(entries)
    }
}

#[async_trait]
impl Wal for FileWal {
    async fn append(&mut self, temp: &str, dest: &str) -> Result<()> {
        let buf = encode_entry(temp, dest);
        self.file.write_all(&buf).await?;
        self.file.sync_all().await?;
        Ok(())
    }

    async fn apply(&mut self, storage: &dyn Storage) -> Result<()> {
        let entries = self.read_entries().await?;
        if entries.is_empty() {
            return Ok(());
        }

        for entry in &entries {
            if storage.exists(&entry.dest).await? {
                if storage.exists(&entry.temp).await? {
                    storage.delete(&entry.temp).await?;
                }
            } else if storage.exists(&entry.temp).await? {
                storage.commit(&entry.temp, &entry.dest).await?;
            } else {
                warn!(
                    topic = %self.tp.topic,
                    partition = self.tp.partition,
                    temp = %entry.temp,
                    dest = %entry.dest,
                    "WAL entry references a missing temp artifact, skipping"
                );
            }
        }

        info!(
            topic = %self.tp.topic,
            partition = self.tp.partition,
            applied = entries.len(),
            "WAL applied"
        );
        Ok(())
    }

    async fn truncate(&mut self) -> Result<()> {
        self.file.seek(std::io::SeekFrom::Start(0)).await?;
        self.file.set_len(0).await?;
        self.file.sync_all().await?;

        info!(
            topic = %self.tp.topic,
            partition = self.tp.partition,
            "WAL truncated"
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.file.sync_all().await?;
        if let Err(e) = fs2::FileExt::unlock(&self.lock_file) {
            return Err(Error::Wal(format!(
                "failed to release WAL lease for {}: {}",
                self.tp, e
            )));
        }
        self.closed = true;
        Ok(())
    }

    fn log_file(&self) -> &str {
        &self.path_display
    }
}

fn encode_entry(temp: &str, dest: &str) -> Vec<u8> {
    let temp = temp.as_bytes();
    let dest = dest.as_bytes();
    let entry_size = 4 + 4 + temp.len() + 4 + dest.len();

    let mut buf = Vec::with_capacity(4 + entry_size);
    buf.extend_from_slice(&(entry_size as u32).to_le_bytes());

    let mut crc = crc32fast::Hasher::new();
    crc.update(&(temp.len() as u32).to_le_bytes());
    crc.update(temp);
    crc.update(&(dest.len() as u32).to_le_bytes());
    crc.update(dest);
    buf.extend_from_slice(&crc.finalize().to_le_bytes());

    buf.extend_from_slice(&(temp.len() as u32).to_le_bytes());
    buf.extend_from_slice(temp);
    buf.extend_from_slice(&(dest.len() as u32).to_le_bytes());
    buf.extend_from_slice(dest);
    buf
}

fn decode_entry(buf: &[u8]) -> Option<WalEntry> {
    let stored_crc = u32::from_le_bytes(buf.get(0..4)?.try_into().ok()?);

    let mut crc = crc32fast::Hasher::new();
    crc.update(&buf[4..]);
    if crc.finalize() != stored_crc {
        return None;
    }

    let mut cursor = 4;
    let temp = read_field(buf, &mut cursor)?;
    let dest = read_field(buf, &mut cursor)?;
    Some(WalEntry { temp, dest })
}

fn read_field(buf: &[u8], cursor: &mut usize) -> Option<String> {
    let len = u32::from_le_bytes(buf.get(*cursor..*cursor + 4)?.try_into().ok()?) as usize;
    *cursor += 4;
    let bytes = buf.get(*cursor..*cursor + len)?;
    *cursor += len;
    String::from_utf8(bytes.to_vec()).ok()
}
