//! Basin Storage Layer
//!
//! This crate implements the storage side of the Basin sink - everything
//! between the per-partition write pipeline and the distributed file store.
//!
//! ## Main Components
//!
//! ### Storage
//! A narrow adapter over an [`object_store::ObjectStore`]: existence checks,
//! listing, atomic rename-based commits, and opening the per-partition WAL.
//! Concrete stores (in-memory, local filesystem, S3) are selected by a string
//! key through [`storage::create_storage`].
//!
//! ### WAL
//! A per-partition append-only log of `(temp, dest)` rename intents. Replaying
//! the log after a crash completes any interrupted commits idempotently, so a
//! file is materialized under its offset-named path exactly once no matter
//! where the previous process died.
//!
//! ### Record Writers
//! [`writer::RecordWriter`] serializes records into a temp artifact; the
//! on-disk format (NDJSON, Avro) is chosen once at startup through
//! [`writer::create_writer_provider`].
//!
//! ### Naming
//! Pure path conventions: temp artifacts are `<uuid>.tmp`, committed files are
//! `<topic>+<partition>+<start>+<end>.<ext>` covering an inclusive offset
//! range.
//!
//! ## Commit Flow
//!
//! ```text
//! records → RecordWriter (buffered) → close() → temp artifact in store
//!                                                   ↓
//!                                     WAL.append(temp → committed name)
//!                                                   ↓
//!                                     Storage.commit (atomic rename)
//! ```

pub mod error;
pub mod naming;
pub mod storage;
pub mod wal;
pub mod writer;

pub use error::{Error, Result};
pub use storage::{create_storage, ObjectStorage, Storage};
pub use wal::{FileWal, Wal};
pub use writer::{create_writer_provider, RecordWriter, RecordWriterProvider};
