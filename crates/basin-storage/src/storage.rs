//! Storage Adapter
//!
//! A narrow interface over the distributed file store backing the sink. All
//! paths are store-relative; the root URI is fixed when the adapter is built.
//!
//! The one operation with teeth is [`Storage::commit`]: an atomic
//! rename-if-missing. After a crash either the temp artifact exists and the
//! destination does not, or the destination exists (and any leftover temp is
//! garbage). Replaying the WAL against this primitive makes file
//! materialization idempotent.
//!
//! Concrete stores are provided by the [`object_store`] crate and selected by
//! a string key through [`create_storage`], replacing runtime class loading
//! with a small registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;

use basin_core::TopicPartition;

use crate::error::{Error, Result};
use crate::wal::{FileWal, Wal};

/// Low-level operations against the distributed file store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Root URI of the store, for diagnostics.
    fn url(&self) -> &str;

    /// Whether an object exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Ensure the directory `path` exists.
    async fn mkdirs(&self, path: &str) -> Result<()>;

    /// Names of the objects directly under `path`.
    async fn list(&self, path: &str) -> Result<Vec<String>>;

    /// Write `data` as the object at `path`.
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// Atomically promote `temp` to `dest`.
    ///
    /// Idempotent: if `dest` already exists the rename is skipped and any
    /// leftover `temp` is deleted.
    async fn commit(&self, temp: &str, dest: &str) -> Result<()>;

    /// Delete the object at `path`. Missing objects are tolerated.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Open the write-ahead log for `tp`, fencing any other writer.
    async fn open_wal(&self, tp: &TopicPartition) -> Result<Box<dyn Wal>>;

    /// Release any resources held by the adapter.
    async fn close(&self) -> Result<()>;
}

/// [`Storage`] over an [`ObjectStore`], with the per-partition WAL spooled to
/// a local directory.
pub struct ObjectStorage {
    url: String,
    store: Arc<dyn ObjectStore>,
    wal_dir: PathBuf,
}

impl ObjectStorage {
    pub fn new(
        url: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        wal_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            url: url.into(),
            store,
            wal_dir: wal_dir.into(),
        }
    }
}

#[async_trait]
impl Storage for ObjectStorage {
    fn url(&self) -> &str {
        &self.url
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match self.store.head(&ObjectPath::from(path)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn mkdirs(&self, _path: &str) -> Result<()> {
        // object stores have no directories; prefixes come into existence
        // with the first object written under them
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let prefix = ObjectPath::from(path);
        let listing = self.store.list_with_delimiter(Some(&prefix)).await?;
        Ok(listing
            .objects
            .iter()
            .filter_map(|meta| meta.location.filename().map(str::to_string))
            .collect())
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        self.store.put(&ObjectPath::from(path), data.into()).await?;
        Ok(())
    }

    async fn commit(&self, temp: &str, dest: &str) -> Result<()> {
        let from = ObjectPath::from(temp);
        let to = ObjectPath::from(dest);
        match self.store.rename_if_not_exists(&from, &to).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::AlreadyExists { .. }) => {
                // a previous attempt already materialized dest; the temp is garbage
                self.delete(temp).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match self.store.delete(&ObjectPath::from(path)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn open_wal(&self, tp: &TopicPartition) -> Result<Box<dyn Wal>> {
        let wal = FileWal::open(&self.wal_dir, tp).await?;
        Ok(Box::new(wal))
    }

    async fn close(&self) -> Result<()> {
        // object store clients hold no resources that need explicit teardown
        Ok(())
    }
}

/// Build a [`Storage`] from a configured storage class and root URI.
///
/// Recognized classes: `"memory"` (tests), `"local"` (a filesystem root,
/// `file://` prefix optional), `"s3"` (`s3://<bucket>`, credentials from the
/// environment).
pub fn create_storage(class: &str, url: &str, wal_dir: &Path) -> Result<Arc<dyn Storage>> {
    let store: Arc<dyn ObjectStore> = match class {
        "memory" => Arc::new(InMemory::new()),
        "local" => {
            let root = url.strip_prefix("file://").unwrap_or(url);
            std::fs::create_dir_all(root)?;
            Arc::new(LocalFileSystem::new_with_prefix(root)?)
        }
        "s3" => {
            let bucket = url.strip_prefix("s3://").unwrap_or(url);
            let bucket = bucket.trim_end_matches('/');
            Arc::new(
                AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .build()?,
            )
        }
        other => {
            return Err(Error::Unsupported(format!(
                "unknown storage class '{}'",
                other
            )))
        }
    };
    Ok(Arc::new(ObjectStorage::new(url, store, wal_dir)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_storage() -> (ObjectStorage, Arc<InMemory>) {
        let store = Arc::new(InMemory::new());
        let storage = ObjectStorage::new("memory://", store.clone(), "/tmp/unused-wal");
        (storage, store)
    }

    // ---------------------------------------------------------------
    // Basic operations
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_put_exists_delete() {
        let (storage, _) = memory_storage();
        assert!(!storage.exists("topics/t/0/a.tmp").await.unwrap());

        storage
            .put("topics/t/0/a.tmp", Bytes::from("data"))
            .await
            .unwrap();
        assert!(storage.exists("topics/t/0/a.tmp").await.unwrap());

        storage.delete("topics/t/0/a.tmp").await.unwrap();
        assert!(!storage.exists("topics/t/0/a.tmp").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let (storage, _) = memory_storage();
        storage.delete("topics/t/0/ghost.tmp").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_direct_children_only() {
        let (storage, _) = memory_storage();
        storage
            .put("topics/t/0/t+0+0+9.json", Bytes::from("a"))
            .await
            .unwrap();
        storage
            .put("topics/t/0/t+0+10+19.json", Bytes::from("b"))
            .await
            .unwrap();
        storage
            .put("topics/t/1/t+1+0+9.json", Bytes::from("c"))
            .await
            .unwrap();

        let mut names = storage.list("topics/t/0").await.unwrap();
        names.sort();
        assert_eq!(names, vec!["t+0+0+9.json", "t+0+10+19.json"]);
    }

    #[tokio::test]
    async fn test_list_missing_prefix_is_empty() {
        let (storage, _) = memory_storage();
        assert!(storage.list("topics/none/0").await.unwrap().is_empty());
    }

    // ---------------------------------------------------------------
    // Commit
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_commit_renames() {
        let (storage, _) = memory_storage();
        storage
            .put("topics/t/0/a.tmp", Bytes::from("payload"))
            .await
            .unwrap();

        storage
            .commit("topics/t/0/a.tmp", "topics/t/0/t+0+0+4.json")
            .await
            .unwrap();

        assert!(!storage.exists("topics/t/0/a.tmp").await.unwrap());
        assert!(storage.exists("topics/t/0/t+0+0+4.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_is_noop_when_dest_exists() {
        let (storage, store) = memory_storage();
        storage
            .put("topics/t/0/t+0+0+4.json", Bytes::from("original"))
            .await
            .unwrap();
        storage
            .put("topics/t/0/stale.tmp", Bytes::from("redundant"))
            .await
            .unwrap();

        storage
            .commit("topics/t/0/stale.tmp", "topics/t/0/t+0+0+4.json")
            .await
            .unwrap();

        // dest untouched, garbage temp removed
        let data = store
            .get(&ObjectPath::from("topics/t/0/t+0+0+4.json"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(data, Bytes::from("original"));
        assert!(!storage.exists("topics/t/0/stale.tmp").await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_missing_temp_fails() {
        let (storage, _) = memory_storage();
        let result = storage
            .commit("topics/t/0/ghost.tmp", "topics/t/0/t+0+0+4.json")
            .await;
        assert!(result.is_err());
    }

    // ---------------------------------------------------------------
    // Registry
    // ---------------------------------------------------------------

    #[test]
    fn test_create_storage_unknown_class() {
        let result = create_storage("hdfs", "hdfs://nn:8020", Path::new("/tmp/wal"));
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_create_storage_memory() {
        let storage = create_storage("memory", "memory://", Path::new("/tmp/wal")).unwrap();
        assert_eq!(storage.url(), "memory://");
        storage.put("a/b", Bytes::from("x")).await.unwrap();
        assert!(storage.exists("a/b").await.unwrap());
    }
}
