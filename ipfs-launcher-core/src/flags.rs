//! RocksDB-backed persistent flag store
//!
//! Small durable key/value store for facts that must survive restarts,
//! such as whether the bundled snapshot has already been imported.
//! Values are JSON-encoded so the database stays inspectable.

use rocksdb::{Options, DB};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Key under which the bootstrap flag is stored
pub const BOOTSTRAP_FLAG_KEY: &str = "bootstrap.snapshot";

#[derive(Debug, thiserror::Error)]
pub enum FlagStoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rocksdb::Error),

    #[error("Corrupt value for {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// One-time marker written after the bundled snapshot was imported and pinned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapFlag {
    pub is_pinned: bool,
    /// Root hash of the imported snapshot
    #[serde(default)]
    pub content_hash: Option<String>,
}

/// Durable key/value store backed by RocksDB
#[derive(Clone)]
pub struct FlagStore {
    db: Arc<DB>,
}

impl FlagStore {
    /// Open (or create) the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FlagStoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        // A handful of tiny keys; keep the footprint small
        opts.set_write_buffer_size(1024 * 1024);
        opts.set_max_background_jobs(1);

        let db = DB::open(&opts, path.as_ref())?;

        info!("Opened flag store at {:?}", path.as_ref());
        Ok(Self { db: Arc::new(db) })
    }

    /// Read a value, `None` when the key was never written
    pub async fn get<T>(&self, key: &str) -> Result<Option<T>, FlagStoreError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let Some(raw) = db.get(&key)? else {
                return Ok(None);
            };
            serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|source| FlagStoreError::Corrupt { key, source })
        })
        .await
        .map_err(|e| FlagStoreError::IoError(std::io::Error::other(e.to_string())))?
    }

    /// Durably write a value
    pub async fn set<T>(&self, key: &str, value: &T) -> Result<(), FlagStoreError>
    where
        T: Serialize,
    {
        let raw = serde_json::to_vec(value)?;
        let db = Arc::clone(&self.db);
        let owned_key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let mut write_opts = rocksdb::WriteOptions::default();
            write_opts.set_sync(true);
            db.put_opt(&owned_key, &raw, &write_opts)
        })
        .await
        .map_err(|e| FlagStoreError::IoError(std::io::Error::other(e.to_string())))??;

        debug!("Wrote flag {}", key);
        Ok(())
    }

    /// Number of keys in the store
    pub async fn len(&self) -> usize {
        let db = Arc::clone(&self.db);

        tokio::task::spawn_blocking(move || {
            db.iterator(rocksdb::IteratorMode::Start).flatten().count()
        })
        .await
        .unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Current bootstrap flag, `None` before the first successful import
    pub async fn bootstrap_flag(&self) -> Result<Option<BootstrapFlag>, FlagStoreError> {
        self.get(BOOTSTRAP_FLAG_KEY).await
    }

    pub async fn set_bootstrap_flag(&self, flag: &BootstrapFlag) -> Result<(), FlagStoreError> {
        self.set(BOOTSTRAP_FLAG_KEY, flag).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Store in a directory removed when the guard drops
    fn temp_store() -> (tempfile::TempDir, FlagStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FlagStore::open(dir.path().join("flags")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_temp_store_is_removed_on_drop() {
        let (dir, store) = temp_store();
        store.set("n", &1u32).await.unwrap();
        let path = dir.path().to_path_buf();

        drop(store);
        drop(dir);

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let (_dir, store) = temp_store();
        let value: Option<String> = store.get("nope").await.unwrap();
        assert!(value.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (_dir, store) = temp_store();
        store.set("greeting", &"hello".to_string()).await.unwrap();

        let value: Option<String> = store.get("greeting").await.unwrap();
        assert_eq!(value.as_deref(), Some("hello"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_single_key() {
        let (_dir, store) = temp_store();
        store.set("n", &1u32).await.unwrap();
        store.set("n", &2u32).await.unwrap();

        assert_eq!(store.get::<u32>("n").await.unwrap(), Some(2));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_bootstrap_flag_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags");

        {
            let store = FlagStore::open(&path).unwrap();
            assert!(store.bootstrap_flag().await.unwrap().is_none());
            store
                .set_bootstrap_flag(&BootstrapFlag {
                    is_pinned: true,
                    content_hash: Some("QmBundled".to_string()),
                })
                .await
                .unwrap();
        }

        let store = FlagStore::open(&path).unwrap();
        let flag = store.bootstrap_flag().await.unwrap().unwrap();
        assert!(flag.is_pinned);
        assert_eq!(flag.content_hash.as_deref(), Some("QmBundled"));
    }

    #[tokio::test]
    async fn test_corrupt_value_is_reported() {
        let (_dir, store) = temp_store();
        store.set("n", &"not a number").await.unwrap();

        let result = store.get::<u32>("n").await;
        assert!(matches!(result, Err(FlagStoreError::Corrupt { .. })));
    }
}
