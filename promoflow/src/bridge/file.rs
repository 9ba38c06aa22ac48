//! Directory-backed bridge store.

use super::{BridgeRecord, ParameterBridge};
use crate::errors::BridgeError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tempfile::NamedTempFile;

/// Writer locks, one per record file, shared by every store in the process.
static RECORD_LOCKS: LazyLock<DashMap<PathBuf, Arc<Mutex<()>>>> = LazyLock::new(DashMap::new);

fn record_lock(path: &Path) -> Arc<Mutex<()>> {
    RECORD_LOCKS
        .entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// A bridge store that keeps one JSON record file per key.
///
/// Writes go to a temporary file in the same directory which is then
/// renamed over the record, so a reader sees either the previous record or
/// the new one. Writers to one record file are serialized within the
/// process, so every write observes the version of the one before it.
/// Writers in other processes are not coordinated.
#[derive(Debug, Clone)]
pub struct FileParameterBridge {
    root: PathBuf,
}

impl FileParameterBridge {
    /// Creates a store rooted at `root`. The directory is created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the store directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the record file for a key.
    #[must_use]
    pub fn record_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", encode_key(key)))
    }
}

/// Percent-encodes every byte outside `[A-Za-z0-9_-]`.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}

fn read_record(path: &Path, key: &str) -> Result<Option<BridgeRecord>, BridgeError> {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| BridgeError::unavailable(key, format!("corrupt record: {e}"))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(BridgeError::unavailable(key, e.to_string())),
    }
}

fn write_record(root: &Path, path: &Path, key: &str, value: &str) -> Result<BridgeRecord, BridgeError> {
    let io_err = |e: std::io::Error| BridgeError::unavailable(key, e.to_string());

    std::fs::create_dir_all(root).map_err(io_err)?;

    let lock = record_lock(path);
    let _guard = lock.lock();
    let previous = read_record(path, key)?;
    let record = BridgeRecord::next(key, value, previous.as_ref());

    let bytes = serde_json::to_vec_pretty(&record)
        .map_err(|e| BridgeError::unavailable(key, e.to_string()))?;
    let mut staging = NamedTempFile::new_in(root).map_err(io_err)?;
    staging.write_all(&bytes).map_err(io_err)?;
    staging.as_file().sync_all().map_err(io_err)?;
    staging
        .persist(path)
        .map_err(|e| BridgeError::unavailable(key, e.error.to_string()))?;

    Ok(record)
}

#[async_trait]
impl ParameterBridge for FileParameterBridge {
    async fn put(&self, key: &str, value: &str) -> Result<BridgeRecord, BridgeError> {
        let root = self.root.clone();
        let path = self.record_path(key);
        let (key_owned, value) = (key.to_string(), value.to_string());

        let record = tokio::task::spawn_blocking(move || write_record(&root, &path, &key_owned, &value))
            .await
            .map_err(|e| BridgeError::unavailable(key, e.to_string()))??;

        tracing::debug!(key = %key, version = record.version, "Bridge record written");
        Ok(record)
    }

    async fn get(&self, key: &str) -> Result<BridgeRecord, BridgeError> {
        let path = self.record_path(key);
        let key_owned = key.to_string();

        tokio::task::spawn_blocking(move || read_record(&path, &key_owned))
            .await
            .map_err(|e| BridgeError::unavailable(key, e.to_string()))??
            .ok_or_else(|| BridgeError::NotFound {
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_encode_key() {
        assert_eq!(encode_key("latest-dev-tag"), "latest-dev-tag");
        assert_eq!(encode_key("/release/dev tag"), "%2Frelease%2Fdev%20tag");
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let bridge = FileParameterBridge::new(dir.path().join("bridge"));

        let written = bridge.put("/release/latest-dev-tag", "abc123").await.unwrap();
        let read = bridge.get("/release/latest-dev-tag").await.unwrap();

        assert_eq!(written, read);
        assert_eq!(read.version, 1);
        assert!(bridge.record_path("/release/latest-dev-tag").exists());
    }

    #[tokio::test]
    async fn test_overwrite_survives_new_instance() {
        let dir = TempDir::new().unwrap();
        FileParameterBridge::new(dir.path()).put("k", "v1").await.unwrap();
        FileParameterBridge::new(dir.path()).put("k", "v2").await.unwrap();

        let record = FileParameterBridge::new(dir.path()).get("k").await.unwrap();
        assert_eq!(record.value, "v2");
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn test_missing_key_and_corrupt_record() {
        let dir = TempDir::new().unwrap();
        let bridge = FileParameterBridge::new(dir.path());

        assert!(matches!(bridge.get("absent").await, Err(BridgeError::NotFound { .. })));

        std::fs::write(bridge.record_path("broken"), "{not json").unwrap();
        assert!(matches!(bridge.get("broken").await, Err(BridgeError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_no_temporary_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let bridge = FileParameterBridge::new(dir.path());
        for i in 0..5 {
            bridge.put("k", &format!("v{i}")).await.unwrap();
        }

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_get_distinct_versions() {
        let dir = TempDir::new().unwrap();
        let bridge = FileParameterBridge::new(dir.path());

        let writes = (0..32).map(|i| {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.put("k", &format!("v{i}")).await.unwrap() })
        });
        let mut versions: Vec<u64> = futures::future::join_all(writes)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().version)
            .collect();
        versions.sort_unstable();

        assert_eq!(versions, (1..=32).collect::<Vec<u64>>());
        assert_eq!(bridge.get("k").await.unwrap().version, 32);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_separate_instances_share_the_writer_lock() {
        let dir = TempDir::new().unwrap();

        let writes = (0..8).map(|i| {
            let bridge = FileParameterBridge::new(dir.path());
            tokio::spawn(async move { bridge.put("shared", &format!("v{i}")).await.unwrap() })
        });
        futures::future::join_all(writes).await;

        let record = FileParameterBridge::new(dir.path()).get("shared").await.unwrap();
        assert_eq!(record.version, 8);
    }
}
