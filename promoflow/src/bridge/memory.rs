//! In-memory bridge store.

use super::{BridgeRecord, ParameterBridge};
use crate::errors::BridgeError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// A process-local bridge store.
///
/// Each write replaces the record under the key's shard lock, so readers see
/// either the old or the new record. Availability can be toggled to simulate
/// an unreachable store.
#[derive(Debug)]
pub struct InMemoryParameterBridge {
    records: DashMap<String, BridgeRecord>,
    available: AtomicBool,
}

impl Default for InMemoryParameterBridge {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryParameterBridge {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `Unavailable` (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no key was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn ensure_available(&self, key: &str) -> Result<(), BridgeError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BridgeError::unavailable(key, "store is unreachable"))
        }
    }
}

#[async_trait]
impl ParameterBridge for InMemoryParameterBridge {
    async fn put(&self, key: &str, value: &str) -> Result<BridgeRecord, BridgeError> {
        self.ensure_available(key)?;
        let record = match self.records.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let record = BridgeRecord::next(key, value, Some(occupied.get()));
                occupied.insert(record.clone());
                record
            }
            Entry::Vacant(vacant) => {
                let record = BridgeRecord::first(key, value);
                vacant.insert(record.clone());
                record
            }
        };
        Ok(record)
    }

    async fn get(&self, key: &str) -> Result<BridgeRecord, BridgeError> {
        self.ensure_available(key)?;
        self.records
            .get(key)
            .map(|r| r.clone())
            .ok_or_else(|| BridgeError::NotFound {
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::block_on;

    #[tokio::test]
    async fn test_get_missing_key() {
        let bridge = InMemoryParameterBridge::new();
        let err = bridge.get("latest-dev-tag").await.unwrap_err();
        assert_eq!(
            err,
            BridgeError::NotFound {
                key: "latest-dev-tag".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_put_overwrites_and_bumps_version() {
        let bridge = InMemoryParameterBridge::new();
        bridge.put("latest-dev-tag", "abc123").await.unwrap();
        let second = bridge.put("latest-dev-tag", "def456").await.unwrap();

        assert_eq!(second.version, 2);
        let current = bridge.get("latest-dev-tag").await.unwrap();
        assert_eq!(current.value, "def456");
        assert_eq!(bridge.len(), 1);
    }

    #[test]
    fn test_unavailable_store_keeps_committed_value() {
        let bridge = InMemoryParameterBridge::new();
        tokio_test::assert_ok!(block_on(bridge.put("k", "v1")));

        bridge.set_available(false);
        let err = tokio_test::assert_err!(block_on(bridge.put("k", "v2")));
        assert!(matches!(err, BridgeError::Unavailable { .. }));
        tokio_test::assert_err!(block_on(bridge.get("k")));

        bridge.set_available(true);
        assert_eq!(block_on(bridge.get("k")).unwrap().value, "v1");
    }

    #[tokio::test]
    async fn test_concurrent_writers_last_write_wins() {
        let bridge = Arc::new(InMemoryParameterBridge::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let bridge = Arc::clone(&bridge);
            handles.push(tokio::spawn(async move {
                bridge.put("k", &format!("tag-{i}")).await.unwrap()
            }));
        }
        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap().version);
        }
        versions.sort_unstable();

        assert_eq!(versions, (1..=16).collect::<Vec<u64>>());
        let current = bridge.get("k").await.unwrap();
        assert_eq!(current.version, 16);
        assert!(current.value.starts_with("tag-"));
    }
}
