//! Cross-boundary parameter bridge.
//!
//! A durable key-value store used to hand a value (the latest dev build tag)
//! from one pipeline to another that shares no execution graph with it.
//! Writes overwrite (last writer wins) and are atomic from a reader's
//! perspective. Callers go through a [`ScopedBridge`], which checks
//! prefix-scoped read and write grants.

mod file;
mod memory;
mod scoped;

pub use file::FileParameterBridge;
pub use memory::InMemoryParameterBridge;
pub use scoped::{BridgeGrant, ScopedBridge};

use crate::errors::BridgeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A committed bridge value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeRecord {
    /// The key.
    pub key: String,
    /// The value.
    pub value: String,
    /// Incremented on every write to the key, starting at 1.
    pub version: u64,
    /// When the value was written (ISO 8601).
    pub last_modified: String,
}

impl BridgeRecord {
    pub(crate) fn first(key: &str, value: &str) -> Self {
        Self::next(key, value, None)
    }

    pub(crate) fn next(key: &str, value: &str, previous: Option<&Self>) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            version: previous.map_or(1, |p| p.version + 1),
            last_modified: crate::utils::iso_timestamp(),
        }
    }
}

/// Storage backend for the bridge.
#[async_trait]
pub trait ParameterBridge: Send + Sync {
    /// Writes `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be written. A failed write
    /// leaves the previously committed value intact.
    async fn put(&self, key: &str, value: &str) -> Result<BridgeRecord, BridgeError>;

    /// Reads the current value of `key`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key was never written, or `Unavailable` if
    /// the store cannot be read.
    async fn get(&self, key: &str) -> Result<BridgeRecord, BridgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_versions_increment() {
        let first = BridgeRecord::first("latest-dev-tag", "abc123");
        let second = BridgeRecord::next("latest-dev-tag", "def456", Some(&first));

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(second.value, "def456");
    }
}
