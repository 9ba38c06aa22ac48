//! Permission-scoped bridge client.

use super::{BridgeRecord, ParameterBridge};
use crate::errors::{BridgeAccess, BridgeError};
use crate::events::{names, EventSink, NoOpEventSink};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Permission to read or write keys under a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BridgeGrant {
    /// The granted access.
    pub access: BridgeAccess,
    /// The key prefix the grant covers.
    pub prefix: String,
}

impl BridgeGrant {
    /// Grants read access to keys starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGrant` for an empty prefix; grants are never global.
    pub fn read(prefix: impl Into<String>) -> Result<Self, BridgeError> {
        Self::new(BridgeAccess::Read, prefix.into())
    }

    /// Grants write access to keys starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGrant` for an empty prefix; grants are never global.
    pub fn write(prefix: impl Into<String>) -> Result<Self, BridgeError> {
        Self::new(BridgeAccess::Write, prefix.into())
    }

    fn new(access: BridgeAccess, prefix: String) -> Result<Self, BridgeError> {
        if prefix.trim().is_empty() {
            return Err(BridgeError::InvalidGrant { prefix });
        }
        Ok(Self { access, prefix })
    }

    /// Returns true if this grant allows `access` to `key`.
    #[must_use]
    pub fn covers(&self, access: BridgeAccess, key: &str) -> bool {
        self.access == access && key.starts_with(&self.prefix)
    }
}

/// A bridge client acting for one principal with a fixed set of grants.
///
/// Write access does not imply read access.
#[derive(Clone)]
pub struct ScopedBridge {
    inner: Arc<dyn ParameterBridge>,
    principal: String,
    grants: Vec<BridgeGrant>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for ScopedBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedBridge")
            .field("principal", &self.principal)
            .field("grants", &self.grants)
            .finish_non_exhaustive()
    }
}

impl ScopedBridge {
    /// Creates a client for `principal`.
    #[must_use]
    pub fn new(
        inner: Arc<dyn ParameterBridge>,
        principal: impl Into<String>,
        grants: Vec<BridgeGrant>,
    ) -> Self {
        Self {
            inner,
            principal: principal.into(),
            grants,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink notified on writes.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the principal.
    #[must_use]
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Returns the grants.
    #[must_use]
    pub fn grants(&self) -> &[BridgeGrant] {
        &self.grants
    }

    /// Checks that the principal may perform `access` on `key`.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if no grant covers the request.
    pub fn check(&self, access: BridgeAccess, key: &str) -> Result<(), BridgeError> {
        if self.grants.iter().any(|g| g.covers(access, key)) {
            Ok(())
        } else {
            tracing::warn!(
                principal = %self.principal,
                key = %key,
                access = %access,
                "Bridge access denied"
            );
            Err(BridgeError::PermissionDenied {
                principal: self.principal.clone(),
                key: key.to_string(),
                access,
            })
        }
    }

    /// Writes a value after checking write permission.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, or the store's error.
    pub async fn put(&self, key: &str, value: &str) -> Result<BridgeRecord, BridgeError> {
        self.check(BridgeAccess::Write, key)?;
        let record = self.inner.put(key, value).await?;

        tracing::info!(
            principal = %self.principal,
            key = %key,
            version = record.version,
            "Bridge value written"
        );
        self.events
            .emit(
                names::BRIDGE_PUT,
                Some(serde_json::json!({
                    "principal": self.principal,
                    "key": key,
                    "version": record.version,
                })),
            )
            .await;
        Ok(record)
    }

    /// Reads a value after checking read permission.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, `NotFound`, or the store's error.
    pub async fn get(&self, key: &str) -> Result<BridgeRecord, BridgeError> {
        self.check(BridgeAccess::Read, key)?;
        let record = self.inner.get(key).await?;
        tracing::debug!(principal = %self.principal, key = %key, version = record.version, "Bridge value read");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::InMemoryParameterBridge;
    use crate::events::CollectingEventSink;

    fn store() -> Arc<dyn ParameterBridge> {
        Arc::new(InMemoryParameterBridge::new())
    }

    #[test]
    fn test_grants_require_prefix() {
        assert!(matches!(BridgeGrant::write(""), Err(BridgeError::InvalidGrant { .. })));
        assert!(matches!(BridgeGrant::read("  "), Err(BridgeError::InvalidGrant { .. })));
    }

    #[test]
    fn test_grant_covers_prefix_and_access() {
        let grant = BridgeGrant::write("/release/").unwrap();

        assert!(grant.covers(BridgeAccess::Write, "/release/latest-dev-tag"));
        assert!(!grant.covers(BridgeAccess::Read, "/release/latest-dev-tag"));
        assert!(!grant.covers(BridgeAccess::Write, "/other/latest-dev-tag"));
    }

    #[tokio::test]
    async fn test_write_grant_does_not_allow_reads() {
        let writer = ScopedBridge::new(store(), "build", vec![BridgeGrant::write("/release/").unwrap()]);
        writer.put("/release/tag", "abc123").await.unwrap();

        let err = writer.get("/release/tag").await.unwrap_err();
        assert_eq!(
            err,
            BridgeError::PermissionDenied {
                principal: "build".to_string(),
                key: "/release/tag".to_string(),
                access: BridgeAccess::Read,
            }
        );
    }

    #[tokio::test]
    async fn test_writes_outside_prefix_are_denied() {
        let inner = store();
        let writer = ScopedBridge::new(
            Arc::clone(&inner),
            "build",
            vec![BridgeGrant::write("/release/").unwrap()],
        );

        assert!(writer.put("/secrets/db", "x").await.is_err());
        assert!(matches!(inner.get("/secrets/db").await, Err(BridgeError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_reader_sees_writer_value_and_put_emits_event() {
        let inner = store();
        let events = Arc::new(CollectingEventSink::new());
        let writer = ScopedBridge::new(
            Arc::clone(&inner),
            "build",
            vec![BridgeGrant::write("/release/").unwrap()],
        )
        .with_event_sink(events.clone());
        let reader = ScopedBridge::new(inner, "promote", vec![BridgeGrant::read("/release/tag").unwrap()]);

        writer.put("/release/tag", "abc123").await.unwrap();

        assert_eq!(reader.get("/release/tag").await.unwrap().value, "abc123");
        assert_eq!(events.event_types(), vec!["bridge.put"]);
    }
}
