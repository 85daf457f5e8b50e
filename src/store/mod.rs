//! Access to the shared realtime document store.
//!
//! Both players' clients talk to the same schemaless tree of JSON values.
//! Nodes are addressed by slash separated paths (`rooms/0421/scores`), and
//! every client can subscribe to a node to be told whenever it changes.

pub mod memory;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::watch;

pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Only raised by the failing store used in tests.
    #[cfg(test)]
    #[error("store is unreachable")]
    Unavailable,
    #[error("invalid path {0:?}")]
    InvalidPath(String),
    #[error("node at {0:?} is not an object")]
    NotAnObject(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Current value at `path`, `None` when nothing is stored there.
    async fn read(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Replaces the whole node at `path`. Writing `null` deletes it.
    async fn write(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Field-level update of the node at `path`.
    ///
    /// Keys may themselves be nested paths (`"scores/abc"`). A `null` value
    /// deletes that field, everything not named in `partial` is left alone.
    /// The whole update is applied atomically.
    async fn merge(&self, path: &str, partial: Map<String, Value>) -> Result<(), StoreError>;

    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError>;
}

/// Live view of one node.
///
/// The first call to [`Subscription::next`] yields the value as it was when
/// the subscription was opened; later calls wait for the next change. Fast
/// successive writes may be observed as a single change.
pub struct Subscription {
    receiver: watch::Receiver<Option<Value>>,
    primed: bool,
}

impl Subscription {
    pub fn new(receiver: watch::Receiver<Option<Value>>) -> Self {
        Self {
            receiver,
            primed: true,
        }
    }

    /// Waits for the next snapshot. Returns `None` once the store side is gone.
    pub async fn next(&mut self) -> Option<Option<Value>> {
        if self.primed {
            self.primed = false;
            return Some(self.receiver.borrow_and_update().clone());
        }
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    pub fn unsubscribe(self) {}
}

/// Splits a store path into its segments, rejecting empty paths.
pub fn segments(path: &str) -> Result<Vec<&str>, StoreError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_ignore_redundant_slashes() {
        assert_eq!(segments("/rooms//0042/").unwrap(), vec!["rooms", "0042"]);
    }

    #[test]
    fn empty_path_is_rejected() {
        assert!(matches!(segments("///"), Err(StoreError::InvalidPath(_))));
    }
}
