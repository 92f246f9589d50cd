use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::watch::{EventKind, EventLog};

/// Capability set every coordination-store backend provides.
///
/// Conditional writes are atomic per key: of two writers racing with the
/// same expectation, exactly one observes `Ok(true)` and the other
/// `Ok(false)`. `Ok(false)` is a lost race, not a failure; callers re-read
/// and retry. `Err` is reserved for connectivity problems.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// All key-value pairs whose keys start with `prefix`, in key order.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Write `value` only if the key currently holds `expected`
    /// (`None` = the key must not exist). Returns whether the write landed.
    async fn compare_and_put(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
    ) -> Result<bool>;

    /// Delete the key only if it currently holds `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool>;

    /// The store's change log, for watches.
    fn event_log(&self) -> &EventLog;
}

/// In-memory store used by tests, fakes, and dry runs.
///
/// A `BTreeMap` keeps prefix listings in deterministic key order.
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
    events: EventLog,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            events: EventLog::default(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.data
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        self.events
            .record(EventKind::Put, key.to_string(), Some(value.to_vec()))
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let existed = self.data.write().await.remove(key).is_some();
        if existed {
            self.events
                .record(EventKind::Delete, key.to_string(), None)
                .await;
        }
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .data
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn compare_and_put(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
    ) -> Result<bool> {
        let mut data = self.data.write().await;
        if data.get(key).map(|v| v.as_slice()) != expected {
            return Ok(false);
        }
        data.insert(key.to_string(), value.to_vec());
        drop(data);
        self.events
            .record(EventKind::Put, key.to_string(), Some(value.to_vec()))
            .await;
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let mut data = self.data.write().await;
        if data.get(key).map(|v| v.as_slice()) != Some(expected) {
            return Ok(false);
        }
        data.remove(key);
        drop(data);
        self.events
            .record(EventKind::Delete, key.to_string(), None)
            .await;
        Ok(true)
    }

    fn event_log(&self) -> &EventLog {
        &self.events
    }
}
