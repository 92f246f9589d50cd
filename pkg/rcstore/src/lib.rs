//! Durable storage for replication controller records.
//!
//! The store owns the persisted representation: controllers hold a
//! read-mostly copy refreshed from watch events. Replica arithmetic goes
//! through compare-and-put so concurrent updates to the same record are
//! never silently dropped.

mod kv;
mod mem;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use pkg_state::watch::WatchEvent;
use pkg_types::id::RcId;
use pkg_types::manifest::Manifest;
use pkg_types::rc::RcRecord;
use pkg_types::selector::Selector;

pub use kv::KvRcStore;
pub use mem::MemRcStore;

/// Errors callers of an [`RcStore`] match on.
///
/// `NotFound` and `Conflict` are precondition failures and are never
/// retried; `Storage` means the coordination store stayed unreachable
/// through the retry budget.
#[derive(Debug, Error)]
pub enum Error {
    #[error("replication controller {0} does not exist")]
    NotFound(RcId),

    #[error("replication controller {id} still wants {replicas_desired} replica(s), refusing to delete")]
    Conflict { id: RcId, replicas_desired: u32 },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Capability set for persisting replication controller records.
#[async_trait]
pub trait RcStore: Send + Sync {
    /// Persist a new record with a fresh id, zero desired replicas, and
    /// scheduling enabled. `pod_labels` are also applied to the record's
    /// own label entity so controllers are selectable.
    async fn create(
        &self,
        manifest: Manifest,
        node_selector: Selector,
        pod_labels: HashMap<String, String>,
    ) -> Result<RcRecord>;

    async fn get(&self, id: &str) -> Result<RcRecord>;

    /// Every persisted record; order is not guaranteed.
    async fn list(&self) -> Result<Vec<RcRecord>>;

    /// Atomically update the desired replica count.
    async fn set_desired_replicas(&self, id: &str, replicas: u32) -> Result<()>;

    /// Suspend scheduling actions. Idempotent.
    async fn disable(&self, id: &str) -> Result<()>;

    /// Resume scheduling actions. Idempotent.
    async fn enable(&self, id: &str) -> Result<()>;

    /// Remove the record permanently, along with every label on its
    /// entity. Fails with [`Error::Conflict`] while replicas are desired.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Change notifications for persisted records; the watch loop's
    /// trigger. Events carry the record's registry key.
    fn subscribe(&self) -> broadcast::Receiver<WatchEvent>;
}

/// Registry key of one record; watch consumers filter events with this.
pub fn rc_key(id: &str) -> String {
    format!("{}{}", pkg_constants::state::RC_REGISTRY_PREFIX, id)
}
