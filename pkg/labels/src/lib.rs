//! Label bookkeeping for podrep entities.
//!
//! Every controller, node, and pod can carry a string-to-string label set.
//! Controllers tag pods with an ownership label, and the scheduler resolves
//! node selectors against node labels. The `Applicator` trait is the one
//! seam: an in-memory fake backs deterministic tests, a store-backed
//! implementation backs production.

mod kv;
mod mem;

use std::collections::HashMap;
use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use pkg_types::selector::Selector;

pub use kv::KvApplicator;
pub use mem::MemApplicator;

/// Kind of entity a label set is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelType {
    Rc,
    Node,
    Pod,
}

impl LabelType {
    pub fn as_str(self) -> &'static str {
        match self {
            LabelType::Rc => "rc",
            LabelType::Node => "node",
            LabelType::Pod => "pod",
        }
    }
}

impl fmt::Display for LabelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entity together with its current label set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labeled {
    pub label_type: LabelType,
    pub id: String,
    pub labels: HashMap<String, String>,
}

/// Capability set for reading, writing, and watching label sets.
#[async_trait]
pub trait Applicator: Send + Sync {
    /// Merge `labels` into the entity's label set (last write wins per key).
    async fn set_labels(
        &self,
        label_type: LabelType,
        id: &str,
        labels: HashMap<String, String>,
    ) -> Result<()>;

    /// The entity's label set. An entity with no labels yields an empty
    /// map, not an error.
    async fn get_labels(&self, label_type: LabelType, id: &str) -> Result<HashMap<String, String>>;

    /// Remove the named keys from the entity's label set.
    async fn remove_labels(&self, label_type: LabelType, id: &str, keys: &[String]) -> Result<()>;

    /// Remove the entity's label set entirely, leaving zero residual labels.
    async fn remove_all_labels(&self, label_type: LabelType, id: &str) -> Result<()>;

    /// All entities of `label_type` matching `selector`, ordered by id.
    async fn get_matches(&self, label_type: LabelType, selector: &Selector) -> Result<Vec<Labeled>>;

    /// Stream of match-set snapshots for `selector`: one snapshot up front,
    /// then one after every relevant label change. The stream ends only
    /// when the receiver is dropped.
    async fn watch_matches(
        &self,
        label_type: LabelType,
        selector: &Selector,
    ) -> Result<mpsc::Receiver<Vec<Labeled>>>;
}
