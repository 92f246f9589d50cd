use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::id::RcId;
use crate::manifest::Manifest;
use crate::selector::Selector;

/// A persisted replication controller record.
///
/// `id` is assigned at creation and never changes. `replicas_desired` starts
/// at 0; a record with a nonzero count cannot be deleted. `disabled`
/// suspends scheduling actions while keeping the record and its current
/// placements intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RcRecord {
    pub id: RcId,
    pub manifest: Manifest,
    pub node_selector: Selector,
    #[serde(default)]
    pub pod_labels: HashMap<String, String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub replicas_desired: u32,
}
