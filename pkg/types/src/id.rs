//! Identifier aliases.
//!
//! Ids are opaque strings throughout; these aliases document which kind of
//! id an API expects.

/// Unique id of a replication controller record, assigned at creation.
pub type RcId = String;

/// Id of a pod (one deployable instance of a manifest).
pub type PodId = String;

/// Name of a node in the cluster.
pub type NodeName = String;
