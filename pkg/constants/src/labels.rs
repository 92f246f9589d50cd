//! Well-known label keys applied by podrep controllers.

/// Label stamped on every pod entity a replication controller schedules,
/// holding the id of the owning controller. Ownership queries and
/// `current_nodes` resolution key off this label.
pub const RC_OWNER_LABEL: &str = "replication-controller-id";

/// Label recording the manifest digest a pod was scheduled from.
pub const POD_DIGEST_LABEL: &str = "manifest-digest";
