//! Coordination-store pod tree roots.
//!
//! Every pod record lives under one of three subtrees: `intent` holds the
//! desired per-node placement written by controllers, `reality` holds the
//! observed per-node state written by node agents, and `hooks` holds
//! lifecycle-hook pods, which are not bound to a host.

/// Root of the desired-placement subtree (`/intent/<node>/<pod>`).
pub const INTENT_TREE: &str = "/intent";

/// Root of the observed-placement subtree (`/reality/<node>/<pod>`).
pub const REALITY_TREE: &str = "/reality";

/// Root of the lifecycle-hook subtree (`/hooks/<pod>`). Hook pods are
/// host-agnostic, so there is no node segment.
pub const HOOK_TREE: &str = "/hooks";

/// Prefix prepended to a pod path to form its advisory lock key,
/// e.g. `/lock/intent/<node>/<pod>`. The key exists only while held.
pub const LOCK_TREE: &str = "/lock";
