//! State store registry keys and retry/lock tuning.

// ─── Registry prefixes ─────────────────────────────────────────────────────

/// etcd-style prefix for persisted replication controller records.
pub const RC_REGISTRY_PREFIX: &str = "/registry/controllers/";

/// Prefix for label sets, keyed by entity type then entity id,
/// e.g. `/registry/labels/node/worker-1`.
pub const LABEL_REGISTRY_PREFIX: &str = "/registry/labels/";

// ─── Retry ─────────────────────────────────────────────────────────────────

/// Default number of attempts for a store round-trip before the error is
/// surfaced to the caller.
pub const DEFAULT_STORE_RETRIES: u32 = 3;

/// Pause between retry attempts, in milliseconds.
pub const STORE_RETRY_BACKOFF_MS: u64 = 100;

// ─── Advisory locks ────────────────────────────────────────────────────────

/// How long a pod lock lease is valid before another holder may steal it,
/// in seconds.
pub const POD_LOCK_TTL_SECS: u64 = 30;
