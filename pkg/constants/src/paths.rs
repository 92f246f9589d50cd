//! Filesystem path defaults.

/// Default config file path for the deploy driver.
pub const DEFAULT_DEPLOY_CONFIG: &str = "/etc/podrep/config.yaml";

/// Default data directory for the SlateDB-backed coordination store.
pub const DEFAULT_DATA_DIR: &str = "/tmp/podrep-data";
