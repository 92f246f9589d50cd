use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use pkg_constants::state::POD_LOCK_TTL_SECS;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::store::KvStore;

/// Holder record stored at a lock path while the lock is held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockLease {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl LockLease {
    pub fn is_expired(&self) -> bool {
        let expiry = self.acquired_at + chrono::Duration::seconds(self.ttl_seconds as i64);
        Utc::now() > expiry
    }
}

/// Advisory lock scoped to a single store key.
///
/// Acquisition is a conditional create of a holder lease; a live lease
/// blocks other holders, an expired one may be stolen. The key exists only
/// while the lock is held, so crashed holders release on TTL expiry.
pub struct Lock {
    store: Arc<dyn KvStore>,
    path: String,
    lease_bytes: Vec<u8>,
}

impl Lock {
    /// Take the lock at `path`, failing if another live holder has it.
    pub async fn acquire(store: Arc<dyn KvStore>, path: &str, holder: &str) -> Result<Self> {
        let lease = LockLease {
            holder: holder.to_string(),
            acquired_at: Utc::now(),
            ttl_seconds: POD_LOCK_TTL_SECS,
        };
        let lease_bytes = serde_json::to_vec(&lease)?;

        let landed = match store.get(path).await? {
            None => store.compare_and_put(path, None, &lease_bytes).await?,
            Some(existing) => {
                let current: LockLease = serde_json::from_slice(&existing)?;
                if !current.is_expired() {
                    bail!("lock {} is held by {}", path, current.holder);
                }
                info!(
                    "Lock {} expired (held by {}), stealing for {}",
                    path, current.holder, holder
                );
                store
                    .compare_and_put(path, Some(existing.as_slice()), &lease_bytes)
                    .await?
            }
        };
        if !landed {
            bail!("lock {} lost to a concurrent acquirer", path);
        }
        Ok(Self {
            store,
            path: path.to_string(),
            lease_bytes,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Give the lock back. If the lease was already stolen after expiry,
    /// the steal wins and release is a no-op.
    pub async fn release(self) -> Result<()> {
        let removed = self
            .store
            .compare_and_delete(&self.path, &self.lease_bytes)
            .await?;
        if !removed {
            warn!("Lock {} was already released or stolen", self.path);
        }
        Ok(())
    }
}
