use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use pkg_state::watch::{EventKind, EventLog, WatchEvent};
use pkg_types::id::RcId;
use pkg_types::manifest::Manifest;
use pkg_types::rc::RcRecord;
use pkg_types::selector::Selector;

use crate::{Error, RcStore, Result, rc_key};

/// In-memory [`RcStore`] for deterministic reconciliation tests and dry
/// runs. Enforces the same invariants as the durable store; does not touch
/// a label applicator.
pub struct MemRcStore {
    records: RwLock<HashMap<RcId, RcRecord>>,
    events: EventLog,
}

impl MemRcStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            events: EventLog::default(),
        }
    }

    async fn mutate(&self, id: &str, f: &(dyn Fn(&mut RcRecord) + Sync)) -> Result<RcRecord> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        f(record);
        let updated = record.clone();
        drop(records);

        let bytes = serde_json::to_vec(&updated).map_err(anyhow::Error::from)?;
        self.events
            .record(EventKind::Put, rc_key(id), Some(bytes))
            .await;
        Ok(updated)
    }
}

impl Default for MemRcStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RcStore for MemRcStore {
    async fn create(
        &self,
        manifest: Manifest,
        node_selector: Selector,
        pod_labels: HashMap<String, String>,
    ) -> Result<RcRecord> {
        let record = RcRecord {
            id: Uuid::new_v4().to_string(),
            manifest,
            node_selector,
            pod_labels,
            disabled: false,
            replicas_desired: 0,
        };
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());

        let bytes = serde_json::to_vec(&record).map_err(anyhow::Error::from)?;
        self.events
            .record(EventKind::Put, rc_key(&record.id), Some(bytes))
            .await;
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<RcRecord> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<RcRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn set_desired_replicas(&self, id: &str, replicas: u32) -> Result<()> {
        self.mutate(id, &move |record| record.replicas_desired = replicas)
            .await?;
        Ok(())
    }

    async fn disable(&self, id: &str) -> Result<()> {
        self.mutate(id, &|record| record.disabled = true).await?;
        Ok(())
    }

    async fn enable(&self, id: &str) -> Result<()> {
        self.mutate(id, &|record| record.disabled = false).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if record.replicas_desired > 0 {
            return Err(Error::Conflict {
                id: id.to_string(),
                replicas_desired: record.replicas_desired,
            });
        }
        records.remove(id);
        drop(records);

        self.events
            .record(EventKind::Delete, rc_key(id), None)
            .await;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}
