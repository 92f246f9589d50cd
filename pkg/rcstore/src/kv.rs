use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use pkg_labels::{Applicator, LabelType};
use pkg_state::retry::Retry;
use pkg_state::store::KvStore;
use pkg_state::watch::WatchEvent;
use pkg_types::manifest::Manifest;
use pkg_types::rc::RcRecord;
use pkg_types::selector::Selector;

use crate::{Error, RcStore, Result, rc_key};

/// Coordination-store-backed [`RcStore`].
///
/// Records live at `/registry/controllers/<id>` as JSON. Mutations are
/// read-modify-write under compare-and-put: a racing writer makes the
/// compare fail, and the losing side re-reads and reapplies. Store
/// round-trips are retried on transient failure; NotFound and Conflict are
/// decided above the KV layer and never retried.
pub struct KvRcStore {
    store: Arc<dyn KvStore>,
    applicator: Arc<dyn Applicator>,
    retry: Retry,
}

impl KvRcStore {
    pub fn new(store: Arc<dyn KvStore>, applicator: Arc<dyn Applicator>, retries: u32) -> Self {
        Self {
            store,
            applicator,
            retry: Retry::new(retries),
        }
    }

    async fn read(&self, id: &str) -> Result<Option<(Vec<u8>, RcRecord)>> {
        let key = rc_key(id);
        let store = &self.store;
        let bytes = self
            .retry
            .run("controller read", || {
                let key = &key;
                async move { store.get(key).await }
            })
            .await?;
        match bytes {
            Some(bytes) => {
                let record: RcRecord = serde_json::from_slice(&bytes)
                    .with_context(|| format!("corrupt controller record {}", id))?;
                Ok(Some((bytes, record)))
            }
            None => Ok(None),
        }
    }

    /// Apply `mutate` to the record under CAS until the write lands.
    async fn update(&self, id: &str, mutate: &(dyn Fn(&mut RcRecord) + Sync)) -> Result<RcRecord> {
        let key = rc_key(id);
        loop {
            let Some((old_bytes, mut record)) = self.read(id).await? else {
                return Err(Error::NotFound(id.to_string()));
            };
            mutate(&mut record);
            let new_bytes = serde_json::to_vec(&record).map_err(anyhow::Error::from)?;

            let store = &self.store;
            let landed = self
                .retry
                .run("controller update", || {
                    let (key, old_bytes, new_bytes) = (&key, &old_bytes, &new_bytes);
                    async move {
                        store
                            .compare_and_put(key, Some(old_bytes.as_slice()), new_bytes)
                            .await
                    }
                })
                .await?;
            if landed {
                return Ok(record);
            }
            // A concurrent writer got there first; re-read and reapply.
        }
    }
}

#[async_trait]
impl RcStore for KvRcStore {
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
        let key = rc_key(&record.id);
        let bytes = serde_json::to_vec(&record).map_err(anyhow::Error::from)?;

        let store = &self.store;
        self.retry
            .run("controller create", || {
                let (key, bytes) = (&key, &bytes);
                async move { store.put(key, bytes).await }
            })
            .await?;
        self.applicator
            .set_labels(LabelType::Rc, &record.id, record.pod_labels.clone())
            .await?;

        info!(
            "Created replication controller {} for pod {}",
            record.id, record.manifest.id
        );
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<RcRecord> {
        match self.read(id).await? {
            Some((_, record)) => Ok(record),
            None => Err(Error::NotFound(id.to_string())),
        }
    }

    async fn list(&self) -> Result<Vec<RcRecord>> {
        let store = &self.store;
        let entries = self
            .retry
            .run("controller list", || async move {
                store
                    .list_prefix(pkg_constants::state::RC_REGISTRY_PREFIX)
                    .await
            })
            .await?;
        Ok(entries
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
            .collect())
    }

    async fn set_desired_replicas(&self, id: &str, replicas: u32) -> Result<()> {
        let record = self
            .update(id, &move |record| record.replicas_desired = replicas)
            .await?;
        info!(
            "Controller {} now wants {} replica(s)",
            id, record.replicas_desired
        );
        Ok(())
    }

    async fn disable(&self, id: &str) -> Result<()> {
        self.update(id, &|record| record.disabled = true).await?;
        Ok(())
    }

    async fn enable(&self, id: &str) -> Result<()> {
        self.update(id, &|record| record.disabled = false).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let key = rc_key(id);
        loop {
            let Some((old_bytes, record)) = self.read(id).await? else {
                return Err(Error::NotFound(id.to_string()));
            };
            if record.replicas_desired > 0 {
                return Err(Error::Conflict {
                    id: id.to_string(),
                    replicas_desired: record.replicas_desired,
                });
            }

            let store = &self.store;
            let landed = self
                .retry
                .run("controller delete", || {
                    let (key, old_bytes) = (&key, &old_bytes);
                    async move { store.compare_and_delete(key, old_bytes).await }
                })
                .await?;
            if landed {
                break;
            }
            // Lost a race; re-read and re-check the precondition.
        }

        self.applicator.remove_all_labels(LabelType::Rc, id).await?;
        info!("Deleted replication controller {}", id);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.store.event_log().subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_labels::KvApplicator;
    use pkg_state::store::MemoryStore;

    fn fixture() -> (KvRcStore, Arc<dyn Applicator>) {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let applicator: Arc<dyn Applicator> = Arc::new(KvApplicator::new(store.clone(), 3));
        (KvRcStore::new(store, applicator.clone(), 3), applicator)
    }

    fn manifest() -> Manifest {
        Manifest::from_yaml_str("id: helloworld\nimage: hello:1\n").unwrap()
    }

    fn pod_labels() -> HashMap<String, String> {
        HashMap::from([("deployed-by".to_string(), "podrep".to_string())])
    }

    async fn create(store: &KvRcStore) -> RcRecord {
        store
            .create(
                manifest(),
                Selector::parse("app=helloworld").unwrap(),
                pod_labels(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (store, _) = fixture();
        let created = create(&store).await;
        assert_eq!(created.replicas_desired, 0);
        assert!(!created.disabled);

        let fetched = store.get(&created.id).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn create_labels_the_controller_entity() {
        let (store, applicator) = fixture();
        let created = create(&store).await;
        let labels = applicator
            .get_labels(LabelType::Rc, &created.id)
            .await
            .unwrap();
        assert_eq!(labels, pod_labels());
    }

    #[tokio::test]
    async fn unknown_ids_fail_with_not_found() {
        let (store, _) = fixture();
        assert!(matches!(store.get("bogus").await, Err(Error::NotFound(_))));
        assert!(matches!(
            store.set_desired_replicas("bogus", 1).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(store.disable("bogus").await, Err(Error::NotFound(_))));
        assert!(matches!(store.enable("bogus").await, Err(Error::NotFound(_))));
        assert!(matches!(store.delete("bogus").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn list_contains_each_record_exactly_once() {
        let (store, _) = fixture();
        let created = create(&store).await;

        let listed = store.list().await.unwrap();
        assert_eq!(
            listed.iter().filter(|r| r.id == created.id).count(),
            1,
            "created record should appear exactly once"
        );

        store.delete(&created.id).await.unwrap();
        let listed = store.list().await.unwrap();
        assert!(listed.iter().all(|r| r.id != created.id));
    }

    #[tokio::test]
    async fn set_desired_replicas_persists() {
        let (store, _) = fixture();
        let created = create(&store).await;
        store.set_desired_replicas(&created.id, 3).await.unwrap();
        assert_eq!(store.get(&created.id).await.unwrap().replicas_desired, 3);
    }

    #[tokio::test]
    async fn disable_is_idempotent() {
        let (store, _) = fixture();
        let created = create(&store).await;

        store.disable(&created.id).await.unwrap();
        store.disable(&created.id).await.unwrap();
        assert!(store.get(&created.id).await.unwrap().disabled);

        store.enable(&created.id).await.unwrap();
        assert!(!store.get(&created.id).await.unwrap().disabled);
    }

    #[tokio::test]
    async fn delete_conflicts_while_replicas_are_desired() {
        let (store, _) = fixture();
        let created = create(&store).await;
        store.set_desired_replicas(&created.id, 2).await.unwrap();

        match store.delete(&created.id).await {
            Err(Error::Conflict {
                replicas_desired, ..
            }) => assert_eq!(replicas_desired, 2),
            other => panic!("expected conflict, got {:?}", other.map(|_| ())),
        }
        // The record is untouched by the failed delete.
        assert_eq!(store.get(&created.id).await.unwrap().replicas_desired, 2);

        store.set_desired_replicas(&created.id, 0).await.unwrap();
        store.delete(&created.id).await.unwrap();
        assert!(matches!(
            store.get(&created.id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_leaves_no_labels_behind() {
        let (store, applicator) = fixture();
        let created = create(&store).await;
        store.delete(&created.id).await.unwrap();
        let labels = applicator
            .get_labels(LabelType::Rc, &created.id)
            .await
            .unwrap();
        assert!(labels.is_empty());
    }

    #[tokio::test]
    async fn subscribe_sees_record_changes() {
        let (store, _) = fixture();
        let mut events = store.subscribe();
        let created = create(&store).await;
        // First event for this record's key is the create.
        loop {
            let event = events.recv().await.unwrap();
            if event.key == rc_key(&created.id) {
                break;
            }
        }
    }
}
