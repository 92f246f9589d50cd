use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use pkg_constants::state::LABEL_REGISTRY_PREFIX;
use pkg_state::retry::Retry;
use pkg_state::store::KvStore;
use pkg_types::selector::Selector;

use crate::{Applicator, LabelType, Labeled};

/// Store-backed label applicator.
///
/// Label sets live at `/registry/labels/<type>/<id>` as JSON maps. Updates
/// are read-modify-write under compare-and-put, so concurrent mergers to
/// the same entity cannot drop each other's keys. Every store round-trip is
/// wrapped in the bounded retry policy.
pub struct KvApplicator {
    store: Arc<dyn KvStore>,
    retry: Retry,
}

impl KvApplicator {
    pub fn new(store: Arc<dyn KvStore>, retries: u32) -> Self {
        Self {
            store,
            retry: Retry::new(retries),
        }
    }

    fn label_key(label_type: LabelType, id: &str) -> String {
        format!("{}{}/{}", LABEL_REGISTRY_PREFIX, label_type.as_str(), id)
    }

    fn type_prefix(label_type: LabelType) -> String {
        format!("{}{}/", LABEL_REGISTRY_PREFIX, label_type.as_str())
    }

    /// Apply `mutate` to the entity's label map under CAS. An emptied map
    /// deletes the registry entry so no residue is left behind.
    async fn update(
        &self,
        label_type: LabelType,
        id: &str,
        mutate: &(dyn Fn(&mut HashMap<String, String>) + Sync),
    ) -> Result<()> {
        let key = Self::label_key(label_type, id);
        let store = &self.store;
        self.retry
            .run("label update", || {
                let key = &key;
                async move {
                    loop {
                        let old = store.get(key).await?;
                        let mut labels: HashMap<String, String> = match &old {
                            Some(bytes) => serde_json::from_slice(bytes)
                                .context("corrupt label set in store")?,
                            None => HashMap::new(),
                        };
                        mutate(&mut labels);

                        let landed = if labels.is_empty() {
                            match &old {
                                Some(bytes) => store.compare_and_delete(key, bytes).await?,
                                None => true,
                            }
                        } else {
                            let new = serde_json::to_vec(&labels)?;
                            store.compare_and_put(key, old.as_deref(), &new).await?
                        };
                        if landed {
                            return Ok(());
                        }
                        // Lost a race with another writer; re-read and redo.
                    }
                }
            })
            .await
    }

    async fn snapshot(
        store: &Arc<dyn KvStore>,
        label_type: LabelType,
        selector: &Selector,
    ) -> Result<Vec<Labeled>> {
        let prefix = Self::type_prefix(label_type);
        let entries = store.list_prefix(&prefix).await?;
        let mut matches = Vec::new();
        for (key, value) in entries {
            let labels: HashMap<String, String> = match serde_json::from_slice(&value) {
                Ok(labels) => labels,
                Err(_) => continue,
            };
            if selector.matches(&labels) {
                let id = key.strip_prefix(&prefix).unwrap_or(&key).to_string();
                matches.push(Labeled {
                    label_type,
                    id,
                    labels,
                });
            }
        }
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches)
    }
}

#[async_trait]
impl Applicator for KvApplicator {
    async fn set_labels(
        &self,
        label_type: LabelType,
        id: &str,
        labels: HashMap<String, String>,
    ) -> Result<()> {
        self.update(label_type, id, &move |current| {
            current.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        })
        .await
    }

    async fn get_labels(&self, label_type: LabelType, id: &str) -> Result<HashMap<String, String>> {
        let key = Self::label_key(label_type, id);
        let store = &self.store;
        let bytes = self
            .retry
            .run("label read", || {
                let key = &key;
                async move { store.get(key).await }
            })
            .await?;
        match bytes {
            Some(bytes) => serde_json::from_slice(&bytes).context("corrupt label set in store"),
            None => Ok(HashMap::new()),
        }
    }

    async fn remove_labels(&self, label_type: LabelType, id: &str, keys: &[String]) -> Result<()> {
        self.update(label_type, id, &move |current| {
            for key in keys {
                current.remove(key);
            }
        })
        .await
    }

    async fn remove_all_labels(&self, label_type: LabelType, id: &str) -> Result<()> {
        self.update(label_type, id, &|current| current.clear()).await
    }

    async fn get_matches(&self, label_type: LabelType, selector: &Selector) -> Result<Vec<Labeled>> {
        let store = &self.store;
        self.retry
            .run("label match", || {
                let selector = &*selector;
                async move { Self::snapshot(store, label_type, selector).await }
            })
            .await
    }

    async fn watch_matches(
        &self,
        label_type: LabelType,
        selector: &Selector,
    ) -> Result<mpsc::Receiver<Vec<Labeled>>> {
        let (tx, rx) = mpsc::channel(8);
        let store = self.store.clone();
        let mut events = store.event_log().subscribe();
        let selector = selector.clone();
        let prefix = Self::type_prefix(label_type);

        tokio::spawn(async move {
            match Self::snapshot(&store, label_type, &selector).await {
                Ok(initial) => {
                    if tx.send(initial).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!("label watch initial snapshot failed: {}", e),
            }
            loop {
                match events.recv().await {
                    Ok(event) if event.key.starts_with(&prefix) => {}
                    Ok(_) => continue,
                    // Lag coalesces fine: the next snapshot reads current state.
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return,
                }
                match Self::snapshot(&store, label_type, &selector).await {
                    Ok(snapshot) => {
                        if tx.send(snapshot).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("label watch snapshot failed: {}", e),
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_state::store::MemoryStore;

    fn applicator() -> KvApplicator {
        KvApplicator::new(Arc::new(MemoryStore::new()), 3)
    }

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn round_trip_and_merge() {
        let app = applicator();
        app.set_labels(LabelType::Pod, "n1/app", labels(&[("team", "infra")]))
            .await
            .unwrap();
        app.set_labels(LabelType::Pod, "n1/app", labels(&[("tier", "prod")]))
            .await
            .unwrap();
        assert_eq!(
            app.get_labels(LabelType::Pod, "n1/app").await.unwrap(),
            labels(&[("team", "infra"), ("tier", "prod")])
        );
    }

    #[tokio::test]
    async fn removing_the_last_key_removes_the_entry() {
        let app = applicator();
        app.set_labels(LabelType::Rc, "rc-1", labels(&[("a", "1"), ("b", "2")]))
            .await
            .unwrap();
        app.remove_labels(LabelType::Rc, "rc-1", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert!(app.get_labels(LabelType::Rc, "rc-1").await.unwrap().is_empty());
        // The registry entry itself is gone, not just emptied.
        let leftovers = app.store.list_prefix(LABEL_REGISTRY_PREFIX).await.unwrap();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn get_matches_orders_by_id() {
        let app = applicator();
        for node in ["n3", "n1", "n2"] {
            app.set_labels(LabelType::Node, node, labels(&[("app", "web")]))
                .await
                .unwrap();
        }
        app.set_labels(LabelType::Node, "n4", labels(&[("app", "api")]))
            .await
            .unwrap();

        let sel = Selector::parse("app=web").unwrap();
        let ids: Vec<String> = app
            .get_matches(LabelType::Node, &sel)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["n1", "n2", "n3"]);
    }

    #[tokio::test]
    async fn watch_matches_streams_snapshots() {
        let app = applicator();
        let sel = Selector::parse("app=web").unwrap();
        let mut rx = app.watch_matches(LabelType::Node, &sel).await.unwrap();
        assert!(rx.recv().await.unwrap().is_empty());

        app.set_labels(LabelType::Node, "n1", labels(&[("app", "web")]))
            .await
            .unwrap();
        loop {
            let snapshot = rx.recv().await.unwrap();
            if snapshot.iter().any(|m| m.id == "n1") {
                break;
            }
        }

        app.remove_all_labels(LabelType::Node, "n1").await.unwrap();
        loop {
            let snapshot = rx.recv().await.unwrap();
            if snapshot.is_empty() {
                break;
            }
        }
    }
}
