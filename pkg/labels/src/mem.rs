use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast, mpsc};

use pkg_types::selector::Selector;

use crate::{Applicator, LabelType, Labeled};

/// In-memory label store for tests and dry runs.
pub struct MemApplicator {
    sets: Arc<RwLock<BTreeMap<(LabelType, String), HashMap<String, String>>>>,
    changed: broadcast::Sender<()>,
}

impl MemApplicator {
    pub fn new() -> Self {
        let (changed, _) = broadcast::channel(64);
        Self {
            sets: Arc::new(RwLock::new(BTreeMap::new())),
            changed,
        }
    }

    fn notify(&self) {
        let _ = self.changed.send(());
    }

    async fn snapshot(
        sets: &RwLock<BTreeMap<(LabelType, String), HashMap<String, String>>>,
        label_type: LabelType,
        selector: &Selector,
    ) -> Vec<Labeled> {
        sets.read()
            .await
            .iter()
            .filter(|((lt, _), labels)| *lt == label_type && selector.matches(labels))
            .map(|((lt, id), labels)| Labeled {
                label_type: *lt,
                id: id.clone(),
                labels: labels.clone(),
            })
            .collect()
    }
}

impl Default for MemApplicator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Applicator for MemApplicator {
    async fn set_labels(
        &self,
        label_type: LabelType,
        id: &str,
        labels: HashMap<String, String>,
    ) -> Result<()> {
        self.sets
            .write()
            .await
            .entry((label_type, id.to_string()))
            .or_default()
            .extend(labels);
        self.notify();
        Ok(())
    }

    async fn get_labels(&self, label_type: LabelType, id: &str) -> Result<HashMap<String, String>> {
        Ok(self
            .sets
            .read()
            .await
            .get(&(label_type, id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn remove_labels(&self, label_type: LabelType, id: &str, keys: &[String]) -> Result<()> {
        let mut sets = self.sets.write().await;
        if let Some(labels) = sets.get_mut(&(label_type, id.to_string())) {
            for key in keys {
                labels.remove(key);
            }
            if labels.is_empty() {
                sets.remove(&(label_type, id.to_string()));
            }
        }
        drop(sets);
        self.notify();
        Ok(())
    }

    async fn remove_all_labels(&self, label_type: LabelType, id: &str) -> Result<()> {
        self.sets
            .write()
            .await
            .remove(&(label_type, id.to_string()));
        self.notify();
        Ok(())
    }

    async fn get_matches(&self, label_type: LabelType, selector: &Selector) -> Result<Vec<Labeled>> {
        Ok(Self::snapshot(&self.sets, label_type, selector).await)
    }

    async fn watch_matches(
        &self,
        label_type: LabelType,
        selector: &Selector,
    ) -> Result<mpsc::Receiver<Vec<Labeled>>> {
        let (tx, rx) = mpsc::channel(8);
        let sets = self.sets.clone();
        let mut changes = self.changed.subscribe();
        let selector = selector.clone();

        tokio::spawn(async move {
            let initial = Self::snapshot(&sets, label_type, &selector).await;
            if tx.send(initial).await.is_err() {
                return;
            }
            loop {
                // Lag just means we coalesce several changes into one
                // snapshot; a closed sender means the store is gone.
                match changes.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return,
                }
                let snapshot = Self::snapshot(&sets, label_type, &selector).await;
                if tx.send(snapshot).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}
