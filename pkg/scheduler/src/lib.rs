//! Node selection for replication controllers.
//!
//! A scheduler resolves a label selector into the ordered set of nodes a
//! controller may place pods on. Ordering is deterministic (sorted by node
//! name) so the same selector and label state always produce the same
//! placement.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use pkg_labels::{Applicator, LabelType};
use pkg_types::id::NodeName;
use pkg_types::selector::Selector;

/// Anything that can resolve a selector into eligible nodes.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Nodes matching `selector`, in a stable, deterministic order.
    /// Failures here are retryable; controllers resolve again next tick.
    async fn eligible(&self, selector: &Selector) -> Result<Vec<NodeName>>;
}

/// Canonical scheduler: matches the selector against node labels in the
/// Label Applicator.
pub struct ApplicatorScheduler {
    applicator: Arc<dyn Applicator>,
}

impl ApplicatorScheduler {
    pub fn new(applicator: Arc<dyn Applicator>) -> Self {
        Self { applicator }
    }
}

#[async_trait]
impl Scheduler for ApplicatorScheduler {
    async fn eligible(&self, selector: &Selector) -> Result<Vec<NodeName>> {
        let matches = self
            .applicator
            .get_matches(LabelType::Node, selector)
            .await
            .context("node selector resolution failed")?;
        // get_matches orders by id already; nodes come back sorted.
        let nodes: Vec<NodeName> = matches.into_iter().map(|m| m.id).collect();
        debug!("selector '{}' matched {} node(s)", selector, nodes.len());
        Ok(nodes)
    }
}

/// Fake scheduler that always answers with the same node list, for
/// deterministic controller tests without any label state.
pub struct FixedScheduler {
    nodes: Vec<NodeName>,
}

impl FixedScheduler {
    pub fn new(mut nodes: Vec<NodeName>) -> Self {
        nodes.sort();
        Self { nodes }
    }
}

#[async_trait]
impl Scheduler for FixedScheduler {
    async fn eligible(&self, _selector: &Selector) -> Result<Vec<NodeName>> {
        Ok(self.nodes.clone())
    }
}

/// Scheduler backed by an external node-inventory HTTP endpoint.
///
/// The endpoint is queried with the selector expression and must answer
/// with a JSON array of node names.
pub struct HttpScheduler {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpScheduler {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl Scheduler for HttpScheduler {
    async fn eligible(&self, selector: &Selector) -> Result<Vec<NodeName>> {
        let mut nodes: Vec<NodeName> = self
            .client
            .get(&self.endpoint)
            .query(&[("selector", selector.to_string())])
            .send()
            .await
            .context("node inventory request failed")?
            .error_for_status()
            .context("node inventory endpoint rejected the query")?
            .json()
            .await
            .context("node inventory response is not a JSON array of names")?;
        nodes.sort();
        nodes.dedup();
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_labels::MemApplicator;
    use std::collections::HashMap;

    async fn node(app: &MemApplicator, name: &str, pairs: &[(&str, &str)]) {
        let labels: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        app.set_labels(LabelType::Node, name, labels).await.unwrap();
    }

    #[tokio::test]
    async fn resolves_selector_to_sorted_nodes() {
        let app = Arc::new(MemApplicator::new());
        node(&app, "worker-3", &[("app", "web")]).await;
        node(&app, "worker-1", &[("app", "web")]).await;
        node(&app, "worker-2", &[("app", "api")]).await;

        let scheduler = ApplicatorScheduler::new(app);
        let sel = Selector::parse("app=web").unwrap();
        let eligible = scheduler.eligible(&sel).await.unwrap();
        assert_eq!(eligible, vec!["worker-1", "worker-3"]);
    }

    #[tokio::test]
    async fn same_state_same_order() {
        let app = Arc::new(MemApplicator::new());
        for name in ["b", "d", "a", "c"] {
            node(&app, name, &[("pool", "default")]).await;
        }
        let scheduler = ApplicatorScheduler::new(app);
        let sel = Selector::parse("pool=default").unwrap();

        let first = scheduler.eligible(&sel).await.unwrap();
        let second = scheduler.eligible(&sel).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn empty_selector_matches_all_nodes() {
        let app = Arc::new(MemApplicator::new());
        node(&app, "n1", &[("a", "1")]).await;
        node(&app, "n2", &[("b", "2")]).await;

        let scheduler = ApplicatorScheduler::new(app);
        let eligible = scheduler.eligible(&Selector::default()).await.unwrap();
        assert_eq!(eligible, vec!["n1", "n2"]);
    }
}
