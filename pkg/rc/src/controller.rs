use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use pkg_constants::labels::{POD_DIGEST_LABEL, RC_OWNER_LABEL};
use pkg_labels::{Applicator, LabelType};
use pkg_rcstore::{RcStore, rc_key};
use pkg_scheduler::Scheduler;
use pkg_state::lock::Lock;
use pkg_state::paths::{PodTree, pod_lock_path, pod_path};
use pkg_state::store::KvStore;
use pkg_types::id::{NodeName, RcId};
use pkg_types::rc::RcRecord;
use pkg_types::selector::Selector;

/// Errors the watch loop reports on its error channel.
///
/// `Refresh` and `CurrentNodes` abort the tick that produced them;
/// `Resolve`, `Shortfall`, and `Node` leave the rest of the tick running.
/// None of them stop the loop.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("failed to refresh controller {id}: {source}")]
    Refresh {
        id: RcId,
        #[source]
        source: pkg_rcstore::Error,
    },

    #[error("failed to resolve node selector '{selector}': {source}")]
    Resolve {
        selector: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to list current nodes: {source}")]
    CurrentNodes {
        #[source]
        source: anyhow::Error,
    },

    #[error("selector matched {eligible} node(s), fewer than the {desired} replica(s) desired")]
    Shortfall { eligible: usize, desired: u32 },

    #[error("node {node}: {source}")]
    Node {
        node: NodeName,
        #[source]
        source: anyhow::Error,
    },
}

/// Running watch loop: error and success channels plus the stop signal.
pub struct WatchHandle {
    pub errors: mpsc::Receiver<ControllerError>,
    /// One message per fully clean tick; health monitors reset on these.
    pub ticks: mpsc::Receiver<()>,
    stop: StopHandle,
}

impl WatchHandle {
    /// Split into channels and stop signal so the channels can be consumed
    /// elsewhere (e.g. by a [`crate::HealthMonitor`]).
    pub fn into_parts(
        self,
    ) -> (
        mpsc::Receiver<ControllerError>,
        mpsc::Receiver<()>,
        StopHandle,
    ) {
        (self.errors, self.ticks, self.stop)
    }

    /// Stop the loop and wait for its acknowledgement.
    pub async fn stop(self) {
        self.stop.stop().await;
    }
}

/// Quit side of a watch loop.
pub struct StopHandle {
    quit: oneshot::Sender<()>,
    ack: oneshot::Receiver<()>,
}

impl StopHandle {
    /// Signal quit and block until the loop acknowledges. Once this
    /// returns, the loop has exited and performs no further writes.
    pub async fn stop(self) {
        let _ = self.quit.send(());
        let _ = self.ack.await;
    }
}

/// The reconciliation engine for one controller record.
///
/// Holds a read-mostly copy of the record, refreshed from the RC store on
/// every tick; the store stays the single source of truth. Correctness
/// against concurrent controllers comes from the store's per-key
/// conditional writes, not from in-process locking.
#[derive(Clone)]
pub struct ReplicationController {
    id: RcId,
    rc_store: Arc<dyn RcStore>,
    scheduler: Arc<dyn Scheduler>,
    applicator: Arc<dyn Applicator>,
    store: Arc<dyn KvStore>,
    tick_interval: Duration,
}

impl ReplicationController {
    pub fn new(
        id: RcId,
        rc_store: Arc<dyn RcStore>,
        scheduler: Arc<dyn Scheduler>,
        applicator: Arc<dyn Applicator>,
        store: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            id,
            rc_store,
            scheduler,
            applicator,
            store,
            tick_interval: Duration::from_secs(10),
        }
    }

    /// Override the fallback tick interval (tests use a short one).
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Start the watch loop as a background task.
    ///
    /// The loop reconciles on every change to this record and on a
    /// periodic fallback tick. Ticks run strictly sequentially. The loop
    /// exits only via [`WatchHandle::stop`], acknowledged after the final
    /// tick finishes.
    pub fn watch_desires(&self) -> WatchHandle {
        let (error_tx, errors) = mpsc::channel(32);
        let (tick_tx, ticks) = mpsc::channel(32);
        let (quit_tx, quit_rx) = oneshot::channel();
        let (ack_tx, ack_rx) = oneshot::channel();

        let controller = self.clone();
        tokio::spawn(async move {
            controller.run(quit_rx, ack_tx, error_tx, tick_tx).await;
        });

        WatchHandle {
            errors,
            ticks,
            stop: StopHandle {
                quit: quit_tx,
                ack: ack_rx,
            },
        }
    }

    async fn run(
        self,
        mut quit: oneshot::Receiver<()>,
        ack: oneshot::Sender<()>,
        errors: mpsc::Sender<ControllerError>,
        ticks: mpsc::Sender<()>,
    ) {
        info!(
            "Controller {} watch loop started (fallback tick {}ms)",
            self.id,
            self.tick_interval.as_millis()
        );
        let my_key = rc_key(&self.id);
        let mut events = self.rc_store.subscribe();
        let mut events_open = true;
        let mut interval = tokio::time::interval(self.tick_interval);

        loop {
            let fire = tokio::select! {
                _ = &mut quit => break,
                event = events.recv(), if events_open => match event {
                    Ok(event) => event.key == my_key,
                    // Missed notifications: reconcile rather than guess.
                    Err(broadcast::error::RecvError::Lagged(_)) => true,
                    Err(broadcast::error::RecvError::Closed) => {
                        events_open = false;
                        false
                    }
                },
                _ = interval.tick() => true,
            };
            if !fire {
                continue;
            }

            // try_send: a slow or absent channel consumer must never
            // stall reconciliation or quit handling.
            match self.reconcile_once().await {
                Ok(node_errors) if node_errors.is_empty() => {
                    let _ = ticks.try_send(());
                }
                Ok(node_errors) => {
                    for error in node_errors {
                        warn!("Controller {}: {}", self.id, error);
                        let _ = errors.try_send(error);
                    }
                }
                Err(error) => {
                    warn!("Controller {}: tick aborted: {}", self.id, error);
                    let _ = errors.try_send(error);
                }
            }
        }

        let _ = ack.send(());
        info!("Controller {} watch loop stopped", self.id);
    }

    /// One reconciliation pass. A returned `Err` aborted the whole tick;
    /// the `Ok` list carries isolated per-node failures.
    async fn reconcile_once(&self) -> Result<Vec<ControllerError>, ControllerError> {
        let record = self
            .rc_store
            .get(&self.id)
            .await
            .map_err(|source| ControllerError::Refresh {
                id: self.id.clone(),
                source,
            })?;

        if record.disabled {
            debug!("Controller {} is disabled, skipping scheduling", self.id);
            return Ok(Vec::new());
        }

        let eligible = self
            .scheduler
            .eligible(&record.node_selector)
            .await
            .map_err(|source| ControllerError::Resolve {
                selector: record.node_selector.to_string(),
                source,
            })?;

        let mut node_errors = Vec::new();
        let desired = record.replicas_desired as usize;
        if eligible.len() < desired {
            // Report the shortfall but still place onto what exists.
            node_errors.push(ControllerError::Shortfall {
                eligible: eligible.len(),
                desired: record.replicas_desired,
            });
        }
        let target: BTreeSet<NodeName> = eligible.into_iter().take(desired).collect();
        let current: BTreeSet<NodeName> = self
            .current_nodes()
            .await
            .map_err(|source| ControllerError::CurrentNodes { source })?
            .into_iter()
            .collect();

        for node in target.difference(&current) {
            if let Err(source) = self.schedule(&record, node).await {
                node_errors.push(ControllerError::Node {
                    node: node.clone(),
                    source,
                });
            }
        }
        for node in current.difference(&target) {
            if let Err(source) = self.unschedule(&record, node).await {
                node_errors.push(ControllerError::Node {
                    node: node.clone(),
                    source,
                });
            }
        }
        Ok(node_errors)
    }

    /// Write the pod's intent entry on `node` and label the pod entity.
    async fn schedule(&self, record: &RcRecord, node: &str) -> Result<()> {
        let path = pod_path(PodTree::Intent, node, &record.manifest.id)?;
        let bytes = serde_json::to_vec(&record.manifest)?;

        let existing = self.store.get(&path).await?;
        if existing.as_deref() != Some(bytes.as_slice()) {
            let landed = self
                .store
                .compare_and_put(&path, existing.as_deref(), &bytes)
                .await?;
            if !landed {
                // Another writer changed this entry between read and
                // write; next tick re-reads and retries.
                bail!("intent entry {} changed concurrently", path);
            }
        }

        let mut labels = record.pod_labels.clone();
        labels.insert(RC_OWNER_LABEL.to_string(), record.id.clone());
        labels.insert(POD_DIGEST_LABEL.to_string(), record.manifest.digest());
        self.applicator
            .set_labels(LabelType::Pod, &pod_entity(node, &record.manifest.id), labels)
            .await?;

        info!(
            "Controller {} scheduled pod {} on node {}",
            self.id, record.manifest.id, node
        );
        Ok(())
    }

    /// Remove the pod's intent entry from `node` under its advisory lock,
    /// then strip the pod entity's labels.
    async fn unschedule(&self, record: &RcRecord, node: &str) -> Result<()> {
        let path = pod_path(PodTree::Intent, node, &record.manifest.id)?;
        let lock_path = pod_lock_path(PodTree::Intent, node, &record.manifest.id)?;

        let holder = format!("controller-{}", self.id);
        let lock = Lock::acquire(self.store.clone(), &lock_path, &holder)
            .await
            .context("pod lock acquisition failed")?;

        let outcome = async {
            self.store.delete(&path).await?;
            self.applicator
                .remove_all_labels(LabelType::Pod, &pod_entity(node, &record.manifest.id))
                .await
        }
        .await;
        let released = lock.release().await;
        outcome?;
        released?;

        info!(
            "Controller {} unscheduled pod {} from node {}",
            self.id, record.manifest.id, node
        );
        Ok(())
    }

    /// Nodes currently carrying an intent entry owned by this controller,
    /// sorted by name. Callers poll this to wait for convergence.
    pub async fn current_nodes(&self) -> Result<Vec<NodeName>> {
        let matches = self
            .applicator
            .get_matches(LabelType::Pod, &self.owner_selector()?)
            .await?;
        let mut nodes: Vec<NodeName> = matches
            .into_iter()
            .filter_map(|m| m.id.split_once('/').map(|(node, _)| node.to_string()))
            .collect();
        nodes.sort();
        nodes.dedup();
        Ok(nodes)
    }

    /// Notification-based convergence watching: a snapshot of the owned
    /// node set now, then one after every ownership change. The polling
    /// alternative is [`ReplicationController::current_nodes`].
    pub async fn watch_current(&self) -> Result<mpsc::Receiver<Vec<NodeName>>> {
        let mut matches = self
            .applicator
            .watch_matches(LabelType::Pod, &self.owner_selector()?)
            .await?;
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            while let Some(matched) = matches.recv().await {
                let mut nodes: Vec<NodeName> = matched
                    .into_iter()
                    .filter_map(|m| m.id.split_once('/').map(|(node, _)| node.to_string()))
                    .collect();
                nodes.sort();
                nodes.dedup();
                if tx.send(nodes).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    fn owner_selector(&self) -> Result<Selector> {
        Selector::parse(&format!("{}={}", RC_OWNER_LABEL, self.id))
    }
}

/// Label entity id of a pod placed on a node.
fn pod_entity(node: &str, pod_id: &str) -> String {
    format!("{}/{}", node, pod_id)
}
