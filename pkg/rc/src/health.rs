use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::controller::ControllerError;

/// Health of one watch loop as seen by the status surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoopStatus {
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
}

/// Process-wide error bookkeeping for watch loops.
///
/// Consumes a loop's error and tick channels: errors bump the consecutive
/// counter and record the message, a clean tick resets the counter so
/// operators can tell "currently failing" from "recovered". The
/// reconciliation engine itself never reads this state.
#[derive(Clone, Default)]
pub struct HealthMonitor {
    loops: Arc<RwLock<HashMap<String, LoopStatus>>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a loop under `name`, consuming its channels until they close.
    pub fn monitor(
        &self,
        name: &str,
        mut errors: mpsc::Receiver<ControllerError>,
        mut ticks: mpsc::Receiver<()>,
    ) -> JoinHandle<()> {
        let name = name.to_string();
        let loops = self.loops.clone();
        tokio::spawn(async move {
            loops.write().await.insert(name.clone(), LoopStatus::default());
            loop {
                tokio::select! {
                    error = errors.recv() => match error {
                        Some(error) => {
                            warn!("Watch loop {}: {}", name, error);
                            let mut loops = loops.write().await;
                            let status = loops.entry(name.clone()).or_default();
                            status.consecutive_errors += 1;
                            status.last_error = Some(error.to_string());
                        }
                        None => break,
                    },
                    tick = ticks.recv() => match tick {
                        Some(()) => {
                            let mut loops = loops.write().await;
                            loops.entry(name.clone()).or_default().consecutive_errors = 0;
                        }
                        None => break,
                    },
                }
            }
        })
    }

    /// Current status of every tracked loop.
    pub async fn snapshot(&self) -> HashMap<String, LoopStatus> {
        self.loops.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_for<F>(monitor: &HealthMonitor, predicate: F)
    where
        F: Fn(&HashMap<String, LoopStatus>) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if predicate(&monitor.snapshot().await) {
                return;
            }
            assert!(tokio::time::Instant::now() < deadline, "condition not reached");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn counts_errors_and_resets_on_success() {
        let monitor = HealthMonitor::new();
        let (error_tx, error_rx) = mpsc::channel(8);
        let (tick_tx, tick_rx) = mpsc::channel(8);
        monitor.monitor("rc-test", error_rx, tick_rx);

        for _ in 0..2 {
            error_tx
                .send(ControllerError::Shortfall {
                    eligible: 0,
                    desired: 1,
                })
                .await
                .unwrap();
        }
        wait_for(&monitor, |s| {
            s.get("rc-test").is_some_and(|l| l.consecutive_errors == 2)
        })
        .await;

        let status = monitor.snapshot().await["rc-test"].clone();
        assert!(status.last_error.unwrap().contains("0 node(s)"));

        tick_tx.send(()).await.unwrap();
        wait_for(&monitor, |s| {
            s.get("rc-test").is_some_and(|l| l.consecutive_errors == 0)
        })
        .await;

        // The last error text survives the reset.
        assert!(monitor.snapshot().await["rc-test"].last_error.is_some());
    }
}
