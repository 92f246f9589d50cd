use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use pkg_constants::state::{DEFAULT_STORE_RETRIES, STORE_RETRY_BACKOFF_MS};
use tracing::warn;

/// Bounded-attempt retry policy for transient store failures.
///
/// Only connectivity-level errors reach this layer; logic errors
/// (not-found, conflict) are computed above the KV round-trip and are
/// never retried.
#[derive(Debug, Clone, Copy)]
pub struct Retry {
    attempts: u32,
    backoff: Duration,
}

impl Retry {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff: Duration::from_millis(STORE_RETRY_BACKOFF_MS),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Run `op`, retrying on error up to the attempt budget.
    /// `what` names the operation in retry logs.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.attempts => {
                    warn!(
                        "{} failed (attempt {}/{}), retrying: {}",
                        what, attempt, self.attempts, e
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_RETRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = Retry::new(3)
            .run("flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        anyhow::bail!("transient");
                    }
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn surfaces_the_error_when_the_budget_runs_out() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = Retry::new(3)
            .run("down", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { anyhow::bail!("still down") }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn first_success_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result = Retry::default()
            .run("healthy", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
