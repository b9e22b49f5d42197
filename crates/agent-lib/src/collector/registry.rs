//! Orchestration of collector start, sync and stop
//!
//! Start and sync fan out one task per collector so total latency tracks the
//! slowest collector rather than the sum. Stop runs sequentially. The list
//! lock only ever guards the list itself and is never held across collector
//! calls.

use super::Collector;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Errors reported by [`CollectorRegistry`]
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("all {total} collectors failed to start")]
    AllFailed { total: usize },

    /// Some collectors failed; the rest are running and the agent may carry
    /// on in degraded mode
    #[error("{} of {total} collectors failed to start: {}", .failed.len(), .failed.join(", "))]
    PartialStart { failed: Vec<String>, total: usize },

    #[error("collector `{collector}` failed to sync: {source}")]
    Sync {
        collector: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("collector sync cancelled")]
    Cancelled,

    #[error("collectors did not sync within {0:?}")]
    SyncTimeout(Duration),
}

impl RegistryError {
    /// True for a start where at least one collector came up
    pub fn is_partial(&self) -> bool {
        matches!(self, RegistryError::PartialStart { .. })
    }

    /// Names of collectors that failed to start
    pub fn failed_collectors(&self) -> &[String] {
        match self {
            RegistryError::PartialStart { failed, .. } => failed,
            _ => &[],
        }
    }
}

type Outcome = (String, anyhow::Result<()>);

#[derive(Default)]
struct Inner {
    collectors: Vec<Arc<dyn Collector>>,
    started: bool,
}

/// Registry of collectors managed as a group
#[derive(Default)]
pub struct CollectorRegistry {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        let names: Vec<&str> = inner.collectors.iter().map(|c| c.name()).collect();
        f.debug_struct("CollectorRegistry")
            .field("collectors", &names)
            .field("started", &inner.started)
            .finish()
    }
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a collector
    pub fn register(&self, collector: Arc<dyn Collector>) {
        debug!(collector = %collector.name(), "Registering collector");
        self.inner.lock().collectors.push(collector);
    }

    /// Copy of the registered collectors
    pub fn collectors(&self) -> Vec<Arc<dyn Collector>> {
        self.inner.lock().collectors.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().collectors.is_empty()
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().started
    }

    /// Start every collector concurrently
    ///
    /// Returns [`RegistryError::PartialStart`] if some collectors failed and
    /// [`RegistryError::AllFailed`] if none came up. Either way the registry
    /// counts as started so [`CollectorRegistry::stop_all`] will act.
    pub async fn start_all(&self, token: &CancellationToken) -> Result<(), RegistryError> {
        let collectors = self.collectors();
        let total = collectors.len();

        if total == 0 {
            self.inner.lock().started = true;
            return Ok(());
        }

        info!(count = total, "Starting collectors");

        let mut outcomes = fan_out(collectors, |collector| {
            let token = token.clone();
            async move { collector.start(&token).await }
        });

        let mut failed = Vec::new();
        while let Some((name, result)) = outcomes.recv().await {
            match result {
                Ok(()) => debug!(collector = %name, "Collector started"),
                Err(e) => {
                    error!(collector = %name, error = %format!("{:#}", e), "Failed to start collector");
                    failed.push(name);
                }
            }
        }

        self.inner.lock().started = true;

        if failed.is_empty() {
            info!(count = total, "All collectors started");
            Ok(())
        } else if failed.len() == total {
            Err(RegistryError::AllFailed { total })
        } else {
            warn!(
                failed = failed.len(),
                total,
                "Collectors partially started, continuing degraded"
            );
            Err(RegistryError::PartialStart { failed, total })
        }
    }

    /// Wait for every collector's initial sync under one shared token
    ///
    /// Returns the first sync error, or [`RegistryError::Cancelled`] as soon
    /// as `token` is cancelled.
    pub async fn wait_for_sync(&self, token: &CancellationToken) -> Result<(), RegistryError> {
        let collectors = self.collectors();
        if collectors.is_empty() {
            return Ok(());
        }

        let mut outcomes = fan_out(collectors, |collector| {
            let token = token.clone();
            async move { collector.wait_for_sync(&token).await }
        });

        let mut first_error = None;
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(RegistryError::Cancelled),
                next = outcomes.recv() => match next {
                    Some((name, Ok(()))) => debug!(collector = %name, "Collector synced"),
                    Some((name, Err(e))) => {
                        // Collectors bail out with their own error once the
                        // token fires; that is a cancellation, not a failure.
                        if token.is_cancelled() {
                            return Err(RegistryError::Cancelled);
                        }
                        warn!(collector = %name, error = %format!("{:#}", e), "Collector failed to sync");
                        if first_error.is_none() {
                            first_error = Some(RegistryError::Sync {
                                collector: name,
                                source: e.into(),
                            });
                        }
                    }
                    None => break,
                },
            }
        }

        match first_error {
            _ if token.is_cancelled() => Err(RegistryError::Cancelled),
            Some(e) => Err(e),
            None => {
                info!("All collectors synced");
                Ok(())
            }
        }
    }

    /// [`CollectorRegistry::wait_for_sync`] bounded by a deadline
    pub async fn wait_for_sync_timeout(
        &self,
        token: &CancellationToken,
        timeout: Duration,
    ) -> Result<(), RegistryError> {
        let deadline = token.child_token();
        tokio::select! {
            res = self.wait_for_sync(&deadline) => res,
            _ = tokio::time::sleep(timeout) => {
                deadline.cancel();
                Err(RegistryError::SyncTimeout(timeout))
            }
        }
    }

    /// Stop every collector in registration order
    ///
    /// Only the first call after a start does anything.
    pub async fn stop_all(&self) {
        let collectors = {
            let mut inner = self.inner.lock();
            if !std::mem::replace(&mut inner.started, false) {
                return;
            }
            inner.collectors.clone()
        };

        for collector in collectors {
            info!(collector = %collector.name(), "Stopping collector");
            collector.stop().await;
        }
        info!("All collectors stopped");
    }
}

/// Run `op` on every collector in its own task
///
/// The returned channel yields one outcome per collector and closes once a
/// supervising task has seen every worker finish. A worker that panics is
/// reported as a failure of its collector.
fn fan_out<F, Fut>(collectors: Vec<Arc<dyn Collector>>, op: F) -> mpsc::Receiver<Outcome>
where
    F: Fn(Arc<dyn Collector>) -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(collectors.len().max(1));

    let workers: Vec<_> = collectors
        .into_iter()
        .map(|collector| {
            let name = collector.name().to_string();
            let work = op(collector);
            let tx = tx.clone();
            let worker_name = name.clone();
            let handle = tokio::spawn(async move {
                let result = work.await;
                let _ = tx.send((worker_name, result)).await;
            });
            (name, handle)
        })
        .collect();

    tokio::spawn(async move {
        for (name, handle) in workers {
            if let Err(e) = handle.await {
                let _ = tx
                    .send((name, Err(anyhow::anyhow!("collector task failed: {}", e))))
                    .await;
            }
        }
    });

    rx
}
