//! Building blocks for collector implementations
//!
//! [`BackgroundTask`] owns a collector's spawned work and gives it an
//! idempotent stop; [`SyncSignal`] tracks whether the initial list has been
//! loaded.

use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Flag raised once a collector has loaded its initial state
#[derive(Debug)]
pub struct SyncSignal {
    tx: watch::Sender<bool>,
}

impl Default for SyncSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn mark_synced(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_synced(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until synced or `token` is cancelled
    pub async fn wait(&self, token: &CancellationToken) -> Result<()> {
        let mut rx = self.tx.subscribe();
        tokio::select! {
            res = rx.wait_for(|synced| *synced) => {
                res.map(|_| ()).map_err(|_| anyhow::anyhow!("sync signal dropped"))
            }
            _ = token.cancelled() => bail!("cancelled while waiting for initial sync"),
        }
    }
}

/// Spawned work owned by a collector
///
/// Work launched with [`BackgroundTask::spawn`] should watch the token from
/// [`BackgroundTask::token`] and return once it is cancelled.
#[derive(Debug, Default)]
pub struct BackgroundTask {
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    launched: AtomicBool,
    stopped: AtomicBool,
}

impl BackgroundTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when the task is stopped
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Launch the work; fails if already launched or stopped
    pub fn spawn<F>(&self, work: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.stopped.load(Ordering::Acquire) {
            bail!("background task already stopped");
        }
        if self.launched.swap(true, Ordering::AcqRel) {
            bail!("background task already started");
        }
        *self.handle.lock() = Some(tokio::spawn(work));
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.launched.load(Ordering::Acquire) && !self.stopped.load(Ordering::Acquire)
    }

    /// Cancel the work and wait for it to exit; later calls are no-ops
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.token.cancel();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(()) => debug!("Background task exited"),
                Err(e) => warn!(error = %e, "Background task ended abnormally"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sync_signal_wait() {
        let signal = Arc::new(SyncSignal::new());
        let token = CancellationToken::new();
        assert!(!signal.is_synced());

        let waiter = {
            let signal = signal.clone();
            let token = token.clone();
            tokio::spawn(async move { signal.wait(&token).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.mark_synced();

        assert!(waiter.await.unwrap().is_ok());
        assert!(signal.is_synced());
    }

    #[tokio::test]
    async fn test_sync_signal_cancelled() {
        let signal = SyncSignal::new();
        let token = CancellationToken::new();
        token.cancel();

        assert!(signal.wait(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_background_task_stop_is_idempotent() {
        let task = BackgroundTask::new();
        let exits = Arc::new(AtomicUsize::new(0));

        let token = task.token();
        let counter = exits.clone();
        task.spawn(async move {
            token.cancelled().await;
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(task.is_running());

        task.stop().await;
        assert_eq!(exits.load(Ordering::SeqCst), 1);
        assert!(!task.is_running());

        tokio::time::timeout(Duration::from_millis(100), task.stop())
            .await
            .expect("second stop must not block");
        assert_eq!(exits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_background_task_spawn_once() {
        let task = BackgroundTask::new();
        task.spawn(async {}).unwrap();
        assert!(task.spawn(async {}).is_err());

        task.stop().await;
        assert!(task.spawn(async {}).is_err());
    }

    #[tokio::test]
    async fn test_stop_without_spawn() {
        let task = BackgroundTask::new();
        task.stop().await;
        assert!(task.token().is_cancelled());
    }
}
