//! Resource collectors and their orchestration
//!
//! Every resource watcher implements [`Collector`]. The
//! [`CollectorRegistry`] starts, syncs and stops any number of them without
//! knowing their concrete types, so new resource kinds plug in without
//! touching orchestration code.

mod registry;
mod task;


pub use registry::{CollectorRegistry, RegistryError};
pub use task::{BackgroundTask, SyncSignal};

use anyhow::Result;
use tokio_util::sync::CancellationToken;

pub use async_trait::async_trait;

/// Lifecycle contract implemented by every resource watcher
#[async_trait]
pub trait Collector: Send + Sync {
    /// Stable identifier used in logs and failure reports
    fn name(&self) -> &str;

    /// Launch background work and return once it is running, not once it
    /// has produced data. Called at most once per instance.
    async fn start(&self, token: &CancellationToken) -> Result<()>;

    /// Block until the initial full state is loaded or `token` is cancelled
    async fn wait_for_sync(&self, token: &CancellationToken) -> Result<()>;

    /// Request shutdown and wait for background work to exit.
    /// A second call returns immediately.
    async fn stop(&self);
}
