//! Periodic snapshot shipping
//!
//! On every tick the loop asks the lifecycle whether a send is allowed,
//! copies the store, resolves pod owners and hands the result to a
//! [`SnapshotSink`]. The sink's HTTP response drives the lifecycle.

use crate::lifecycle::{AgentState, StateMachine};
use crate::models::ClusterSnapshot;
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::ownership::OwnershipEnricher;
use crate::store::Store;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Backend response to a shipped snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShipResponse {
    pub status: u16,
    /// Retry hint in seconds, zero when absent
    pub retry_after_secs: u64,
}

impl ShipResponse {
    pub fn new(status: u16, retry_after_secs: u64) -> Self {
        Self {
            status,
            retry_after_secs,
        }
    }
}

/// Destination for enriched snapshots
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn ship(&self, snapshot: &ClusterSnapshot) -> Result<ShipResponse>;
}

/// Sink that records snapshot summaries in the log instead of sending them
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl SnapshotSink for LogSink {
    async fn ship(&self, snapshot: &ClusterSnapshot) -> Result<ShipResponse> {
        let encoded = serde_json::to_vec(snapshot)?;
        info!(
            items = snapshot.total_items(),
            pods = snapshot.pods.len(),
            nodes = snapshot.nodes.len(),
            bytes = encoded.len(),
            "Snapshot captured"
        );
        Ok(ShipResponse::new(200, 0))
    }
}

/// Configuration for the snapshot loop
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Time between snapshot attempts (default: 60 seconds)
    pub interval: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Lifecycle did not allow a send
    Skipped(AgentState),
    /// Snapshot delivered and the response applied
    Shipped { status: u16, owners_resolved: usize },
    /// Sink failed before producing a response
    Failed,
}

/// Builds, enriches and ships snapshots on an interval
pub struct SnapshotLoop {
    store: Arc<Store>,
    lifecycle: Arc<StateMachine>,
    sink: Arc<dyn SnapshotSink>,
    enricher: OwnershipEnricher,
    config: SnapshotConfig,
    metrics: AgentMetrics,
    logger: StructuredLogger,
}

impl SnapshotLoop {
    pub fn new(
        store: Arc<Store>,
        lifecycle: Arc<StateMachine>,
        sink: Arc<dyn SnapshotSink>,
        config: SnapshotConfig,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            store,
            lifecycle,
            sink,
            enricher: OwnershipEnricher::new(),
            config,
            metrics: AgentMetrics::new(),
            logger,
        }
    }

    /// Run until `shutdown` is cancelled or the lifecycle reaches a terminal state
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting snapshot loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;

                    let state = self.lifecycle.state();
                    if state.is_terminal() {
                        info!(state = %state, "Lifecycle is terminal, stopping snapshot loop");
                        break;
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Shutting down snapshot loop");
                    break;
                }
            }
        }
    }

    /// Perform one snapshot attempt
    pub async fn run_once(&self) -> TickOutcome {
        self.metrics.set_store_stats(&self.store);

        if !self.lifecycle.can_send() {
            let status = self.lifecycle.status();
            debug!(
                state = %status.state,
                backoff_remaining_secs = status.backoff_remaining_secs,
                "Skipping snapshot"
            );
            self.metrics.set_lifecycle(&status);
            return TickOutcome::Skipped(status.state);
        }

        let started = Instant::now();
        let mut snapshot = self.store.snapshot();
        let owners_resolved = self.enricher.enrich(&mut snapshot);
        self.metrics
            .observe_snapshot_build(started.elapsed().as_secs_f64());
        self.metrics.add_owners_resolved(owners_resolved);

        let before = self.lifecycle.state();
        let outcome = match self.sink.ship(&snapshot).await {
            Ok(response) => {
                self.lifecycle
                    .handle_http_status(response.status, response.retry_after_secs);
                self.metrics.inc_snapshots_shipped(response.status);
                self.logger.log_snapshot_shipped(
                    snapshot.total_items(),
                    owners_resolved,
                    response.status,
                );
                TickOutcome::Shipped {
                    status: response.status,
                    owners_resolved,
                }
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Failed to ship snapshot");
                TickOutcome::Failed
            }
        };

        let status = self.lifecycle.status();
        if status.state != before {
            self.logger.log_state_change(before, &status);
        }
        self.metrics.set_lifecycle(&status);

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ManualClock;
    use crate::models::{OwnerReference, PodInfo, ReplicaSetInfo};
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    /// Sink that replays scripted responses and records what it saw
    struct ScriptedSink {
        responses: Mutex<VecDeque<Result<ShipResponse>>>,
        seen: Mutex<Vec<ClusterSnapshot>>,
    }

    impl ScriptedSink {
        fn new(responses: Vec<Result<ShipResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SnapshotSink for ScriptedSink {
        async fn ship(&self, snapshot: &ClusterSnapshot) -> Result<ShipResponse> {
            self.seen.lock().push(snapshot.clone());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(ShipResponse::new(200, 0)))
        }
    }

    /// Counts log records whose message mentions a lifecycle transition
    #[derive(Clone, Default)]
    struct TransitionCounter(Arc<AtomicUsize>);

    #[derive(Default)]
    struct MessageVisitor(String);

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{:?}", value);
            }
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for TransitionCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = MessageVisitor::default();
            event.record(&mut visitor);
            if visitor.0.contains("state") && visitor.0.contains("Agent") {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn populated_store() -> Arc<Store> {
        let store = Arc::new(Store::new());
        let rs = ReplicaSetInfo {
            name: "web-5d4f".to_string(),
            namespace: "shop".to_string(),
            uid: "rs-uid".to_string(),
            replicas: 2,
            owner: Some(OwnerReference::new("Deployment", "web", "dep-uid")),
        };
        store.replica_sets.set(rs.key(), rs);

        let pod = PodInfo {
            name: "web-5d4f-abcde".to_string(),
            namespace: "shop".to_string(),
            uid: "pod-uid".to_string(),
            node_name: Some("node-a".to_string()),
            phase: "Running".to_string(),
            owner: Some(OwnerReference::new("ReplicaSet", "web-5d4f", "rs-uid")),
            labels: BTreeMap::new(),
            cpu_request_millicores: 250,
            memory_request_bytes: 128 * 1024 * 1024,
        };
        store.pods.set(pod.key(), pod);
        store
    }

    fn snapshot_loop(
        store: Arc<Store>,
        sink: Arc<ScriptedSink>,
    ) -> (SnapshotLoop, Arc<StateMachine>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let lifecycle = Arc::new(StateMachine::with_clock(clock.clone()));
        let snapshot_loop = SnapshotLoop::new(
            store,
            lifecycle.clone(),
            sink,
            SnapshotConfig::default(),
            StructuredLogger::new("test-node"),
        );
        (snapshot_loop, lifecycle, clock)
    }

    #[tokio::test]
    async fn test_ships_enriched_snapshot() {
        let sink = Arc::new(ScriptedSink::new(vec![]));
        let (snapshot_loop, lifecycle, _) = snapshot_loop(populated_store(), sink.clone());

        let outcome = snapshot_loop.run_once().await;

        assert_eq!(
            outcome,
            TickOutcome::Shipped {
                status: 200,
                owners_resolved: 1
            }
        );
        assert_eq!(lifecycle.state(), AgentState::Running);

        let seen = sink.seen.lock();
        let owner = seen[0].pods[0].owner.clone().unwrap();
        assert_eq!(owner.kind, "Deployment");
        assert_eq!(owner.name, "web");
    }

    #[tokio::test]
    async fn test_enrichment_does_not_touch_store() {
        let store = populated_store();
        let sink = Arc::new(ScriptedSink::new(vec![]));
        let (snapshot_loop, _, _) = snapshot_loop(store.clone(), sink);

        snapshot_loop.run_once().await;

        let pod = store.pods.get("shop/web-5d4f-abcde").unwrap();
        assert_eq!(pod.owner.unwrap().kind, "ReplicaSet");
    }

    #[tokio::test]
    async fn test_backoff_skips_until_expired() {
        let sink = Arc::new(ScriptedSink::new(vec![Ok(ShipResponse::new(429, 0))]));
        let (snapshot_loop, lifecycle, clock) = snapshot_loop(populated_store(), sink.clone());

        assert!(matches!(
            snapshot_loop.run_once().await,
            TickOutcome::Shipped { status: 429, .. }
        ));
        assert_eq!(lifecycle.state(), AgentState::Backoff);

        assert_eq!(
            snapshot_loop.run_once().await,
            TickOutcome::Skipped(AgentState::Backoff)
        );
        assert_eq!(sink.seen.lock().len(), 1);

        clock.advance(Duration::from_secs(31));
        assert!(matches!(
            snapshot_loop.run_once().await,
            TickOutcome::Shipped { status: 200, .. }
        ));
        assert_eq!(lifecycle.state(), AgentState::Running);
    }

    #[tokio::test]
    async fn test_sink_error_leaves_state_alone() {
        let sink = Arc::new(ScriptedSink::new(vec![Err(anyhow::anyhow!(
            "connection refused"
        ))]));
        let (snapshot_loop, lifecycle, _) = snapshot_loop(populated_store(), sink);

        assert_eq!(snapshot_loop.run_once().await, TickOutcome::Failed);
        assert_eq!(lifecycle.state(), AgentState::Starting);
    }

    #[tokio::test]
    async fn test_run_stops_on_terminal_state() {
        let sink = Arc::new(ScriptedSink::new(vec![Ok(ShipResponse::new(401, 0))]));
        let (snapshot_loop, lifecycle, _) = snapshot_loop(populated_store(), sink);

        tokio::time::timeout(
            Duration::from_secs(5),
            snapshot_loop.run(CancellationToken::new()),
        )
        .await
        .expect("loop should exit once stopped");

        assert_eq!(lifecycle.state(), AgentState::Stopped);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let sink = Arc::new(ScriptedSink::new(vec![]));
        let (snapshot_loop, _, _) = snapshot_loop(populated_store(), sink);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(snapshot_loop.run(shutdown.clone()));
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should exit on shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_state_change_logged_once() {
        let counter = TransitionCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let sink = Arc::new(ScriptedSink::new(vec![Ok(ShipResponse::new(401, 0))]));
        let (snapshot_loop, lifecycle, _) = snapshot_loop(populated_store(), sink);

        snapshot_loop.run_once().await;

        assert_eq!(lifecycle.state(), AgentState::Stopped);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_log_sink_reports_success() {
        let store = populated_store();
        let response = LogSink.ship(&store.snapshot()).await.unwrap();
        assert_eq!(response, ShipResponse::new(200, 0));
    }
}
