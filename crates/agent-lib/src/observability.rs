//! Observability infrastructure for the cluster agent
//!
//! Provides:
//! - Prometheus metrics (store contents and staleness, collector failures,
//!   snapshot shipping, lifecycle state)
//! - Structured JSON logging with tracing

use crate::lifecycle::{AgentState, LifecycleStatus};
use crate::store::{ResourceKind, Store};
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Gauge, Histogram, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for snapshot build time (in seconds)
const SNAPSHOT_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    store_items: IntGaugeVec,
    store_last_updated_seconds: IntGaugeVec,
    collectors_registered: IntGauge,
    collector_start_failures: IntCounter,
    owners_resolved: IntCounter,
    snapshot_build_seconds: Histogram,
    snapshots_shipped: IntCounterVec,
    agent_state: IntGaugeVec,
    backoff_remaining_seconds: Gauge,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            store_items: register_int_gauge_vec!(
                "cluster_agent_store_items",
                "Number of records held per resource kind",
                &["kind"]
            )
            .expect("Failed to register store_items"),

            store_last_updated_seconds: register_int_gauge_vec!(
                "cluster_agent_store_last_updated_timestamp_seconds",
                "Unix time of the last write per resource kind",
                &["kind"]
            )
            .expect("Failed to register store_last_updated_seconds"),

            collectors_registered: register_int_gauge!(
                "cluster_agent_collectors_registered",
                "Number of registered collectors"
            )
            .expect("Failed to register collectors_registered"),

            collector_start_failures: register_int_counter!(
                "cluster_agent_collector_start_failures_total",
                "Total number of collectors that failed to start"
            )
            .expect("Failed to register collector_start_failures"),

            owners_resolved: register_int_counter!(
                "cluster_agent_owners_resolved_total",
                "Total number of pod owners rewritten to a top-level controller"
            )
            .expect("Failed to register owners_resolved"),

            snapshot_build_seconds: register_histogram!(
                "cluster_agent_snapshot_build_seconds",
                "Time spent copying and enriching a snapshot",
                SNAPSHOT_BUCKETS.to_vec()
            )
            .expect("Failed to register snapshot_build_seconds"),

            snapshots_shipped: register_int_counter_vec!(
                "cluster_agent_snapshots_shipped_total",
                "Snapshots delivered to the backend by response status",
                &["status"]
            )
            .expect("Failed to register snapshots_shipped"),

            agent_state: register_int_gauge_vec!(
                "cluster_agent_state",
                "Current lifecycle state (1 for the active state)",
                &["state"]
            )
            .expect("Failed to register agent_state"),

            backoff_remaining_seconds: register_gauge!(
                "cluster_agent_backoff_remaining_seconds",
                "Seconds left before the next send is allowed"
            )
            .expect("Failed to register backoff_remaining_seconds"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    /// Publish item counts and last update times for every kind
    pub fn set_store_stats(&self, store: &Store) {
        let counts = store.item_counts();
        let updated = store.last_updated_times();
        for kind in ResourceKind::ALL {
            let label = [kind.as_str()];
            self.inner()
                .store_items
                .with_label_values(&label)
                .set(counts.get(&kind).copied().unwrap_or(0) as i64);
            self.inner()
                .store_last_updated_seconds
                .with_label_values(&label)
                .set(updated.get(&kind).copied().unwrap_or(0) / 1000);
        }
    }

    pub fn set_collectors_registered(&self, count: usize) {
        self.inner().collectors_registered.set(count as i64);
    }

    pub fn add_collector_start_failures(&self, count: usize) {
        self.inner().collector_start_failures.inc_by(count as u64);
    }

    pub fn add_owners_resolved(&self, count: usize) {
        self.inner().owners_resolved.inc_by(count as u64);
    }

    pub fn observe_snapshot_build(&self, duration_secs: f64) {
        self.inner().snapshot_build_seconds.observe(duration_secs);
    }

    pub fn inc_snapshots_shipped(&self, status: u16) {
        self.inner()
            .snapshots_shipped
            .with_label_values(&[status.to_string().as_str()])
            .inc();
    }

    /// Mark the active state and current backoff
    pub fn set_lifecycle(&self, status: &LifecycleStatus) {
        for state in AgentState::ALL {
            self.inner()
                .agent_state
                .with_label_values(&[state.as_str()])
                .set(i64::from(state == status.state));
        }
        self.inner()
            .backoff_remaining_seconds
            .set(status.backoff_remaining_secs as f64);
    }
}

/// Structured logger for agent events
///
/// Provides consistent JSON-formatted records for lifecycle and shipping
/// events, tagged with the node the agent runs on.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, collectors: usize) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            collectors = collectors,
            "Cluster agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Cluster agent shutting down"
        );
    }

    /// Log the outcome of starting all collectors
    pub fn log_collectors_started(&self, total: usize, failed: &[String]) {
        if failed.is_empty() {
            info!(
                event = "collectors_started",
                node = %self.node_name,
                total = total,
                "Collectors started"
            );
        } else {
            warn!(
                event = "collector_start_failed",
                node = %self.node_name,
                total = total,
                failed = ?failed,
                "Some collectors failed to start, running degraded"
            );
        }
    }

    /// Log a lifecycle change caused by a backend response
    pub fn log_state_change(&self, from: AgentState, status: &LifecycleStatus) {
        match status.state {
            AgentState::Running | AgentState::Starting => info!(
                event = "state_transition",
                node = %self.node_name,
                from = %from,
                to = %status.state,
                "Agent state changed"
            ),
            _ => warn!(
                event = "state_transition",
                node = %self.node_name,
                from = %from,
                to = %status.state,
                reason = %status.reason,
                backoff_remaining_secs = status.backoff_remaining_secs,
                "Agent state changed"
            ),
        }
    }

    /// Log a delivered snapshot
    pub fn log_snapshot_shipped(&self, items: usize, owners_resolved: usize, status: u16) {
        info!(
            event = "snapshot_shipped",
            node = %self.node_name,
            items = items,
            owners_resolved = owners_resolved,
            status = status,
            "Snapshot shipped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_metrics_creation() {
        let metrics = AgentMetrics::new();
        let store = Store::new();

        metrics.set_store_stats(&store);
        metrics.set_collectors_registered(3);
        metrics.add_collector_start_failures(1);
        metrics.add_owners_resolved(5);
        metrics.observe_snapshot_build(0.002);
        metrics.inc_snapshots_shipped(200);
        metrics.set_lifecycle(&LifecycleStatus {
            state: AgentState::Backoff,
            reason: "rate limited".to_string(),
            backoff_remaining_secs: 30,
        });

        let families = prometheus::gather();
        let state = families
            .iter()
            .find(|f| f.get_name() == "cluster_agent_state")
            .expect("state gauge registered");
        assert_eq!(state.get_metric().len(), AgentState::ALL.len());
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name(), "test-node");
    }
}
