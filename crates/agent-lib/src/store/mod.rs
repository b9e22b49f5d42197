//! In-process mirror of cluster state
//!
//! One [`TypedStore`] per resource kind. Collectors write into the store
//! assigned to them; the snapshot loop and health checks read from all of
//! them. There is no lock spanning kinds.

mod typed;

pub use typed::TypedStore;

use crate::models::{
    ClusterSnapshot, JobInfo, NamespaceInfo, NodeInfo, PodInfo, ReplicaSetInfo, ResourceInfo,
    WorkloadInfo,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Resource kinds mirrored by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Nodes,
    Pods,
    Namespaces,
    Deployments,
    StatefulSets,
    DaemonSets,
    ReplicaSets,
    Jobs,
    CronJobs,
    CustomWorkloads,
    HorizontalAutoscalers,
    VerticalAutoscalers,
    DisruptionBudgets,
    Services,
    Ingresses,
    PersistentVolumes,
    PersistentVolumeClaims,
    StorageClasses,
    PriorityClasses,
    LimitRanges,
    ResourceQuotas,
    NodePools,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 22] = [
        ResourceKind::Nodes,
        ResourceKind::Pods,
        ResourceKind::Namespaces,
        ResourceKind::Deployments,
        ResourceKind::StatefulSets,
        ResourceKind::DaemonSets,
        ResourceKind::ReplicaSets,
        ResourceKind::Jobs,
        ResourceKind::CronJobs,
        ResourceKind::CustomWorkloads,
        ResourceKind::HorizontalAutoscalers,
        ResourceKind::VerticalAutoscalers,
        ResourceKind::DisruptionBudgets,
        ResourceKind::Services,
        ResourceKind::Ingresses,
        ResourceKind::PersistentVolumes,
        ResourceKind::PersistentVolumeClaims,
        ResourceKind::StorageClasses,
        ResourceKind::PriorityClasses,
        ResourceKind::LimitRanges,
        ResourceKind::ResourceQuotas,
        ResourceKind::NodePools,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Nodes => "nodes",
            ResourceKind::Pods => "pods",
            ResourceKind::Namespaces => "namespaces",
            ResourceKind::Deployments => "deployments",
            ResourceKind::StatefulSets => "stateful_sets",
            ResourceKind::DaemonSets => "daemon_sets",
            ResourceKind::ReplicaSets => "replica_sets",
            ResourceKind::Jobs => "jobs",
            ResourceKind::CronJobs => "cron_jobs",
            ResourceKind::CustomWorkloads => "custom_workloads",
            ResourceKind::HorizontalAutoscalers => "horizontal_autoscalers",
            ResourceKind::VerticalAutoscalers => "vertical_autoscalers",
            ResourceKind::DisruptionBudgets => "disruption_budgets",
            ResourceKind::Services => "services",
            ResourceKind::Ingresses => "ingresses",
            ResourceKind::PersistentVolumes => "persistent_volumes",
            ResourceKind::PersistentVolumeClaims => "persistent_volume_claims",
            ResourceKind::StorageClasses => "storage_classes",
            ResourceKind::PriorityClasses => "priority_classes",
            ResourceKind::LimitRanges => "limit_ranges",
            ResourceKind::ResourceQuotas => "resource_quotas",
            ResourceKind::NodePools => "node_pools",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate of per-kind stores, created once at startup
#[derive(Debug, Default)]
pub struct Store {
    pub nodes: TypedStore<NodeInfo>,
    pub pods: TypedStore<PodInfo>,
    pub namespaces: TypedStore<NamespaceInfo>,
    pub deployments: TypedStore<WorkloadInfo>,
    pub stateful_sets: TypedStore<WorkloadInfo>,
    pub daemon_sets: TypedStore<WorkloadInfo>,
    pub replica_sets: TypedStore<ReplicaSetInfo>,
    pub jobs: TypedStore<JobInfo>,
    pub cron_jobs: TypedStore<WorkloadInfo>,
    pub custom_workloads: TypedStore<WorkloadInfo>,
    pub horizontal_autoscalers: TypedStore<ResourceInfo>,
    pub vertical_autoscalers: TypedStore<ResourceInfo>,
    pub disruption_budgets: TypedStore<ResourceInfo>,
    pub services: TypedStore<ResourceInfo>,
    pub ingresses: TypedStore<ResourceInfo>,
    pub persistent_volumes: TypedStore<ResourceInfo>,
    pub persistent_volume_claims: TypedStore<ResourceInfo>,
    pub storage_classes: TypedStore<ResourceInfo>,
    pub priority_classes: TypedStore<ResourceInfo>,
    pub limit_ranges: TypedStore<ResourceInfo>,
    pub resource_quotas: TypedStore<ResourceInfo>,
    pub node_pools: TypedStore<ResourceInfo>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Item count and last update time for one kind
    fn stats(&self, kind: ResourceKind) -> (usize, i64) {
        fn of<T>(store: &TypedStore<T>) -> (usize, i64) {
            (store.len(), store.last_updated())
        }

        match kind {
            ResourceKind::Nodes => of(&self.nodes),
            ResourceKind::Pods => of(&self.pods),
            ResourceKind::Namespaces => of(&self.namespaces),
            ResourceKind::Deployments => of(&self.deployments),
            ResourceKind::StatefulSets => of(&self.stateful_sets),
            ResourceKind::DaemonSets => of(&self.daemon_sets),
            ResourceKind::ReplicaSets => of(&self.replica_sets),
            ResourceKind::Jobs => of(&self.jobs),
            ResourceKind::CronJobs => of(&self.cron_jobs),
            ResourceKind::CustomWorkloads => of(&self.custom_workloads),
            ResourceKind::HorizontalAutoscalers => of(&self.horizontal_autoscalers),
            ResourceKind::VerticalAutoscalers => of(&self.vertical_autoscalers),
            ResourceKind::DisruptionBudgets => of(&self.disruption_budgets),
            ResourceKind::Services => of(&self.services),
            ResourceKind::Ingresses => of(&self.ingresses),
            ResourceKind::PersistentVolumes => of(&self.persistent_volumes),
            ResourceKind::PersistentVolumeClaims => of(&self.persistent_volume_claims),
            ResourceKind::StorageClasses => of(&self.storage_classes),
            ResourceKind::PriorityClasses => of(&self.priority_classes),
            ResourceKind::LimitRanges => of(&self.limit_ranges),
            ResourceKind::ResourceQuotas => of(&self.resource_quotas),
            ResourceKind::NodePools => of(&self.node_pools),
        }
    }

    /// Number of records per kind
    pub fn item_counts(&self) -> HashMap<ResourceKind, usize> {
        ResourceKind::ALL
            .iter()
            .map(|kind| (*kind, self.stats(*kind).0))
            .collect()
    }

    /// Last update time per kind, in milliseconds since epoch
    pub fn last_updated_times(&self) -> HashMap<ResourceKind, i64> {
        ResourceKind::ALL
            .iter()
            .map(|kind| (*kind, self.stats(*kind).1))
            .collect()
    }

    /// Copy every kind into a snapshot
    ///
    /// Each kind is copied under its own read lock, so kinds may be captured
    /// at slightly different instants.
    pub fn snapshot(&self) -> ClusterSnapshot {
        ClusterSnapshot {
            captured_at_ms: typed::now_millis(),
            nodes: self.nodes.values(),
            pods: self.pods.values(),
            namespaces: self.namespaces.values(),
            deployments: self.deployments.values(),
            stateful_sets: self.stateful_sets.values(),
            daemon_sets: self.daemon_sets.values(),
            replica_sets: self.replica_sets.values(),
            jobs: self.jobs.values(),
            cron_jobs: self.cron_jobs.values(),
            custom_workloads: self.custom_workloads.values(),
            horizontal_autoscalers: self.horizontal_autoscalers.values(),
            vertical_autoscalers: self.vertical_autoscalers.values(),
            disruption_budgets: self.disruption_budgets.values(),
            services: self.services.values(),
            ingresses: self.ingresses.values(),
            persistent_volumes: self.persistent_volumes.values(),
            persistent_volume_claims: self.persistent_volume_claims.values(),
            storage_classes: self.storage_classes.values(),
            priority_classes: self.priority_classes.values(),
            limit_ranges: self.limit_ranges.values(),
            resource_quotas: self.resource_quotas.values(),
            node_pools: self.node_pools.values(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OwnerReference;
    use std::collections::BTreeMap;

    fn pod(namespace: &str, name: &str) -> PodInfo {
        PodInfo {
            name: name.to_string(),
            namespace: namespace.to_string(),
            uid: format!("uid-{}", name),
            node_name: Some("node-1".to_string()),
            phase: "Running".to_string(),
            owner: Some(OwnerReference::new("ReplicaSet", "web-abc", "rs-uid")),
            labels: BTreeMap::new(),
            cpu_request_millicores: 100,
            memory_request_bytes: 64 * 1024 * 1024,
        }
    }

    #[test]
    fn test_item_counts_cover_every_kind() {
        let store = Store::new();
        let p = pod("default", "web-1");
        store.pods.set(p.key(), p);

        let counts = store.item_counts();
        assert_eq!(counts.len(), ResourceKind::ALL.len());
        assert_eq!(counts[&ResourceKind::Pods], 1);
        assert_eq!(counts[&ResourceKind::Nodes], 0);
    }

    #[test]
    fn test_last_updated_is_per_kind() {
        let store = Store::new();
        let p = pod("default", "web-1");
        store.pods.set(p.key(), p);

        let times = store.last_updated_times();
        assert!(times[&ResourceKind::Pods] > 0);
        assert_eq!(times[&ResourceKind::Services], 0);
    }

    #[test]
    fn test_snapshot_copies_records() {
        let store = Store::new();
        for name in ["a", "b", "c"] {
            let p = pod("default", name);
            store.pods.set(p.key(), p);
        }

        let snapshot = store.snapshot();
        store.pods.clear();

        assert_eq!(snapshot.pods.len(), 3);
        assert_eq!(snapshot.total_items(), 3);
        assert!(snapshot.captured_at_ms > 0);
    }

    #[test]
    fn test_resource_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ResourceKind::PersistentVolumeClaims).unwrap();
        assert_eq!(json, "\"persistent_volume_claims\"");
        assert_eq!(ResourceKind::StatefulSets.to_string(), "stateful_sets");
    }
}
