//! Normalized resource records kept in the store
//!
//! Watchers translate raw cluster API objects into these records. Only the
//! fields the agent itself reasons about are typed; everything else rides
//! along in opaque payloads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Owner kind recorded on mirror (static) pods
pub const STATIC_POD_OWNER_KIND: &str = "Node";
pub const REPLICA_SET_KIND: &str = "ReplicaSet";
pub const JOB_KIND: &str = "Job";
pub const CRON_JOB_KIND: &str = "CronJob";

/// Build a store key: `namespace/name`, or the bare name for cluster-scoped kinds
pub fn object_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
        _ => name.to_string(),
    }
}

/// Reference from a record to its immediate controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
}

impl OwnerReference {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            uid: uid.into(),
        }
    }
}

/// Pod record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub node_name: Option<String>,
    pub phase: String,
    pub owner: Option<OwnerReference>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub cpu_request_millicores: u64,
    pub memory_request_bytes: u64,
}

impl PodInfo {
    pub fn key(&self) -> String {
        object_key(Some(&self.namespace), &self.name)
    }
}

/// ReplicaSet record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetInfo {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub replicas: i32,
    pub owner: Option<OwnerReference>,
}

impl ReplicaSetInfo {
    pub fn key(&self) -> String {
        object_key(Some(&self.namespace), &self.name)
    }
}

/// Job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub owner: Option<OwnerReference>,
    /// Name of the CronJob that spawned this job, if any
    pub cron_job: Option<String>,
    pub succeeded: i32,
    pub failed: i32,
}

impl JobInfo {
    pub fn key(&self) -> String {
        object_key(Some(&self.namespace), &self.name)
    }
}

/// Node record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub uid: String,
    pub ready: bool,
    pub node_pool: Option<String>,
    pub cpu_capacity_millicores: u64,
    pub memory_capacity_bytes: u64,
    pub cpu_allocatable_millicores: u64,
    pub memory_allocatable_bytes: u64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Namespace record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceInfo {
    pub name: String,
    pub uid: String,
    pub phase: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Controller record shared by deployments, statefulsets, daemonsets,
/// cronjobs and custom workload kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadInfo {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub desired_replicas: Option<i32>,
    pub ready_replicas: Option<i32>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl WorkloadInfo {
    pub fn key(&self) -> String {
        object_key(Some(&self.namespace), &self.name)
    }
}

/// Record for kinds whose shape the agent passes through untouched
/// (autoscalers, budgets, services, volumes, quotas, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub name: String,
    pub namespace: Option<String>,
    pub uid: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ResourceInfo {
    pub fn key(&self) -> String {
        object_key(self.namespace.as_deref(), &self.name)
    }
}

/// Point-in-time copy of every resource kind, assembled for shipment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    /// Capture time in milliseconds since epoch
    pub captured_at_ms: i64,
    pub nodes: Vec<NodeInfo>,
    pub pods: Vec<PodInfo>,
    pub namespaces: Vec<NamespaceInfo>,
    pub deployments: Vec<WorkloadInfo>,
    pub stateful_sets: Vec<WorkloadInfo>,
    pub daemon_sets: Vec<WorkloadInfo>,
    pub replica_sets: Vec<ReplicaSetInfo>,
    pub jobs: Vec<JobInfo>,
    pub cron_jobs: Vec<WorkloadInfo>,
    pub custom_workloads: Vec<WorkloadInfo>,
    pub horizontal_autoscalers: Vec<ResourceInfo>,
    pub vertical_autoscalers: Vec<ResourceInfo>,
    pub disruption_budgets: Vec<ResourceInfo>,
    pub services: Vec<ResourceInfo>,
    pub ingresses: Vec<ResourceInfo>,
    pub persistent_volumes: Vec<ResourceInfo>,
    pub persistent_volume_claims: Vec<ResourceInfo>,
    pub storage_classes: Vec<ResourceInfo>,
    pub priority_classes: Vec<ResourceInfo>,
    pub limit_ranges: Vec<ResourceInfo>,
    pub resource_quotas: Vec<ResourceInfo>,
    pub node_pools: Vec<ResourceInfo>,
}

impl ClusterSnapshot {
    /// Total number of records across all kinds
    pub fn total_items(&self) -> usize {
        self.nodes.len()
            + self.pods.len()
            + self.namespaces.len()
            + self.deployments.len()
            + self.stateful_sets.len()
            + self.daemon_sets.len()
            + self.replica_sets.len()
            + self.jobs.len()
            + self.cron_jobs.len()
            + self.custom_workloads.len()
            + self.horizontal_autoscalers.len()
            + self.vertical_autoscalers.len()
            + self.disruption_budgets.len()
            + self.services.len()
            + self.ingresses.len()
            + self.persistent_volumes.len()
            + self.persistent_volume_claims.len()
            + self.storage_classes.len()
            + self.priority_classes.len()
            + self.limit_ranges.len()
            + self.resource_quotas.len()
            + self.node_pools.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_namespaced() {
        assert_eq!(object_key(Some("default"), "web"), "default/web");
    }

    #[test]
    fn test_object_key_cluster_scoped() {
        assert_eq!(object_key(None, "node-1"), "node-1");
        assert_eq!(object_key(Some(""), "node-1"), "node-1");
    }

    #[test]
    fn test_resource_info_key() {
        let pv = ResourceInfo {
            name: "pv-1".to_string(),
            namespace: None,
            uid: "u1".to_string(),
            labels: BTreeMap::new(),
            data: serde_json::Value::Null,
        };
        assert_eq!(pv.key(), "pv-1");
    }
}
