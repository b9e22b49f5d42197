//! Top-level controller resolution for pods
//!
//! Pods record their immediate controller, which is often an intermediate
//! object (a ReplicaSet behind a Deployment, a Job behind a CronJob). This
//! pass rewrites each pod's owner to the controller at the top of the chain,
//! using the replica-set and job records of the same snapshot.

use crate::models::{
    object_key, ClusterSnapshot, JobInfo, OwnerReference, ReplicaSetInfo, CRON_JOB_KIND, JOB_KIND,
    REPLICA_SET_KIND, STATIC_POD_OWNER_KIND,
};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Upper bound on ownership hops followed for one pod
pub const MAX_OWNER_HOPS: usize = 10;

/// Outcome of walking one ownership chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub owner: OwnerReference,
    /// False when the hop budget ran out before reaching a top-level owner
    pub complete: bool,
}

/// Walk from `owner` up to the top-level controller
///
/// Missing intermediate records end the walk at the last owner that could be
/// identified; the result is never worse than the input.
pub fn resolve_owner(
    namespace: &str,
    owner: &OwnerReference,
    replica_sets: &HashMap<String, &ReplicaSetInfo>,
    jobs: &HashMap<String, &JobInfo>,
) -> Resolution {
    let mut current = owner.clone();

    for _ in 0..MAX_OWNER_HOPS {
        let next = match current.kind.as_str() {
            REPLICA_SET_KIND => replica_sets
                .get(&object_key(Some(namespace), &current.name))
                .and_then(|rs| rs.owner.clone()),
            JOB_KIND => jobs
                .get(&object_key(Some(namespace), &current.name))
                .and_then(|job| job.cron_job.clone())
                .map(|cron_job| OwnerReference::new(CRON_JOB_KIND, cron_job, "")),
            _ => None,
        };

        match next {
            Some(parent) => current = parent,
            None => {
                return Resolution {
                    owner: current,
                    complete: true,
                }
            }
        }
    }

    Resolution {
        owner: current,
        complete: false,
    }
}

/// Rewrites pod owners in a snapshot to their top-level controllers
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnershipEnricher;

impl OwnershipEnricher {
    pub fn new() -> Self {
        Self
    }

    /// Resolve every pod's owner in place; returns the number of pods changed
    pub fn enrich(&self, snapshot: &mut ClusterSnapshot) -> usize {
        let replica_sets: HashMap<String, &ReplicaSetInfo> = snapshot
            .replica_sets
            .iter()
            .map(|rs| (rs.key(), rs))
            .collect();
        let jobs: HashMap<String, &JobInfo> =
            snapshot.jobs.iter().map(|job| (job.key(), job)).collect();

        let mut changed = 0;

        for pod in snapshot.pods.iter_mut() {
            let Some(owner) = pod.owner.as_ref() else {
                continue;
            };
            if owner.kind == STATIC_POD_OWNER_KIND {
                continue;
            }

            let resolution = resolve_owner(&pod.namespace, owner, &replica_sets, &jobs);

            if !resolution.complete {
                warn!(
                    pod = %pod.key(),
                    owner_kind = %resolution.owner.kind,
                    owner_name = %resolution.owner.name,
                    max_hops = MAX_OWNER_HOPS,
                    "Ownership chain exceeded hop budget, keeping last resolved owner"
                );
            }

            if &resolution.owner != owner {
                debug!(
                    pod = %pod.key(),
                    from_kind = %owner.kind,
                    from_name = %owner.name,
                    to_kind = %resolution.owner.kind,
                    to_name = %resolution.owner.name,
                    "Resolved top-level owner"
                );
                pod.owner = Some(resolution.owner);
                changed += 1;
            }
        }

        changed
    }
}
