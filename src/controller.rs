use std::collections::BTreeMap;

use anyhow::Result;
use futures_util::future::join_all;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client};
use tracing::{error, info, warn};

use crate::binpacking::{pack_schedule, AllocationPlan};
use crate::cache::InstanceTypeCache;
use crate::instance_type::CloudProviderCapabilities;
use crate::providers::provider::{InstanceConfig, NodeId, Provider, ProviderError};
use crate::provisioner::{self, Provisioner};
use crate::resources::{requests_for, PodId, PodRequest};
use crate::schedule::{ConstraintKey, Schedule};

/// Retrieve pods that are unschedulable by virtue of unmet resources
pub async fn get_unschedulable_pods(client: Client) -> Result<Vec<Pod>> {
    let pods: Api<Pod> = Api::all(client.clone());
    let lp = ListParams::default().fields("status.phase=Pending");
    Ok(pods
        .list(&lp)
        .await?
        .into_iter()
        .filter(|pod| {
            let is_unschedulable = pod
                .status
                .as_ref()
                .and_then(|s| s.conditions.as_ref())
                .map(|conditions| {
                    conditions.iter().any(|c| {
                        c.type_ == "PodScheduled"
                            && c.status == "False"
                            && c.reason.as_deref() == Some("Unschedulable")
                    })
                })
                .unwrap_or(false);

            // DaemonSet pods target every node, including nodes that cannot
            // run them; they're accounted for as per-node overhead instead.
            let is_daemonset = pod
                .metadata
                .owner_references
                .as_ref()
                .map(|refs| refs.iter().any(|r| r.kind == "DaemonSet"))
                .unwrap_or(false);

            is_unschedulable && !is_daemonset
        })
        .collect())
}

/// The workloads every launched node must host, derived from the cluster's
/// DaemonSet pod templates.
pub async fn get_daemon_requests(client: Client) -> Result<Vec<PodRequest>> {
    let daemon_sets: Api<DaemonSet> = Api::all(client);
    let mut daemons = Vec::new();
    for daemon_set in daemon_sets.list(&ListParams::default()).await? {
        let id = PodId {
            namespace: daemon_set.metadata.namespace.clone().unwrap_or_default(),
            name: daemon_set.metadata.name.clone().unwrap_or_default(),
        };
        let Some(template_spec) = daemon_set.spec.and_then(|s| s.template.spec) else {
            continue;
        };
        daemons.push(PodRequest {
            id,
            requests: requests_for(&template_spec)?,
        });
    }
    Ok(daemons)
}

/// Batch pods by their constraint signature; pods with identical pins share
/// one Schedule and one packing pass.
pub fn group_by_constraints(pods: Vec<Pod>) -> BTreeMap<ConstraintKey, Vec<Pod>> {
    let mut groups: BTreeMap<ConstraintKey, Vec<Pod>> = BTreeMap::new();
    for pod in pods {
        groups.entry(ConstraintKey::of(&pod)).or_default().push(pod);
    }
    groups
}

/// Resolve the named Provisioner into the node-level settings its nodes
/// carry. The spec is defaulted and re-validated against the provider's
/// current offerings every pass, since those drift. A missing Provisioner
/// falls back to an empty policy so a bare cluster still scales.
pub async fn instance_config_for(
    client: Client,
    name: &str,
    capabilities: &CloudProviderCapabilities,
) -> Result<InstanceConfig> {
    let provisioners: Api<Provisioner> = Api::all(client);
    let Some(object) = provisioners.get_opt(name).await? else {
        warn!(provisioner = name, "provisioner not found, using empty policy");
        return Ok(InstanceConfig {
            provisioner: name.to_string(),
            ..Default::default()
        });
    };
    let mut spec = object.spec;
    provisioner::default(&mut spec);
    provisioner::validate(&spec, capabilities)?;
    Ok(InstanceConfig {
        provisioner: name.to_string(),
        labels: spec.labels,
        taints: spec.taints,
    })
}

/// Launch one node per emitted packing. Launches fan out in parallel and
/// fail independently; the slice of per-node results comes back once every
/// launch has settled.
pub async fn launch_packings(
    provider: &Provider,
    plan: &AllocationPlan,
    config: &InstanceConfig,
) -> Vec<Result<NodeId, ProviderError>> {
    let launches = plan.packings.iter().map(|packing| async move {
        let outcome = provider.create(&packing.instance_type, config).await;
        match &outcome {
            Ok(node_id) => info!(
                node = %node_id.0,
                instance_type = %packing.instance_type.name,
                pods = packing.pods.len(),
                "launched node"
            ),
            Err(error) => error!(
                instance_type = %packing.instance_type.name,
                %error,
                "node launch failed"
            ),
        }
        outcome
    });
    join_all(launches).await
}

/// One reconcile pass: find pending work, pack it, launch capacity.
/// Returns the number of nodes successfully requested.
pub async fn reconcile(
    client: Client,
    provider: &Provider,
    cache: &InstanceTypeCache,
    provisioner_name: &str,
) -> Result<usize> {
    let pods = get_unschedulable_pods(client.clone()).await?;
    info!(count = pods.len(), "found unschedulable pods");
    if pods.is_empty() {
        return Ok(0);
    }

    let daemons = get_daemon_requests(client.clone()).await?;
    let instance_types = cache
        .get_or_fetch(|| async { Ok(provider.instance_types().await) })
        .await?;
    let capabilities = CloudProviderCapabilities::from_instance_types(&instance_types);
    let config = instance_config_for(client.clone(), provisioner_name, &capabilities).await?;

    let mut launched = 0;
    for (_, group) in group_by_constraints(pods) {
        let schedule = match Schedule::for_pods(&group, daemons.clone(), &capabilities) {
            Ok(schedule) => schedule,
            Err(error) => {
                // Constraints won't intersect until something changes;
                // nothing to retry within this pass.
                warn!(%error, pods = group.len(), "skipping infeasible batch");
                continue;
            }
        };
        let plan = pack_schedule(&instance_types, &schedule);
        let results = launch_packings(provider, &plan, &config).await;
        launched += results.iter().filter(|r| r.is_ok()).count();
    }
    Ok(launched)
}
