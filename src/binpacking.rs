use std::cmp::Ordering;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::instance_type::InstanceType;
use crate::packable::{PackResult, Packable};
use crate::resources::{PodRequest, Resource};
use crate::schedule::Schedule;

/// Why an instance type was excluded from a packing pass.
#[derive(Debug, Error)]
enum Exclusion {
    #[error("offers none of the required zones")]
    Zones,
    #[error("not in the batch's instance-type whitelist")]
    InstanceType,
    #[error("offers none of the required architectures")]
    Architecture,
    #[error("offers none of the required operating systems")]
    OperatingSystem,
    #[error("{0} is not requested by any pod in the batch")]
    UnrequestedAccelerator(Resource),
    #[error("not enough resources for kubelet and system overhead")]
    Overhead,
    #[error("not enough resources for daemons")]
    Daemons,
}

/// One hypothetical node: an instance type and the pods assigned to it.
/// Emitted packings are independent and can be launched in parallel.
#[derive(Debug, Clone, PartialEq)]
pub struct Packing {
    pub instance_type: InstanceType,
    pub pods: Vec<PodRequest>,
}

/// Output of one packing pass over a Schedule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationPlan {
    pub packings: Vec<Packing>,
    /// Pods no candidate could host. Left pending and retried on a later
    /// reconciliation, since the instance-type listing may change.
    pub unschedulable: Vec<PodRequest>,
}

fn check_constraints(instance_type: &InstanceType, schedule: &Schedule) -> Result<(), Exclusion> {
    if !schedule.zones.is_empty() && schedule.zones.is_disjoint(&instance_type.zones) {
        return Err(Exclusion::Zones);
    }
    if let Some(whitelist) = &schedule.instance_types {
        if !whitelist.contains(&instance_type.name) {
            return Err(Exclusion::InstanceType);
        }
    }
    if let Some(architectures) = &schedule.architectures {
        if architectures.is_disjoint(&instance_type.architectures) {
            return Err(Exclusion::Architecture);
        }
    }
    if let Some(operating_systems) = &schedule.operating_systems {
        if operating_systems.is_disjoint(&instance_type.operating_systems) {
            return Err(Exclusion::OperatingSystem);
        }
    }
    // An accelerator node is wasted on a batch that doesn't ask for that
    // accelerator; instance types that lack a demanded accelerator are
    // eliminated later by packing itself.
    for accelerator in Resource::ACCELERATORS {
        if instance_type.capacity.get(accelerator) == 0 {
            continue;
        }
        if !schedule
            .pods
            .iter()
            .any(|pod| pod.requests.get(accelerator) > 0)
        {
            return Err(Exclusion::UnrequestedAccelerator(accelerator));
        }
    }
    Ok(())
}

/// Build viable packables for the schedule, excluding instance types that
/// violate its constraints or lack room for overhead and daemons. Survivors
/// already carry overhead and daemons in their reservation.
pub fn packables_for<'a>(
    instance_types: &'a [InstanceType],
    schedule: &Schedule,
) -> Vec<Packable<'a>> {
    let mut packables = Vec::new();
    for instance_type in instance_types {
        if let Err(reason) = check_constraints(instance_type, schedule) {
            debug!(instance_type = %instance_type.name, %reason, "excluding instance type");
            continue;
        }
        let mut packable = Packable::new(instance_type);
        if !packable.reserve(&instance_type.overhead) {
            debug!(instance_type = %instance_type.name, reason = %Exclusion::Overhead, "excluding instance type");
            continue;
        }
        if !packable.pack(&schedule.daemons).unpacked.is_empty() {
            debug!(instance_type = %instance_type.name, reason = %Exclusion::Daemons, "excluding instance type");
            continue;
        }
        packables.push(packable);
    }
    packables
}

/// Total order on pod requests, largest first: cpu, then memory, then each
/// accelerator class, with the pod id as the final tie-break so the packing
/// sequence is reproducible.
fn by_resources_descending(a: &PodRequest, b: &PodRequest) -> Ordering {
    b.requests
        .cpu_millis
        .cmp(&a.requests.cpu_millis)
        .then(b.requests.memory_bytes.cmp(&a.requests.memory_bytes))
        .then(b.requests.nvidia_gpus.cmp(&a.requests.nvidia_gpus))
        .then(b.requests.amd_gpus.cmp(&a.requests.amd_gpus))
        .then(b.requests.aws_neurons.cmp(&a.requests.aws_neurons))
        .then_with(|| a.id.cmp(&b.id))
}

/// True when `candidate` beats the current best on equal cost: smaller
/// capacity first, then name, so equal-cost choices are stable.
fn smaller_instance(candidate: &InstanceType, best: &InstanceType) -> bool {
    (
        candidate.capacity.cpu_millis,
        candidate.capacity.memory_bytes,
        candidate.name.as_str(),
    ) < (best.capacity.cpu_millis, best.capacity.memory_bytes, best.name.as_str())
}

/// Run one packing pass: filter the instance types against the schedule,
/// then repeatedly pick the candidate with the lowest price per packed pod
/// and emit it as a hypothetical node, until every pod is placed or no
/// candidate can take even one of the remaining pods.
///
/// Each emitted packing is a separate node, so a cheap instance type can
/// back several packings in one pass. The emission sequence is a
/// deterministic function of the inputs.
pub fn pack_schedule(instance_types: &[InstanceType], schedule: &Schedule) -> AllocationPlan {
    let mut remaining = schedule.pods.clone();
    remaining.sort_by(by_resources_descending);

    let mut plan = AllocationPlan::default();
    let candidates = packables_for(instance_types, schedule);
    info!(
        pods = remaining.len(),
        candidates = candidates.len(),
        "starting packing pass"
    );
    if candidates.is_empty() {
        plan.unschedulable = remaining;
        for pod in &plan.unschedulable {
            warn!(pod = %pod.id, "no candidate instance type");
        }
        return plan;
    }

    while !remaining.is_empty() {
        let mut best: Option<(usize, PackResult, f64)> = None;
        for (index, candidate) in candidates.iter().enumerate() {
            // Packables are single-use nodes; speculate on a copy so the
            // base reservation (overhead + daemons) stays reusable.
            let result = candidate.clone().pack(&remaining);
            if result.packed.is_empty() {
                continue;
            }
            let cost = candidate.instance_type.price_per_hour / result.packed.len() as f64;
            let better = match &best {
                None => true,
                Some((best_index, _, best_cost)) => match cost.total_cmp(best_cost) {
                    Ordering::Less => true,
                    Ordering::Greater => false,
                    Ordering::Equal => smaller_instance(
                        candidate.instance_type,
                        candidates[*best_index].instance_type,
                    ),
                },
            };
            if better {
                best = Some((index, result, cost));
            }
        }

        let Some((index, PackResult { packed, unpacked }, cost)) = best else {
            break;
        };
        let instance_type = candidates[index].instance_type;
        info!(
            instance_type = %instance_type.name,
            pods = packed.len(),
            cost_per_pod = format!("{cost:.4}"),
            "provisioning node"
        );
        plan.packings.push(Packing {
            instance_type: instance_type.clone(),
            pods: packed,
        });
        remaining = unpacked;
    }

    for pod in &remaining {
        warn!(pod = %pod.id, "pod unschedulable after packing pass");
    }
    plan.unschedulable = remaining;
    info!(
        packings = plan.packings.len(),
        unschedulable = plan.unschedulable.len(),
        "packing pass complete"
    );
    plan
}
