use crate::instance_type::InstanceType;
use crate::resources::{PodRequest, Resource, ResourceVector};

/// Capacity-tracking view of one hypothetical node of a particular instance
/// type. Constructed fresh for each packing pass with nothing reserved, then
/// filled by `reserve`/`reserve_pod`. `reserved` never exceeds the instance
/// type's capacity.
#[derive(Debug, Clone)]
pub struct Packable<'a> {
    pub instance_type: &'a InstanceType,
    reserved: ResourceVector,
}

/// Outcome of packing an ordered batch onto one Packable. `packed` and
/// `unpacked` partition the input and preserve its order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackResult {
    pub packed: Vec<PodRequest>,
    pub unpacked: Vec<PodRequest>,
}

impl<'a> Packable<'a> {
    pub fn new(instance_type: &'a InstanceType) -> Self {
        Packable {
            instance_type,
            reserved: ResourceVector::default(),
        }
    }

    pub fn reserved(&self) -> &ResourceVector {
        &self.reserved
    }

    /// Commit `requests` against the remaining capacity. On failure the
    /// reservation is left untouched.
    pub fn reserve(&mut self, requests: &ResourceVector) -> bool {
        let candidate = self.reserved.add(requests);
        if candidate.le(&self.instance_type.capacity) {
            self.reserved = candidate;
            return true;
        }
        false
    }

    /// Reserve a pod's effective requests plus the pod slot it occupies.
    pub fn reserve_pod(&mut self, pod: &PodRequest) -> bool {
        let mut requests = pod.requests;
        requests.pods += 1;
        self.reserve(&requests)
    }

    /// True when some resource with a non-zero ceiling would be at or past
    /// that ceiling once `pod` lands — the node has run out of headroom for
    /// units of this size. Resources the instance type doesn't have at all
    /// are skipped; those are caught by `reserve` instead.
    pub fn saturated_by(&self, pod: &PodRequest) -> bool {
        for resource in Resource::ALL {
            let total = self.instance_type.capacity.get(resource);
            if total == 0 {
                continue;
            }
            if self.reserved.get(resource) + pod.requests.get(resource) >= total {
                return true;
            }
        }
        false
    }

    /// Greedily pack an ordered batch, largest unit first; the caller sorts.
    ///
    /// A unit that doesn't fit while the node still has headroom is set
    /// aside individually so that smaller units behind it get a chance. Once
    /// even the smallest remaining unit would saturate the node, the whole
    /// tail spills at once. A node that cannot take the batch's largest unit
    /// at all takes nothing.
    pub fn pack(&mut self, pods: &[PodRequest]) -> PackResult {
        let mut result = PackResult::default();
        for (index, pod) in pods.iter().enumerate() {
            if self.reserve_pod(pod) {
                result.packed.push(pod.clone());
                continue;
            }
            if let Some(smallest) = pods.last() {
                if self.saturated_by(smallest) {
                    result.unpacked.extend_from_slice(&pods[index..]);
                    return result;
                }
            }
            if result.packed.is_empty() {
                result.unpacked = pods.to_vec();
                return result;
            }
            result.unpacked.push(pod.clone());
        }
        result
    }
}
