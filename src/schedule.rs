use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Pod;
use thiserror::Error;

use crate::instance_type::CloudProviderCapabilities;
use crate::provisioner::{ARCH_LABEL, INSTANCE_TYPE_LABEL, OS_LABEL, ZONE_LABEL};
use crate::resources::{PodRequest, QuantityError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    #[error("pod {pod} pins {key}={value:?}, which conflicts with the rest of the batch")]
    EmptyIntersection {
        key: &'static str,
        pod: String,
        value: String,
    },
    #[error("pod {pod} pins {key}={value:?}, which the cloud provider does not offer")]
    Unsupported {
        key: &'static str,
        pod: String,
        value: String,
    },
    #[error(transparent)]
    Requests(#[from] QuantityError),
}

/// The immutable description of what a batch of pods collectively requires.
/// Built once per batch, consumed by a single packing pass.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    /// Zones the batch may land in. Empty means unconstrained.
    pub zones: BTreeSet<String>,
    /// None means unconstrained; a closed set restricts candidates.
    pub architectures: Option<BTreeSet<String>>,
    pub operating_systems: Option<BTreeSet<String>>,
    pub instance_types: Option<BTreeSet<String>>,
    /// The batch itself.
    pub pods: Vec<PodRequest>,
    /// Workloads every launched node must also host.
    pub daemons: Vec<PodRequest>,
}

/// The node-selector pins that decide which pods can share a Schedule.
/// Pods with identical keys are batched together.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConstraintKey {
    pub zone: Option<String>,
    pub architecture: Option<String>,
    pub operating_system: Option<String>,
    pub instance_type: Option<String>,
}

impl ConstraintKey {
    pub fn of(pod: &Pod) -> Self {
        let selector = pod.spec.as_ref().and_then(|s| s.node_selector.as_ref());
        let pin = |key: &str| selector.and_then(|s| s.get(key)).cloned();
        ConstraintKey {
            zone: pin(ZONE_LABEL),
            architecture: pin(ARCH_LABEL),
            operating_system: pin(OS_LABEL),
            instance_type: pin(INSTANCE_TYPE_LABEL),
        }
    }
}

impl Schedule {
    /// Build a Schedule for a batch of pending pods by intersecting their
    /// node-selector constraints against what the cloud provider offers.
    /// Fails before any packing is attempted if the intersection is empty or
    /// a pod pins a value the provider does not have.
    pub fn for_pods(
        pods: &[Pod],
        daemons: Vec<PodRequest>,
        capabilities: &CloudProviderCapabilities,
    ) -> Result<Self, ScheduleError> {
        let mut schedule = Schedule {
            daemons,
            ..Default::default()
        };

        for pod in pods {
            let key = ConstraintKey::of(pod);
            let request = PodRequest::from_pod(pod)?;
            let id = request.id.to_string();

            if let Some(zone) = key.zone {
                if !capabilities.zones.contains(&zone) {
                    return Err(ScheduleError::Unsupported {
                        key: ZONE_LABEL,
                        pod: id,
                        value: zone,
                    });
                }
                intersect_open(&mut schedule.zones, ZONE_LABEL, &id, zone)?;
            }
            if let Some(architecture) = key.architecture {
                if !capabilities.architectures.contains(&architecture) {
                    return Err(ScheduleError::Unsupported {
                        key: ARCH_LABEL,
                        pod: id,
                        value: architecture,
                    });
                }
                intersect_closed(
                    &mut schedule.architectures,
                    ARCH_LABEL,
                    &id,
                    architecture,
                )?;
            }
            if let Some(operating_system) = key.operating_system {
                if !capabilities.operating_systems.contains(&operating_system) {
                    return Err(ScheduleError::Unsupported {
                        key: OS_LABEL,
                        pod: id,
                        value: operating_system,
                    });
                }
                intersect_closed(
                    &mut schedule.operating_systems,
                    OS_LABEL,
                    &id,
                    operating_system,
                )?;
            }
            if let Some(instance_type) = key.instance_type {
                if !capabilities.instance_types.contains(&instance_type) {
                    return Err(ScheduleError::Unsupported {
                        key: INSTANCE_TYPE_LABEL,
                        pod: id,
                        value: instance_type,
                    });
                }
                intersect_closed(
                    &mut schedule.instance_types,
                    INSTANCE_TYPE_LABEL,
                    &id,
                    instance_type,
                )?;
            }

            schedule.pods.push(request);
        }

        Ok(schedule)
    }
}

/// Intersection where the empty set means "unconstrained".
fn intersect_open(
    set: &mut BTreeSet<String>,
    key: &'static str,
    pod: &str,
    value: String,
) -> Result<(), ScheduleError> {
    if set.is_empty() {
        set.insert(value);
        return Ok(());
    }
    if !set.contains(&value) {
        return Err(ScheduleError::EmptyIntersection {
            key,
            pod: pod.to_string(),
            value,
        });
    }
    set.retain(|existing| existing == &value);
    Ok(())
}

/// Intersection where None means "unconstrained".
fn intersect_closed(
    set: &mut Option<BTreeSet<String>>,
    key: &'static str,
    pod: &str,
    value: String,
) -> Result<(), ScheduleError> {
    match set {
        None => {
            *set = Some(BTreeSet::from([value]));
            Ok(())
        }
        Some(existing) => {
            if !existing.contains(&value) {
                return Err(ScheduleError::EmptyIntersection {
                    key,
                    pod: pod.to_string(),
                    value,
                });
            }
            existing.retain(|e| e == &value);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::PodSpec;
    use kube::api::ObjectMeta;

    fn capabilities() -> CloudProviderCapabilities {
        CloudProviderCapabilities {
            zones: BTreeSet::from(["fsn1".into(), "nbg1".into()]),
            architectures: BTreeSet::from(["amd64".into(), "arm64".into()]),
            operating_systems: BTreeSet::from(["linux".into()]),
            instance_types: BTreeSet::from(["cx22".into(), "cax11".into()]),
        }
    }

    fn pod_with_selector(name: &str, selector: &[(&str, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_selector: Some(
                    selector
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn unconstrained_pods_build_open_schedule() {
        let pods = vec![pod_with_selector("pod-a", &[])];
        let schedule = Schedule::for_pods(&pods, vec![], &capabilities()).unwrap();
        assert!(schedule.zones.is_empty());
        assert_eq!(schedule.architectures, None);
        assert_eq!(schedule.operating_systems, None);
        assert_eq!(schedule.instance_types, None);
        assert_eq!(schedule.pods.len(), 1);
    }

    #[test]
    fn pins_intersect_across_the_batch() {
        let pods = vec![
            pod_with_selector("pod-a", &[(ZONE_LABEL, "fsn1"), (ARCH_LABEL, "arm64")]),
            pod_with_selector("pod-b", &[(ZONE_LABEL, "fsn1")]),
        ];
        let schedule = Schedule::for_pods(&pods, vec![], &capabilities()).unwrap();
        assert_eq!(schedule.zones, BTreeSet::from(["fsn1".to_string()]));
        assert_eq!(
            schedule.architectures,
            Some(BTreeSet::from(["arm64".to_string()]))
        );
    }

    #[test]
    fn conflicting_zones_are_infeasible() {
        let pods = vec![
            pod_with_selector("pod-a", &[(ZONE_LABEL, "fsn1")]),
            pod_with_selector("pod-b", &[(ZONE_LABEL, "nbg1")]),
        ];
        assert!(matches!(
            Schedule::for_pods(&pods, vec![], &capabilities()),
            Err(ScheduleError::EmptyIntersection {
                key: ZONE_LABEL,
                ..
            })
        ));
    }

    #[test]
    fn unsupported_pin_is_infeasible() {
        let pods = vec![pod_with_selector("pod-a", &[(ZONE_LABEL, "mars-1")])];
        assert!(matches!(
            Schedule::for_pods(&pods, vec![], &capabilities()),
            Err(ScheduleError::Unsupported {
                key: ZONE_LABEL,
                ..
            })
        ));

        let pods = vec![pod_with_selector(
            "pod-b",
            &[(INSTANCE_TYPE_LABEL, "m5.metal")],
        )];
        assert!(matches!(
            Schedule::for_pods(&pods, vec![], &capabilities()),
            Err(ScheduleError::Unsupported {
                key: INSTANCE_TYPE_LABEL,
                ..
            })
        ));
    }

    #[test]
    fn instance_type_pin_closes_the_whitelist() {
        let pods = vec![pod_with_selector("pod-a", &[(INSTANCE_TYPE_LABEL, "cx22")])];
        let schedule = Schedule::for_pods(&pods, vec![], &capabilities()).unwrap();
        assert_eq!(
            schedule.instance_types,
            Some(BTreeSet::from(["cx22".to_string()]))
        );
    }

    #[test]
    fn constraint_keys_group_identical_pins() {
        let a = ConstraintKey::of(&pod_with_selector("a", &[(ZONE_LABEL, "fsn1")]));
        let b = ConstraintKey::of(&pod_with_selector("b", &[(ZONE_LABEL, "fsn1")]));
        let c = ConstraintKey::of(&pod_with_selector("c", &[(ZONE_LABEL, "nbg1")]));
        let open = ConstraintKey::of(&pod_with_selector("d", &[]));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, open);
    }
}
