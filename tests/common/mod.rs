use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::{
    Container, Pod, PodCondition, PodSpec, PodStatus, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;

use sproutrs::instance_type::InstanceType;
use sproutrs::resources::ResourceVector;

fn make_pod(name: &str, requests: BTreeMap<String, Quantity>, selector: Option<BTreeMap<String, String>>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some("default".into()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "worker".into(),
                image: Some("busybox".into()),
                resources: Some(ResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            node_selector: selector,
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Pending".into()),
            conditions: Some(vec![PodCondition {
                type_: "PodScheduled".into(),
                status: "False".into(),
                reason: Some("Unschedulable".into()),
                message: Some("insufficient resources".into()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn pending_pod(name: &str, cpu: &str, memory: &str) -> Pod {
    make_pod(
        name,
        BTreeMap::from([
            ("cpu".into(), Quantity(cpu.into())),
            ("memory".into(), Quantity(memory.into())),
        ]),
        None,
    )
}

pub fn gpu_pod(name: &str, cpu: &str, memory: &str, gpus: u32) -> Pod {
    make_pod(
        name,
        BTreeMap::from([
            ("cpu".into(), Quantity(cpu.into())),
            ("memory".into(), Quantity(memory.into())),
            ("nvidia.com/gpu".into(), Quantity(gpus.to_string())),
        ]),
        None,
    )
}

pub fn pod_pinned_to_zone(name: &str, cpu: &str, memory: &str, zone: &str) -> Pod {
    make_pod(
        name,
        BTreeMap::from([
            ("cpu".into(), Quantity(cpu.into())),
            ("memory".into(), Quantity(memory.into())),
        ]),
        Some(BTreeMap::from([(
            "topology.kubernetes.io/zone".to_string(),
            zone.to_string(),
        )])),
    )
}

pub fn instance_type(
    name: &str,
    zones: &[&str],
    cpu_millis: i64,
    memory_bytes: i64,
    price_per_hour: f64,
) -> InstanceType {
    InstanceType {
        name: name.into(),
        zones: zones.iter().map(|z| z.to_string()).collect(),
        architectures: BTreeSet::from(["amd64".to_string()]),
        operating_systems: BTreeSet::from(["linux".to_string()]),
        capacity: ResourceVector {
            cpu_millis,
            memory_bytes,
            pods: 110,
            ..Default::default()
        },
        overhead: ResourceVector::default(),
        price_per_hour,
    }
}

pub fn with_overhead(mut it: InstanceType, cpu_millis: i64, memory_bytes: i64) -> InstanceType {
    it.overhead = ResourceVector {
        cpu_millis,
        memory_bytes,
        ..Default::default()
    };
    it
}

pub fn with_nvidia_gpus(mut it: InstanceType, gpus: i64) -> InstanceType {
    it.capacity.nvidia_gpus = gpus;
    it
}
