use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::{Node, NodeSpec, NodeStatus, Taint};
use kube::api::{DeleteParams, ObjectMeta, PostParams};
use kube::{Api, Client};

use crate::instance_type::InstanceType;
use crate::providers::provider::{InstanceConfig, NodeId, ProviderError};
use crate::provisioner::{
    ARCH_LABEL, INSTANCE_TYPE_LABEL, NOT_READY_TAINT, OS_LABEL, PROVISIONER_NAME_LABEL,
    ZONE_LABEL,
};
use crate::resources::ResourceVector;

const ZONES: [&str; 3] = ["fsn1", "nbg1", "hel1"];

fn instance_type(
    name: &str,
    architecture: &str,
    cpu_cores: i64,
    memory_mib: i64,
    price_per_hour: f64,
) -> InstanceType {
    InstanceType {
        name: name.into(),
        zones: ZONES.iter().map(|z| z.to_string()).collect(),
        architectures: BTreeSet::from([architecture.to_string()]),
        operating_systems: BTreeSet::from(["linux".to_string()]),
        capacity: ResourceVector {
            cpu_millis: cpu_cores * 1000,
            memory_bytes: memory_mib * 1024 * 1024,
            pods: 110,
            ..Default::default()
        },
        // flat kubelet + system reservation; kwok nodes have no real kernel
        // but the arithmetic should look like a live node's
        overhead: ResourceVector {
            cpu_millis: 100,
            memory_bytes: 256 * 1024 * 1024,
            pods: 2,
            ..Default::default()
        },
        price_per_hour,
    }
}

fn gpu_instance_type(
    name: &str,
    cpu_cores: i64,
    memory_mib: i64,
    nvidia_gpus: i64,
    price_per_hour: f64,
) -> InstanceType {
    let mut it = instance_type(name, "amd64", cpu_cores, memory_mib, price_per_hour);
    it.capacity.nvidia_gpus = nvidia_gpus;
    it
}

/// Kubernetes With Out Kubelet backend: nodes exist only as API objects,
/// which is enough to drive the allocator end to end in a real cluster.
pub struct KwokProvider {
    client: Client,
}

impl KwokProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn instance_types(&self) -> Vec<InstanceType> {
        vec![
            // CX – Shared x86                                       $/hr
            instance_type("cx22", "amd64", 2, 4_096, 0.0066),
            instance_type("cx32", "amd64", 4, 8_192, 0.0106),
            instance_type("cx42", "amd64", 8, 16_384, 0.0170),
            instance_type("cx52", "amd64", 16, 32_768, 0.0314),
            // CAX – ARM (Ampere)
            instance_type("cax11", "arm64", 2, 4_096, 0.0074),
            instance_type("cax21", "arm64", 4, 8_192, 0.0122),
            instance_type("cax31", "arm64", 8, 16_384, 0.0226),
            instance_type("cax41", "arm64", 16, 32_768, 0.0443),
            // CCX – Dedicated x86
            instance_type("ccx33", "amd64", 8, 32_768, 0.0900),
            instance_type("ccx43", "amd64", 16, 65_536, 0.1789),
            instance_type("ccx53", "amd64", 32, 131_072, 0.3568),
            // GPU (fictional, for exercising accelerator scheduling)
            gpu_instance_type("gpu-a100-1", 12, 131_072, 1, 2.21),
            gpu_instance_type("gpu-a100-4", 48, 524_288, 4, 8.84),
        ]
    }

    pub async fn create(
        &self,
        instance_type: &InstanceType,
        config: &InstanceConfig,
    ) -> Result<NodeId, ProviderError> {
        let capacity = instance_type.capacity.to_quantity_map();
        let allocatable = instance_type
            .capacity
            .checked_sub(&instance_type.overhead)
            .unwrap_or_default()
            .to_quantity_map();

        let mut labels = BTreeMap::from([
            ("type".to_string(), "kwok".to_string()),
            (
                "app.kubernetes.io/managed-by".to_string(),
                "sproutrs".to_string(),
            ),
            (
                INSTANCE_TYPE_LABEL.to_string(),
                instance_type.name.clone(),
            ),
            (OS_LABEL.to_string(), "linux".to_string()),
        ]);
        if let Some(architecture) = instance_type.architectures.first() {
            labels.insert(ARCH_LABEL.to_string(), architecture.clone());
        }
        if let Some(zone) = instance_type.zones.first() {
            labels.insert(ZONE_LABEL.to_string(), zone.clone());
        }
        if !config.provisioner.is_empty() {
            labels.insert(
                PROVISIONER_NAME_LABEL.to_string(),
                config.provisioner.clone(),
            );
        }
        labels.extend(config.labels.clone());

        let mut taints = vec![Taint {
            key: NOT_READY_TAINT.to_string(),
            effect: "NoSchedule".to_string(),
            ..Default::default()
        }];
        taints.extend(config.taints.iter().cloned());

        let nodes: Api<Node> = Api::all(self.client.clone());
        let node = Node {
            metadata: ObjectMeta {
                name: Some(format!("sprout-kwok-{}", uuid::Uuid::new_v4())),
                labels: Some(labels),
                annotations: Some(BTreeMap::from([(
                    "kwok.x-k8s.io/node".to_string(),
                    "fake".to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                taints: Some(taints),
                ..Default::default()
            }),
            status: Some(NodeStatus {
                capacity: Some(capacity),
                allocatable: Some(allocatable),
                ..Default::default()
            }),
        };
        let created = nodes
            .create(&PostParams::default(), &node)
            .await
            .map_err(|e| ProviderError::CreationFailed {
                message: e.to_string(),
            })?;
        let name = created.metadata.name.unwrap_or_default();
        Ok(NodeId(name))
    }

    pub async fn delete(&self, node_id: &NodeId) -> Result<(), ProviderError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        nodes
            .delete(&node_id.0, &DeleteParams::default())
            .await
            .map_err(|e| ProviderError::CreationFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }
}
