use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{NodeSelectorRequirement, Taint};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instance_type::CloudProviderCapabilities;

/// API group all of our well-known keys live in.
pub const GROUP: &str = "karpenter.sh";

/// Label stamped on every launched node with the owning provisioner's name.
pub const PROVISIONER_NAME_LABEL: &str = "karpenter.sh/provisioner-name";
/// Taint applied at creation, removed once the node is initialized.
pub const NOT_READY_TAINT: &str = "karpenter.sh/not-ready";
/// Pod annotation opting out of voluntary eviction.
pub const DO_NOT_EVICT_ANNOTATION: &str = "karpenter.sh/do-not-evict";
/// Node annotation recording when the node was last seen empty.
pub const EMPTINESS_TIMESTAMP_ANNOTATION: &str = "karpenter.sh/emptiness-timestamp";
/// Finalizer guarding node teardown.
pub const TERMINATION_FINALIZER: &str = "karpenter.sh/termination";

pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
pub const ARCH_LABEL: &str = "kubernetes.io/arch";
pub const OS_LABEL: &str = "kubernetes.io/os";
pub const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

pub const ARCHITECTURE_AMD64: &str = "amd64";
pub const ARCHITECTURE_ARM64: &str = "arm64";
pub const OPERATING_SYSTEM_LINUX: &str = "linux";

/// Label keys owned by the scheduler or by this controller. Provisioners may
/// not set them; use the strongly typed requirement keys instead.
pub const RESTRICTED_LABELS: [&str; 7] = [
    ARCH_LABEL,
    OS_LABEL,
    ZONE_LABEL,
    INSTANCE_TYPE_LABEL,
    HOSTNAME_LABEL,
    PROVISIONER_NAME_LABEL,
    EMPTINESS_TIMESTAMP_ANNOTATION,
];

/// Condition type reported while the controller can act on the provisioner.
pub const CONDITION_ACTIVE: &str = "Active";

/// Spec for a Provisioner — the policy under which this controller launches
/// just-in-time nodes: which zones, architectures, operating systems, and
/// instance types are allowed, and what labels and taints launched nodes
/// carry.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(group = "karpenter.sh", version = "v1alpha4", kind = "Provisioner")]
#[kube(status = "ProvisionerStatus")]
#[serde(rename_all = "camelCase")]
pub struct ProvisionerSpec {
    /// Constraints on launched nodes, in node-affinity match-expression
    /// shape. Supported keys: topology.kubernetes.io/zone,
    /// kubernetes.io/arch, kubernetes.io/os,
    /// node.kubernetes.io/instance-type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<NodeSelectorRequirement>,
    /// Taints applied to every launched node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,
    /// Labels applied to every launched node.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Seconds a node may sit empty before it is terminated. None disables
    /// emptiness termination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_empty: Option<i64>,
}

/// Status of a Provisioner.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionerStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ProvisionerCondition>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ProvisionerCondition {
    /// Condition type, e.g. "Active".
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False", or "Unknown".
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("requirement key {0:?} is not a supported constraint key")]
    UnknownKey(String),
    #[error("requirement operator {0:?} is not supported, only \"In\"")]
    UnsupportedOperator(String),
    #[error("requirement {key} has no values")]
    EmptyValues { key: String },
    #[error("{key} value {value:?} is not offered by the cloud provider")]
    UnsupportedValue { key: String, value: String },
    #[error("label {0:?} is restricted")]
    RestrictedLabel(String),
}

/// Validate a provisioner spec against what the cloud provider actually
/// offers. Runs at admission time and again before each provisioning pass,
/// since the provider's offerings drift.
pub fn validate(
    spec: &ProvisionerSpec,
    capabilities: &CloudProviderCapabilities,
) -> Result<(), ValidationError> {
    for requirement in &spec.requirements {
        if requirement.operator != "In" {
            return Err(ValidationError::UnsupportedOperator(
                requirement.operator.clone(),
            ));
        }
        let supported = match requirement.key.as_str() {
            ZONE_LABEL => &capabilities.zones,
            ARCH_LABEL => &capabilities.architectures,
            OS_LABEL => &capabilities.operating_systems,
            INSTANCE_TYPE_LABEL => &capabilities.instance_types,
            other => return Err(ValidationError::UnknownKey(other.to_string())),
        };
        let values = requirement.values.as_deref().unwrap_or_default();
        if values.is_empty() {
            return Err(ValidationError::EmptyValues {
                key: requirement.key.clone(),
            });
        }
        for value in values {
            if !supported.contains(value) {
                return Err(ValidationError::UnsupportedValue {
                    key: requirement.key.clone(),
                    value: value.clone(),
                });
            }
        }
    }
    for label in spec.labels.keys() {
        if RESTRICTED_LABELS.contains(&label.as_str()) {
            return Err(ValidationError::RestrictedLabel(label.clone()));
        }
    }
    Ok(())
}

/// Fill in requirements the spec leaves open: amd64 and linux unless pinned.
pub fn default(spec: &mut ProvisionerSpec) {
    fn has(reqs: &[NodeSelectorRequirement], key: &str) -> bool {
        reqs.iter().any(|r| r.key == key)
    }
    if !has(&spec.requirements, ARCH_LABEL) {
        spec.requirements.push(NodeSelectorRequirement {
            key: ARCH_LABEL.to_string(),
            operator: "In".to_string(),
            values: Some(vec![ARCHITECTURE_AMD64.to_string()]),
        });
    }
    if !has(&spec.requirements, OS_LABEL) {
        spec.requirements.push(NodeSelectorRequirement {
            key: OS_LABEL.to_string(),
            operator: "In".to_string(),
            values: Some(vec![OPERATING_SYSTEM_LINUX.to_string()]),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;

    use kube::CustomResourceExt;

    fn capabilities() -> CloudProviderCapabilities {
        CloudProviderCapabilities {
            zones: BTreeSet::from(["fsn1".into(), "nbg1".into()]),
            architectures: BTreeSet::from(["amd64".into(), "arm64".into()]),
            operating_systems: BTreeSet::from(["linux".into()]),
            instance_types: BTreeSet::from(["cx22".into(), "cax11".into()]),
        }
    }

    fn requirement(key: &str, values: &[&str]) -> NodeSelectorRequirement {
        NodeSelectorRequirement {
            key: key.into(),
            operator: "In".into(),
            values: Some(values.iter().map(|v| v.to_string()).collect()),
        }
    }

    #[test]
    fn crd_generates_valid_schema() {
        let crd = Provisioner::crd();
        assert_eq!(
            crd.metadata.name.as_deref(),
            Some("provisioners.karpenter.sh")
        );

        let spec = &crd.spec;
        assert_eq!(spec.group, "karpenter.sh");
        assert_eq!(spec.names.kind, "Provisioner");
        assert_eq!(spec.names.plural, "provisioners");
    }

    #[test]
    fn spec_roundtrips_through_json() {
        let spec = ProvisionerSpec {
            requirements: vec![requirement(ZONE_LABEL, &["fsn1"])],
            ttl_seconds_after_empty: Some(30),
            ..Default::default()
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["ttlSecondsAfterEmpty"], 30);
        let back: ProvisionerSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back.requirements.len(), 1);
        assert_eq!(back.ttl_seconds_after_empty, Some(30));
    }

    #[test]
    fn valid_spec_passes() {
        let spec = ProvisionerSpec {
            requirements: vec![
                requirement(ZONE_LABEL, &["fsn1"]),
                requirement(ARCH_LABEL, &["arm64"]),
                requirement(INSTANCE_TYPE_LABEL, &["cax11"]),
            ],
            labels: BTreeMap::from([("team".to_string(), "search".to_string())]),
            ..Default::default()
        };
        assert_eq!(validate(&spec, &capabilities()), Ok(()));
    }

    #[test]
    fn unsupported_zone_rejected() {
        let spec = ProvisionerSpec {
            requirements: vec![requirement(ZONE_LABEL, &["mars-1"])],
            ..Default::default()
        };
        assert!(matches!(
            validate(&spec, &capabilities()),
            Err(ValidationError::UnsupportedValue { .. })
        ));
    }

    #[test]
    fn unknown_key_and_operator_rejected() {
        let spec = ProvisionerSpec {
            requirements: vec![requirement("example.com/rack", &["r1"])],
            ..Default::default()
        };
        assert!(matches!(
            validate(&spec, &capabilities()),
            Err(ValidationError::UnknownKey(_))
        ));

        let mut not_in = requirement(ZONE_LABEL, &["fsn1"]);
        not_in.operator = "NotIn".into();
        let spec = ProvisionerSpec {
            requirements: vec![not_in],
            ..Default::default()
        };
        assert!(matches!(
            validate(&spec, &capabilities()),
            Err(ValidationError::UnsupportedOperator(_))
        ));
    }

    #[test]
    fn restricted_label_rejected() {
        let spec = ProvisionerSpec {
            labels: BTreeMap::from([(PROVISIONER_NAME_LABEL.to_string(), "oops".to_string())]),
            ..Default::default()
        };
        assert!(matches!(
            validate(&spec, &capabilities()),
            Err(ValidationError::RestrictedLabel(_))
        ));
    }

    #[test]
    fn defaulting_fills_arch_and_os_once() {
        let mut spec = ProvisionerSpec::default();
        default(&mut spec);
        assert_eq!(spec.requirements.len(), 2);

        let mut pinned = ProvisionerSpec {
            requirements: vec![requirement(ARCH_LABEL, &["arm64"])],
            ..Default::default()
        };
        default(&mut pinned);
        // arm64 pin survives; only os was added
        assert_eq!(pinned.requirements.len(), 2);
        assert_eq!(
            pinned.requirements[0].values,
            Some(vec!["arm64".to_string()])
        );
    }
}
