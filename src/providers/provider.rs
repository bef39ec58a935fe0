use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Taint;

use crate::instance_type::InstanceType;
use crate::providers::fake::FakeProvider;
use crate::providers::kwok::KwokProvider;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId(pub String);

/// Node-level settings every launched node carries regardless of instance
/// type: which provisioner owns it, and the labels and taints its policy
/// stamps on.
#[derive(Debug, Clone, Default)]
pub struct InstanceConfig {
    pub provisioner: String,
    pub labels: BTreeMap<String, String>,
    pub taints: Vec<Taint>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The launch request itself was refused — the account hit a quota,
    /// the credentials lack a permission, or the request was malformed.
    /// Retrying without changing something is pointless.
    #[error("creation failed: {message}")]
    CreationFailed { message: String },

    /// The backend accepted the request but the node never turned up in the
    /// cluster. Whatever was half-created is torn down before this
    /// surfaces, so the id (when known) is for diagnostics only.
    #[error("node failed to join cluster within timeout: {node_id:?}")]
    JoinTimeout { node_id: Option<NodeId> },

    /// Capacity for this instance type is gone in every zone it lists.
    /// Usually transient; the next packing pass will route around it.
    #[error("instance type unavailable: {0}")]
    InstanceTypeUnavailable(String),

    /// The backend needs a setting this deployment never supplied.
    #[error("missing required config: {field}")]
    MissingConfig { field: &'static str },

    /// Transport-level trouble between us and the backend's API.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Launches and deletes nodes on a given backend — kwok for clusters without
/// kubelets, fake for tests. A successful `create` means a node is on its
/// way into the cluster; anything short of that must come back as an error,
/// never as a silently missing node.
pub enum Provider {
    Kwok(KwokProvider),
    Fake(FakeProvider),
}

impl Provider {
    /// Enumerate the instance types this backend can launch. Stable within
    /// one allocation pass; callers cache it across passes.
    pub async fn instance_types(&self) -> Vec<InstanceType> {
        match self {
            Self::Kwok(p) => p.instance_types().await,
            Self::Fake(p) => p.instance_types().await,
        }
    }

    /// Request a single node of the given instance type.
    pub async fn create(
        &self,
        instance_type: &InstanceType,
        config: &InstanceConfig,
    ) -> Result<NodeId, ProviderError> {
        match self {
            Self::Kwok(p) => p.create(instance_type, config).await,
            Self::Fake(p) => p.create(instance_type, config).await,
        }
    }

    /// Delete a node by its ID.
    pub async fn delete(&self, node_id: &NodeId) -> Result<(), ProviderError> {
        match self {
            Self::Kwok(p) => p.delete(node_id).await,
            Self::Fake(p) => p.delete(node_id).await,
        }
    }
}
